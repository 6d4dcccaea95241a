//! OCR 结构化结果
//!
//! OCR 步骤写入 enhanced 桶的 JSON，解析、导出、校验三个步骤都只读它

use serde::{Deserialize, Serialize};

/// 文本块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// 单页内容（按文档顺序排列的文本块）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    #[serde(default)]
    pub blocks: Vec<TextBlock>,
}

/// 识别出的表格
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub page_number: u32,
    /// 表头（可能为空）
    #[serde(default)]
    pub headers: Vec<String>,
    /// 数据行
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// 数据行数
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// 列数：表头与最宽数据行中的较大值
    pub fn column_count(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.len())
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0)
    }
}

/// 表单字段（键值对）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub confidence: f64,
}

/// OCR 结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub document: String,
    pub analyzer_id: String,
    pub page_count: u32,
    pub pages: Vec<Page>,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl OcrResult {
    /// 从 JSON 字节解析并做结构检查
    ///
    /// 错误信息为可读文本，由调用方包装成 Parse / Export 错误
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, String> {
        let result: OcrResult = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        result.check()?;
        Ok(result)
    }

    /// 序列化为 JSON（格式化输出，便于人工查看）
    pub fn to_json_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// 结构检查
    pub fn check(&self) -> Result<(), String> {
        if self.page_count as usize != self.pages.len() {
            return Err(format!(
                "page_count={} 与 pages 数量 {} 不一致",
                self.page_count,
                self.pages.len()
            ));
        }
        for (idx, table) in self.tables.iter().enumerate() {
            if !table.headers.is_empty() {
                if let Some(row) = table.rows.iter().find(|r| r.len() > table.headers.len()) {
                    return Err(format!(
                        "表格 {} 的数据行宽度 {} 超过表头列数 {}",
                        idx + 1,
                        row.len(),
                        table.headers.len()
                    ));
                }
            }
        }
        let confidences = self
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.confidence))
            .chain(self.pages.iter().flat_map(|p| {
                p.blocks
                    .iter()
                    .filter_map(|b| b.confidence.map(|c| ("text", c)))
            }));
        for (name, confidence) in confidences {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(format!("{} 的置信度 {} 超出 [0, 1]", name, confidence));
            }
        }
        Ok(())
    }

    /// 所有文本块（文档顺序）
    pub fn blocks(&self) -> impl Iterator<Item = &TextBlock> {
        self.pages.iter().flat_map(|p| p.blocks.iter())
    }

    /// 提取文本的总长度（不计空白字符）
    pub fn text_len(&self) -> usize {
        self.blocks().map(|b| non_whitespace_len(&b.content)).sum()
    }

    /// 置信度低于阈值的字段
    pub fn low_confidence_fields(&self, threshold: f64) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(move |f| f.confidence < threshold)
    }
}

/// 非空白字符数
pub fn non_whitespace_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}
