//! 导出工作簿模型
//!
//! 先构建与格式无关的工作簿，再交给 xlsx 渲染；
//! 工作表顺序固定：表格（按识别顺序）→ 键值对 → 原始文本

use serde::Serialize;
use std::borrow::Cow;

use crate::models::ocr_result::OcrResult;

pub const KEY_VALUE_SHEET: &str = "键值对";
pub const RAW_TEXT_SHEET: &str = "原始文本";

/// xlsx 单元格的字符上限
pub const MAX_CELL_CHARS: usize = 32_767;
const TRUNCATED_MARKER: &str = "…[已截断]";

/// 工作表类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetKind {
    Table,
    KeyValue,
    RawText,
}

/// 单个工作表
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sheet {
    pub name: String,
    pub kind: SheetKind,
    /// 表头行（可选）
    pub header: Option<Vec<String>>,
    /// 数据行
    pub rows: Vec<Vec<String>>,
}

/// 工作簿
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// 由 OCR 结果构建工作簿
    pub fn from_ocr_result(result: &OcrResult) -> Self {
        let mut sheets = Vec::with_capacity(result.tables.len() + 2);

        for (idx, table) in result.tables.iter().enumerate() {
            sheets.push(Sheet {
                name: format!("表格{}", idx + 1),
                kind: SheetKind::Table,
                header: if table.headers.is_empty() {
                    None
                } else {
                    Some(table.headers.clone())
                },
                rows: table.rows.clone(),
            });
        }

        sheets.push(Sheet {
            name: KEY_VALUE_SHEET.to_string(),
            kind: SheetKind::KeyValue,
            header: Some(vec!["字段".to_string(), "值".to_string(), "置信度".to_string()]),
            rows: result
                .fields
                .iter()
                .map(|f| vec![f.name.clone(), f.value.clone(), format!("{:.2}", f.confidence)])
                .collect(),
        });

        sheets.push(Sheet {
            name: RAW_TEXT_SHEET.to_string(),
            kind: SheetKind::RawText,
            header: Some(vec!["页码".to_string(), "文本".to_string()]),
            rows: result
                .pages
                .iter()
                .flat_map(|page| {
                    // 超长文本块拆成多行，页码重复
                    page.blocks.iter().flat_map(move |b| {
                        split_cell(&b.content)
                            .into_iter()
                            .map(move |chunk| vec![page.page_number.to_string(), chunk])
                    })
                })
                .collect(),
        });

        Self { sheets }
    }

    /// 指定类型的工作表
    pub fn sheets_of(&self, kind: SheetKind) -> impl Iterator<Item = &Sheet> {
        self.sheets.iter().filter(move |s| s.kind == kind)
    }

    /// 渲染为 xlsx 字节
    pub fn to_xlsx(&self) -> Result<Vec<u8>, rust_xlsxwriter::XlsxError> {
        let mut workbook = rust_xlsxwriter::Workbook::new();

        for sheet in &self.sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&sheet.name)?;

            let mut row_idx: u32 = 0;
            if let Some(header) = &sheet.header {
                for (col, value) in header.iter().enumerate() {
                    worksheet.write_string(row_idx, col as u16, &*fit_cell(value))?;
                }
                row_idx += 1;
            }
            for row in &sheet.rows {
                for (col, value) in row.iter().enumerate() {
                    worksheet.write_string(row_idx, col as u16, &*fit_cell(value))?;
                }
                row_idx += 1;
            }
        }

        workbook.save_to_buffer()
    }
}

/// 按单元格上限切分文本
fn split_cell(text: &str) -> Vec<String> {
    if text.chars().count() <= MAX_CELL_CHARS {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(MAX_CELL_CHARS).map(|c| c.iter().collect()).collect()
}

/// 超过单元格上限时截断并加标记
fn fit_cell(text: &str) -> Cow<'_, str> {
    if text.chars().count() <= MAX_CELL_CHARS {
        return Cow::Borrowed(text);
    }
    let keep = MAX_CELL_CHARS - TRUNCATED_MARKER.chars().count();
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(TRUNCATED_MARKER);
    Cow::Owned(truncated)
}
