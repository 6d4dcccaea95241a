//! 摘要文本格式
//!
//! 摘要由解析步骤生成、由校验器读回，两边共用这里的格式定义。
//! 生成结果只依赖 OCR 结果和阈值，不含时间戳，重复生成逐字节一致。

use regex::Regex;
use std::sync::LazyLock;

use crate::models::ocr_result::{non_whitespace_len, OcrResult};

pub const PAGE_HEADING_PREFIX: &str = "## 第 ";
pub const TABLES_HEADING: &str = "## 表格清单";
pub const FIELDS_HEADING: &str = "## 键值字段";
pub const LOW_CONFIDENCE_HEADING: &str = "## 低置信度字段";
pub const LOW_CONFIDENCE_MARK: &str = "[低置信度]";
const EMPTY_SECTION: &str = "(无)";
/// 正文行以 `#` 或转义符开头时加上的前缀，避免被当成标题
const TEXT_ESCAPE: char = '\\';

static TABLE_ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- 表格 (\d+): (\d+) 行 × (\d+) 列").expect("表格条目正则"));

/// 由 OCR 结果生成摘要
pub fn render_summary(result: &OcrResult, low_confidence_threshold: f64) -> String {
    let mut out = String::new();
    out.push_str(&format!("文档摘要: {}\n", result.document));
    out.push_str(&format!("分析器: {}\n", result.analyzer_id));
    out.push_str(&format!("页数: {}\n", result.page_count));

    for page in &result.pages {
        out.push('\n');
        out.push_str(&format!("{}{} 页\n", PAGE_HEADING_PREFIX, page.page_number));
        for block in &page.blocks {
            for line in block.content.trim().lines() {
                if line.starts_with('#') || line.starts_with(TEXT_ESCAPE) {
                    out.push(TEXT_ESCAPE);
                }
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    out.push('\n');
    out.push_str(TABLES_HEADING);
    out.push('\n');
    if result.tables.is_empty() {
        out.push_str(EMPTY_SECTION);
        out.push('\n');
    }
    for (idx, table) in result.tables.iter().enumerate() {
        out.push_str(&format!(
            "- 表格 {}: {} 行 × {} 列 (第 {} 页)\n",
            idx + 1,
            table.row_count(),
            table.column_count(),
            table.page_number
        ));
    }

    out.push('\n');
    out.push_str(FIELDS_HEADING);
    out.push('\n');
    if result.fields.is_empty() {
        out.push_str(EMPTY_SECTION);
        out.push('\n');
    }
    for field in &result.fields {
        out.push_str(&format!(
            "- {}: {} (置信度 {:.2})\n",
            field.name, field.value, field.confidence
        ));
    }

    out.push('\n');
    out.push_str(LOW_CONFIDENCE_HEADING);
    out.push('\n');
    let mut flagged = result.low_confidence_fields(low_confidence_threshold).peekable();
    if flagged.peek().is_none() {
        out.push_str(EMPTY_SECTION);
        out.push('\n');
    }
    for field in flagged {
        out.push_str(&format!(
            "- {} {}: {} (置信度 {:.2})\n",
            LOW_CONFIDENCE_MARK, field.name, field.value, field.confidence
        ));
    }

    out
}

/// 摘要中的表格条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub index: usize,
    pub rows: usize,
    pub columns: usize,
}

/// 读回的摘要分区
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SummarySections {
    /// 页面正文（不含标题行）
    pub text_lines: Vec<String>,
    pub tables: Vec<TableEntry>,
    /// 被标记为低置信度的条目（去掉标记后的原文）
    pub low_confidence_lines: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Text,
    Tables,
    Fields,
    LowConfidence,
}

impl SummarySections {
    /// 按标题切分摘要文本
    ///
    /// 不认识的行保留在当前分区，格式被篡改时由校验器报告差异
    pub fn parse(summary: &str) -> Self {
        let mut sections = SummarySections::default();
        let mut current = Section::Header;

        for line in summary.lines() {
            if line.starts_with(PAGE_HEADING_PREFIX) {
                current = Section::Text;
                continue;
            }
            if line == TABLES_HEADING {
                current = Section::Tables;
                continue;
            }
            if line == FIELDS_HEADING {
                current = Section::Fields;
                continue;
            }
            if line == LOW_CONFIDENCE_HEADING {
                current = Section::LowConfidence;
                continue;
            }

            match current {
                Section::Header | Section::Fields => {}
                Section::Text => {
                    if !line.trim().is_empty() {
                        let line = line.strip_prefix(TEXT_ESCAPE).unwrap_or(line);
                        sections.text_lines.push(line.to_string());
                    }
                }
                Section::Tables => {
                    if let Some(caps) = TABLE_ENTRY_RE.captures(line) {
                        sections.tables.push(TableEntry {
                            index: caps[1].parse().unwrap_or(0),
                            rows: caps[2].parse().unwrap_or(0),
                            columns: caps[3].parse().unwrap_or(0),
                        });
                    }
                }
                Section::LowConfidence => {
                    if let Some(rest) = line
                        .strip_prefix("- ")
                        .and_then(|l| l.strip_prefix(LOW_CONFIDENCE_MARK))
                    {
                        sections.low_confidence_lines.push(rest.trim_start().to_string());
                    }
                }
            }
        }

        sections
    }

    /// 正文长度（不计空白字符）
    pub fn text_len(&self) -> usize {
        self.text_lines.iter().map(|l| non_whitespace_len(l)).sum()
    }

    /// 字段是否被标记为低置信度
    pub fn is_flagged(&self, field_name: &str) -> bool {
        let prefix = format!("{}:", field_name);
        self.low_confidence_lines.iter().any(|l| l.starts_with(&prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ocr_result::{Field, Page, Table, TextBlock};

    fn sample() -> OcrResult {
        OcrResult {
            document: "form.pdf".to_string(),
            analyzer_id: "prebuilt-layout".to_string(),
            page_count: 2,
            pages: vec![
                Page {
                    page_number: 1,
                    blocks: vec![
                        TextBlock { content: "Plaintiff: John Doe".to_string(), confidence: None },
                        TextBlock { content: "Court: District 4".to_string(), confidence: None },
                    ],
                },
                Page {
                    page_number: 2,
                    blocks: vec![TextBlock { content: "Signature".to_string(), confidence: Some(0.9) }],
                },
            ],
            tables: vec![Table {
                page_number: 2,
                headers: vec!["Date".to_string(), "Amount".to_string()],
                rows: vec![
                    vec!["2024-01-02".to_string(), "10".to_string()],
                    vec!["2024-02-02".to_string(), "20".to_string()],
                ],
            }],
            fields: vec![
                Field { name: "Case No".to_string(), value: "A-17".to_string(), confidence: 0.97 },
                Field { name: "Phone".to_string(), value: "555-0101".to_string(), confidence: 0.41 },
            ],
        }
    }

    #[test]
    fn test_render_layout() {
        let summary = render_summary(&sample(), 0.8);
        assert!(summary.starts_with("文档摘要: form.pdf\n"));
        assert!(summary.contains("## 第 1 页\nPlaintiff: John Doe\nCourt: District 4\n"));
        assert!(summary.contains("## 第 2 页\nSignature\n"));
        assert!(summary.contains("- 表格 1: 2 行 × 2 列 (第 2 页)"));
        assert!(summary.contains("- [低置信度] Phone: 555-0101 (置信度 0.41)"));
        assert!(!summary.contains("[低置信度] Case No"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render_summary(&sample(), 0.8);
        let b = render_summary(&sample(), 0.8);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_parse_reads_back_sections() {
        let result = sample();
        let sections = SummarySections::parse(&render_summary(&result, 0.8));
        assert_eq!(sections.text_lines.len(), 3);
        assert_eq!(sections.text_len(), result.text_len());
        assert_eq!(
            sections.tables,
            vec![TableEntry { index: 1, rows: 2, columns: 2 }]
        );
        assert!(sections.is_flagged("Phone"));
        assert!(!sections.is_flagged("Case No"));
    }

    #[test]
    fn test_empty_sections_are_marked() {
        let mut result = sample();
        result.tables.clear();
        result.fields.clear();
        let summary = render_summary(&result, 0.8);
        assert!(summary.contains("## 表格清单\n(无)\n"));
        assert!(summary.contains("## 低置信度字段\n(无)\n"));
        let sections = SummarySections::parse(&summary);
        assert!(sections.tables.is_empty());
        assert!(sections.low_confidence_lines.is_empty());
    }

    #[test]
    fn test_heading_like_text_stays_in_page_section() {
        let mut result = sample();
        result.pages[0].blocks.push(TextBlock {
            content: format!("{}\n## 第 9 页\n\\raw", TABLES_HEADING),
            confidence: None,
        });
        let summary = render_summary(&result, 0.8);
        assert!(summary.contains("\\## 表格清单\n\\## 第 9 页\n\\\\raw\n"));

        let sections = SummarySections::parse(&summary);
        assert_eq!(sections.text_lines.len(), 6);
        assert_eq!(sections.text_lines[2], TABLES_HEADING);
        assert_eq!(sections.text_lines[4], "\\raw");
        assert_eq!(sections.text_len(), result.text_len());
        assert_eq!(sections.tables.len(), 1);
        assert!(sections.is_flagged("Phone"));
    }
}
