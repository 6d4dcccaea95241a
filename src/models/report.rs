//! 校验报告
//!
//! 报告不落盘，只在一次工作流中传递；校验失败是正常结果而不是错误

use serde::{Deserialize, Serialize};

/// 单项差异
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// OCR 结果与摘要中的表格数量不一致
    TableCountMismatch { expected: usize, found: usize },
    /// 摘要正文覆盖率过低
    LowTextCoverage { ratio: f64, threshold: f64 },
    /// 低置信度字段没有在摘要中标记
    MissingLowConfidenceFlag { field: String },
    /// 摘要为空
    EmptySummary,
    /// 首页样本文本没有出现在摘要中
    MissingSampleText { samples: Vec<String> },
}

impl Discrepancy {
    /// 可读描述
    pub fn describe(&self) -> String {
        match self {
            Discrepancy::TableCountMismatch { expected, found } => {
                format!("表格数量不一致: OCR 结果 {} 个，摘要列出 {} 个", expected, found)
            }
            Discrepancy::LowTextCoverage { ratio, threshold } => format!(
                "正文覆盖率 {:.1}% 低于阈值 {:.1}%",
                ratio * 100.0,
                threshold * 100.0
            ),
            Discrepancy::MissingLowConfidenceFlag { field } => {
                format!("低置信度字段未在摘要中标记: {}", field)
            }
            Discrepancy::EmptySummary => "摘要为空".to_string(),
            Discrepancy::MissingSampleText { samples } => {
                format!("首页文本未出现在摘要中: {}", samples.join(" / "))
            }
        }
    }
}

/// 校验统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationChecks {
    pub expected_tables: usize,
    pub listed_tables: usize,
    pub text_coverage: f64,
    pub low_confidence_fields: usize,
    pub flagged_fields: usize,
}

/// 校验报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub discrepancies: Vec<Discrepancy>,
    pub checks: ValidationChecks,
}

impl ValidationReport {
    pub fn new(discrepancies: Vec<Discrepancy>, checks: ValidationChecks) -> Self {
        Self {
            passed: discrepancies.is_empty(),
            discrepancies,
            checks,
        }
    }

    /// 一行式概要，用于日志与对话回复
    pub fn headline(&self) -> String {
        if self.passed {
            format!(
                "校验通过 (表格 {}/{}, 覆盖率 {:.1}%)",
                self.checks.listed_tables,
                self.checks.expected_tables,
                self.checks.text_coverage * 100.0
            )
        } else {
            let details: Vec<String> = self.discrepancies.iter().map(|d| d.describe()).collect();
            format!("校验未通过: {}", details.join("; "))
        }
    }
}
