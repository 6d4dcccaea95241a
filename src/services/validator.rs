//! 校验器 - 业务能力层
//!
//! 比较 OCR 结果与摘要，输出校验报告。校验只读不写；同样的输入总是得到同样的报告。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::infrastructure::BlobStore;
use crate::models::document::document_from_ocr_key;
use crate::models::{Bucket, Discrepancy, OcrResult, SummarySections, ValidationChecks, ValidationReport};
use crate::services::load_ocr_result;
use crate::workflow::capability::{parse_input, to_output, CapabilityHandler, VALIDATE};

/// 参与抽样比对的首页文本块数
const SAMPLE_BLOCKS: usize = 3;

/// 校验阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// 摘要正文 / OCR 文本的最低覆盖率
    pub min_text_coverage: f64,
    /// 低于该置信度的字段必须被标记
    pub low_confidence: f64,
}

impl Thresholds {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_text_coverage: config.min_text_coverage,
            low_confidence: config.low_confidence_threshold,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_text_coverage: 0.5,
            low_confidence: 0.8,
        }
    }
}

/// 校验 OCR 结果与摘要
pub fn validate(result: &OcrResult, summary: &str, thresholds: Thresholds) -> ValidationReport {
    let mut discrepancies = Vec::new();

    if summary.trim().is_empty() {
        discrepancies.push(Discrepancy::EmptySummary);
    }

    let sections = SummarySections::parse(summary);

    let expected_tables = result.tables.len();
    let listed_tables = sections.tables.len();
    if expected_tables != listed_tables {
        discrepancies.push(Discrepancy::TableCountMismatch {
            expected: expected_tables,
            found: listed_tables,
        });
    }

    let ocr_len = result.text_len();
    let text_coverage = if ocr_len == 0 {
        1.0
    } else {
        sections.text_len() as f64 / ocr_len as f64
    };
    if text_coverage < thresholds.min_text_coverage {
        discrepancies.push(Discrepancy::LowTextCoverage {
            ratio: text_coverage,
            threshold: thresholds.min_text_coverage,
        });
    }

    let low_confidence: Vec<&str> = result
        .low_confidence_fields(thresholds.low_confidence)
        .map(|f| f.name.as_str())
        .collect();
    let mut flagged_fields = 0;
    for name in &low_confidence {
        if sections.is_flagged(name) {
            flagged_fields += 1;
        } else {
            discrepancies.push(Discrepancy::MissingLowConfidenceFlag {
                field: name.to_string(),
            });
        }
    }

    // 抽样：首页前几个文本块至少有一个出现在摘要里
    let samples: Vec<String> = result
        .pages
        .first()
        .map(|page| {
            page.blocks
                .iter()
                .map(|b| b.content.trim())
                .filter(|c| !c.is_empty())
                .take(SAMPLE_BLOCKS)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if !samples.is_empty() {
        let haystack = summary.to_lowercase();
        if !samples.iter().any(|s| haystack.contains(&s.to_lowercase())) {
            discrepancies.push(Discrepancy::MissingSampleText { samples });
        }
    }

    ValidationReport::new(
        discrepancies,
        ValidationChecks {
            expected_tables,
            listed_tables,
            text_coverage,
            low_confidence_fields: low_confidence.len(),
            flagged_fields,
        },
    )
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ValidateInput {
    ocr_result_blob_name: String,
    summary_blob_name: String,
}

/// 校验器
pub struct Validator {
    store: Arc<dyn BlobStore>,
    thresholds: Thresholds,
}

impl Validator {
    pub fn new(store: Arc<dyn BlobStore>, config: &Config) -> Self {
        Self {
            store,
            thresholds: Thresholds::from_config(config),
        }
    }

    /// 读取两份对象并校验
    ///
    /// # 错误
    /// - `NotFound`: 任一对象不存在
    /// - `Parse`: OCR 结果结构不合法
    pub async fn run(&self, ocr_key: &str, summary_key: &str) -> PipelineResult<ValidationReport> {
        let document = document_from_ocr_key(ocr_key);
        let result = load_ocr_result(self.store.as_ref(), ocr_key, |k, m| PipelineError::parse(k, m)).await?;
        let summary_bytes = self.store.get(Bucket::Summaries, summary_key).await?;
        let summary = String::from_utf8_lossy(&summary_bytes);

        let report = validate(&result, &summary, self.thresholds);
        if report.passed {
            info!("[文档 {}] ✓ {}", document, report.headline());
        } else {
            warn!("[文档 {}] ⚠️ {}", document, report.headline());
        }
        Ok(report)
    }
}

#[async_trait]
impl CapabilityHandler for Validator {
    async fn call(&self, input: JsonValue) -> PipelineResult<JsonValue> {
        let input: ValidateInput = parse_input(VALIDATE, input)?;
        let report = self
            .run(&input.ocr_result_blob_name, &input.summary_blob_name)
            .await?;
        to_output(VALIDATE, &report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MemoryBlobStore;
    use crate::models::{render_summary, Field, Page, Table, TextBlock};

    fn sample() -> OcrResult {
        OcrResult {
            document: "claim.jpg".to_string(),
            analyzer_id: "prebuilt-layout".to_string(),
            page_count: 1,
            pages: vec![Page {
                page_number: 1,
                blocks: vec![
                    TextBlock { content: "Claim Form".to_string(), confidence: None },
                    TextBlock { content: "Policy holder: Jane Roe".to_string(), confidence: None },
                ],
            }],
            tables: vec![Table {
                page_number: 1,
                headers: vec!["Item".to_string(), "Cost".to_string()],
                rows: vec![vec!["Glass".to_string(), "120".to_string()]],
            }],
            fields: vec![Field {
                name: "Policy No".to_string(),
                value: "P-9".to_string(),
                confidence: 0.55,
            }],
        }
    }

    #[test]
    fn test_rendered_summary_passes() {
        let result = sample();
        let report = validate(&result, &render_summary(&result, 0.8), Thresholds::default());
        assert!(report.passed, "{:?}", report.discrepancies);
        assert_eq!(report.checks.flagged_fields, 1);
        assert!((report.checks.text_coverage - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_table_is_reported() {
        let result = sample();
        let summary = render_summary(&result, 0.8).replace("- 表格 1: 1 行 × 2 列 (第 1 页)\n", "");
        let report = validate(&result, &summary, Thresholds::default());
        assert!(!report.passed);
        assert!(report
            .discrepancies
            .contains(&Discrepancy::TableCountMismatch { expected: 1, found: 0 }));
    }

    #[test]
    fn test_unflagged_low_confidence_field() {
        let result = sample();
        // 以更低的阈值渲染，Policy No 不会被标记
        let summary = render_summary(&result, 0.5);
        let report = validate(&result, &summary, Thresholds::default());
        assert!(report.discrepancies.contains(&Discrepancy::MissingLowConfidenceFlag {
            field: "Policy No".to_string()
        }));
    }

    #[test]
    fn test_empty_summary() {
        let report = validate(&sample(), "", Thresholds::default());
        assert!(report.discrepancies.contains(&Discrepancy::EmptySummary));
        assert!(report
            .discrepancies
            .iter()
            .any(|d| matches!(d, Discrepancy::LowTextCoverage { .. })));
        assert!(report
            .discrepancies
            .iter()
            .any(|d| matches!(d, Discrepancy::MissingSampleText { .. })));
    }

    #[test]
    fn test_empty_ocr_text_counts_as_full_coverage() {
        let mut result = sample();
        result.pages[0].blocks.clear();
        let report = validate(&result, &render_summary(&result, 0.8), Thresholds::default());
        assert!(report.passed);
        assert_eq!(report.checks.text_coverage, 1.0);
    }

    #[test]
    fn test_is_deterministic() {
        let result = sample();
        let summary = render_summary(&result, 0.5);
        assert_eq!(
            validate(&result, &summary, Thresholds::default()),
            validate(&result, &summary, Thresholds::default())
        );
    }

    #[tokio::test]
    async fn test_missing_summary_is_not_found() {
        let store = Arc::new(MemoryBlobStore::new());
        store
            .put(Bucket::Enhanced, "claim.jpg.ocr.json", sample().to_json_vec().unwrap())
            .await
            .unwrap();
        let validator = Validator::new(store, &Config::default());
        let err = validator
            .run("claim.jpg.ocr.json", "claim.jpg.summary.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }
}
