//! 解析步骤 - 业务能力层
//!
//! OCR 结果 → 文本摘要（summary 桶）。摘要只由 OCR 结果决定，重复执行结果一致。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::infrastructure::BlobStore;
use crate::models::document::summary_key;
use crate::models::{render_summary, Bucket};
use crate::services::load_ocr_result;
use crate::workflow::capability::{parse_input, to_output, CapabilityHandler, PARSE_OCR};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParseOcrInput {
    ocr_result_blob_name: String,
}

/// 解析步骤输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStepOutput {
    pub summary_report_blob_name: String,
    pub summary_container_name: String,
}

/// 解析步骤
pub struct ParseStep {
    store: Arc<dyn BlobStore>,
    low_confidence_threshold: f64,
}

impl ParseStep {
    pub fn new(store: Arc<dyn BlobStore>, config: &Config) -> Self {
        Self {
            store,
            low_confidence_threshold: config.low_confidence_threshold,
        }
    }

    /// 生成摘要
    ///
    /// # 错误
    /// - `NotFound`: OCR 结果不存在
    /// - `Parse`: OCR 结果结构不合法
    pub async fn run(&self, ocr_key: &str) -> PipelineResult<ParseStepOutput> {
        let result = load_ocr_result(self.store.as_ref(), ocr_key, |k, m| PipelineError::parse(k, m)).await?;
        let summary = render_summary(&result, self.low_confidence_threshold);

        let key = summary_key(ocr_key);
        self.store
            .put(Bucket::Summaries, &key, summary.into_bytes())
            .await?;

        info!("[文档 {}] ✓ 摘要已生成: {}", result.document, key);

        Ok(ParseStepOutput {
            summary_report_blob_name: key,
            summary_container_name: self.store.bucket_name(Bucket::Summaries),
        })
    }
}

#[async_trait]
impl CapabilityHandler for ParseStep {
    async fn call(&self, input: JsonValue) -> PipelineResult<JsonValue> {
        let input: ParseOcrInput = parse_input(PARSE_OCR, input)?;
        let output = self.run(&input.ocr_result_blob_name).await?;
        to_output(PARSE_OCR, &output)
    }
}
