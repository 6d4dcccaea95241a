//! 内容读取能力
//!
//! 查询路径通过这两个能力读取 OCR 结果和摘要，不直接访问存储。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::infrastructure::BlobStore;
use crate::models::{Bucket, OcrResult};
use crate::workflow::capability::{
    parse_input, to_output, CapabilityHandler, GET_OCR_RESULT_CONTENT, GET_PARSED_SUMMARY_CONTENT,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OcrContentInput {
    ocr_result_blob_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SummaryContentInput {
    summary_blob_name: String,
}

/// OCR 结果内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrContent {
    pub content: OcrResult,
    pub pages: u32,
    pub table_count: usize,
    pub field_count: usize,
    pub content_size_bytes: usize,
}

/// 摘要内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryContent {
    pub content: String,
    pub line_count: usize,
    pub char_count: usize,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    OcrResults,
    Summaries,
}

/// 只读的内容读取器
pub struct Inspector {
    store: Arc<dyn BlobStore>,
    target: Target,
}

impl Inspector {
    /// 读取 enhanced 桶中的 OCR 结果
    pub fn ocr_results(store: Arc<dyn BlobStore>) -> Self {
        Self { store, target: Target::OcrResults }
    }

    /// 读取 summary 桶中的摘要
    pub fn summaries(store: Arc<dyn BlobStore>) -> Self {
        Self { store, target: Target::Summaries }
    }

    pub async fn ocr_content(&self, key: &str) -> PipelineResult<OcrContent> {
        let bytes = self.store.get(Bucket::Enhanced, key).await?;
        let content = OcrResult::from_json_slice(&bytes).map_err(|e| PipelineError::parse(key, e))?;
        debug!("读取 OCR 结果 {} ({} 字节)", key, bytes.len());

        Ok(OcrContent {
            pages: content.page_count,
            table_count: content.tables.len(),
            field_count: content.fields.len(),
            content_size_bytes: bytes.len(),
            content,
        })
    }

    pub async fn summary_content(&self, key: &str) -> PipelineResult<SummaryContent> {
        let bytes = self.store.get(Bucket::Summaries, key).await?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        debug!("读取摘要 {} ({} 字节)", key, bytes.len());

        Ok(SummaryContent {
            line_count: content.lines().count(),
            char_count: content.chars().count(),
            content,
        })
    }
}

#[async_trait]
impl CapabilityHandler for Inspector {
    async fn call(&self, input: JsonValue) -> PipelineResult<JsonValue> {
        match self.target {
            Target::OcrResults => {
                let input: OcrContentInput = parse_input(GET_OCR_RESULT_CONTENT, input)?;
                let output = self.ocr_content(&input.ocr_result_blob_name).await?;
                to_output(GET_OCR_RESULT_CONTENT, &output)
            }
            Target::Summaries => {
                let input: SummaryContentInput = parse_input(GET_PARSED_SUMMARY_CONTENT, input)?;
                let output = self.summary_content(&input.summary_blob_name).await?;
                to_output(GET_PARSED_SUMMARY_CONTENT, &output)
            }
        }
    }
}
