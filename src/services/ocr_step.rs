//! OCR 步骤 - 业务能力层
//!
//! incoming 桶中的文档 → OCR 服务 → enhanced 桶中的结构化结果。
//! 不删除源文档，不做重试。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clients::{OcrRequest, OcrService};
use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::infrastructure::BlobStore;
use crate::models::document::ocr_result_key;
use crate::models::Bucket;
use crate::workflow::capability::{parse_input, to_output, CapabilityHandler, PERFORM_OCR};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PerformOcrInput {
    blob_name: String,
    #[serde(default)]
    analyzer_id: Option<String>,
}

/// OCR 步骤输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrStepOutput {
    pub result_blob_name: String,
    pub container_name: String,
}

/// OCR 步骤
pub struct OcrStep {
    store: Arc<dyn BlobStore>,
    ocr: Arc<dyn OcrService>,
    default_analyzer: String,
}

impl OcrStep {
    pub fn new(store: Arc<dyn BlobStore>, ocr: Arc<dyn OcrService>, config: &Config) -> Self {
        Self {
            store,
            ocr,
            default_analyzer: config.ocr_analyzer_id.clone(),
        }
    }

    /// 对单个文档执行 OCR
    ///
    /// # 错误
    /// - `NotFound`: incoming 桶中没有该文档
    /// - `UpstreamService`: OCR 服务或存储写入失败
    pub async fn run(&self, document: &str, analyzer_id: Option<&str>) -> PipelineResult<OcrStepOutput> {
        let analyzer_id = analyzer_id.unwrap_or(&self.default_analyzer).to_string();
        info!("[文档 {}] 🔍 开始 OCR (分析器: {})", document, analyzer_id);

        let content = self.store.get(Bucket::Incoming, document).await?;
        debug!("[文档 {}] 原始文档 {} 字节", document, content.len());

        let result = self
            .ocr
            .analyze(OcrRequest {
                document: document.to_string(),
                analyzer_id,
                content,
            })
            .await?;

        let key = ocr_result_key(document);
        let bytes = result
            .to_json_vec()
            .map_err(|e| PipelineError::parse(&key, e))?;
        self.store.put(Bucket::Enhanced, &key, bytes).await?;

        info!(
            "[文档 {}] ✓ OCR 完成: {} 页, {} 个表格, {} 个字段",
            document,
            result.page_count,
            result.tables.len(),
            result.fields.len()
        );

        Ok(OcrStepOutput {
            result_blob_name: key,
            container_name: self.store.bucket_name(Bucket::Enhanced),
        })
    }
}

#[async_trait]
impl CapabilityHandler for OcrStep {
    async fn call(&self, input: JsonValue) -> PipelineResult<JsonValue> {
        let input: PerformOcrInput = parse_input(PERFORM_OCR, input)?;
        let output = self.run(&input.blob_name, input.analyzer_id.as_deref()).await?;
        to_output(PERFORM_OCR, &output)
    }
}
