//! 归档步骤 - 业务能力层
//!
//! 把原始文档从 incoming 桶移动到归档桶：先复制，确认写入成功后才删除源文档。
//! 复制失败时源文档保持不变。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{BlobError, PipelineError, PipelineResult};
use crate::infrastructure::BlobStore;
use crate::models::Bucket;
use crate::workflow::capability::{parse_input, to_output, CapabilityHandler, CLEAN_UP};

const SERVICE_NAME: &str = "blob-store";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CleanUpInput {
    incoming_docs_blob_name: String,
}

/// 归档步骤输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStepOutput {
    pub archived_blob_name: String,
    pub container_name: String,
}

/// 归档步骤
pub struct ArchiveStep {
    store: Arc<dyn BlobStore>,
}

impl ArchiveStep {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// 移动文档
    ///
    /// # 错误
    /// - `NotFound`: incoming 桶中没有该文档
    /// - `UpstreamService`: 复制或删除失败
    pub async fn run(&self, document: &str) -> PipelineResult<ArchiveStepOutput> {
        info!("[文档 {}] 🗄️ 归档原始文档...", document);

        let content = self.store.get(Bucket::Incoming, document).await?;

        self.store
            .put(Bucket::Archived, document, content)
            .await
            .map_err(|e| copy_failed(document, e))?;

        // 删除前确认目标已落盘
        let confirmed = self
            .store
            .exists(Bucket::Archived, document)
            .await
            .map_err(|e| copy_failed(document, e))?;
        if !confirmed {
            return Err(PipelineError::upstream(
                SERVICE_NAME,
                format!("归档副本未确认: {}", document),
            ));
        }

        match self.store.delete(Bucket::Incoming, document).await {
            Ok(true) => {}
            Ok(false) => warn!("[文档 {}] ⚠️ 源文档已不存在，跳过删除", document),
            Err(e) => {
                return Err(PipelineError::upstream(
                    SERVICE_NAME,
                    format!("已归档但删除源文档失败 ({}): {}", document, e),
                ));
            }
        }

        info!("[文档 {}] ✓ 已移动到 {}", document, self.store.bucket_name(Bucket::Archived));

        Ok(ArchiveStepOutput {
            archived_blob_name: document.to_string(),
            container_name: self.store.bucket_name(Bucket::Archived),
        })
    }
}

fn copy_failed(document: &str, err: BlobError) -> PipelineError {
    PipelineError::upstream(SERVICE_NAME, format!("复制 {} 到归档桶失败: {}", document, err))
}

#[async_trait]
impl CapabilityHandler for ArchiveStep {
    async fn call(&self, input: JsonValue) -> PipelineResult<JsonValue> {
        let input: CleanUpInput = parse_input(CLEAN_UP, input)?;
        let output = self.run(&input.incoming_docs_blob_name).await?;
        to_output(CLEAN_UP, &output)
    }
}
