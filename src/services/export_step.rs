//! 导出步骤 - 业务能力层
//!
//! OCR 结果 → 多工作表 xlsx（export 桶）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::infrastructure::BlobStore;
use crate::models::document::export_key;
use crate::models::{Bucket, SheetKind, Workbook};
use crate::services::load_ocr_result;
use crate::workflow::capability::{parse_input, to_output, CapabilityHandler, CREATE_EXCEL};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateExcelInput {
    ocr_result_blob_name: String,
}

/// 导出步骤输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportStepOutput {
    pub result_blob_name: String,
    pub container_name: String,
    pub table_sheets: usize,
    pub sheet_count: usize,
}

/// 导出步骤
pub struct ExportStep {
    store: Arc<dyn BlobStore>,
}

impl ExportStep {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// 读取 OCR 结果并构建工作簿模型
    pub async fn build_workbook(&self, ocr_key: &str) -> PipelineResult<Workbook> {
        let result = load_ocr_result(self.store.as_ref(), ocr_key, |k, m| PipelineError::export(k, m)).await?;
        Ok(Workbook::from_ocr_result(&result))
    }

    /// 生成并写入 xlsx
    ///
    /// # 错误
    /// - `NotFound`: OCR 结果不存在
    /// - `Export`: OCR 结果结构不合法或渲染失败
    pub async fn run(&self, ocr_key: &str) -> PipelineResult<ExportStepOutput> {
        let workbook = self.build_workbook(ocr_key).await?;
        let bytes = workbook
            .to_xlsx()
            .map_err(|e| PipelineError::export(ocr_key, e))?;

        let key = export_key(ocr_key);
        self.store.put(Bucket::Exports, &key, bytes).await?;

        let table_sheets = workbook.sheets_of(SheetKind::Table).count();
        info!(
            "[文档 {}] ✓ Excel 已生成: {} ({} 个工作表)",
            crate::models::document::document_from_ocr_key(ocr_key),
            key,
            workbook.sheets.len()
        );

        Ok(ExportStepOutput {
            result_blob_name: key,
            container_name: self.store.bucket_name(Bucket::Exports),
            table_sheets,
            sheet_count: workbook.sheets.len(),
        })
    }
}

#[async_trait]
impl CapabilityHandler for ExportStep {
    async fn call(&self, input: JsonValue) -> PipelineResult<JsonValue> {
        let input: CreateExcelInput = parse_input(CREATE_EXCEL, input)?;
        let output = self.run(&input.ocr_result_blob_name).await?;
        to_output(CREATE_EXCEL, &output)
    }
}
