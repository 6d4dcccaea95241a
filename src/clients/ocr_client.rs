//! OCR 服务客户端
//!
//! 托管的内容理解服务：提交文档 → 轮询操作状态 → 取回结构化结果。
//! 这里只做一次调用，失败直接返回 `UpstreamService`，重试由编排层决定。

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Field, OcrResult, Page, Table, TextBlock};
use crate::utils::logging::truncate_text;

const SERVICE_NAME: &str = "ocr-service";
const OPERATION_LOCATION: &str = "operation-location";
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// OCR 请求
#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub document: String,
    pub analyzer_id: String,
    pub content: Vec<u8>,
}

/// OCR 服务抽象
#[async_trait]
pub trait OcrService: Send + Sync {
    async fn analyze(&self, request: OcrRequest) -> PipelineResult<OcrResult>;
}

/// HTTP OCR 服务
pub struct HttpOcrService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl HttpOcrService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.ocr_endpoint.trim_end_matches('/').to_string(),
            api_key: config.ocr_api_key.clone(),
            api_version: config.ocr_api_version.clone(),
            poll_interval: Duration::from_millis(config.ocr_poll_interval_ms),
            timeout: Duration::from_secs(config.ocr_timeout_secs),
        }
    }

    fn analyze_url(&self, analyzer_id: &str) -> String {
        format!(
            "{}/contentunderstanding/analyzers/{}:analyze?api-version={}",
            self.endpoint, analyzer_id, self.api_version
        )
    }

    /// 提交文档，返回操作地址
    async fn submit(&self, request: &OcrRequest) -> PipelineResult<String> {
        let url = self.analyze_url(&request.analyzer_id);
        debug!("提交 OCR: {} ({} 字节)", url, request.content.len());

        let response = self
            .client
            .post(&url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(request.content.clone())
            .send()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE_NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::upstream(
                SERVICE_NAME,
                format!("HTTP {}: {}", status, truncate_text(&body, 500)),
            ));
        }

        response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PipelineError::upstream(SERVICE_NAME, "响应缺少 Operation-Location"))
    }

    /// 轮询直到成功、失败或超时
    async fn poll(&self, operation_url: &str, document: &str) -> PipelineResult<AnalyzeResult> {
        let deadline = Instant::now() + self.timeout;

        loop {
            let response = self
                .client
                .get(operation_url)
                .header(SUBSCRIPTION_KEY_HEADER, &self.api_key)
                .send()
                .await
                .map_err(|e| PipelineError::upstream(SERVICE_NAME, e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(PipelineError::upstream(
                    SERVICE_NAME,
                    format!("轮询 HTTP {}: {}", status, truncate_text(&body, 500)),
                ));
            }

            let operation: AnalyzeOperation = response
                .json()
                .await
                .map_err(|e| PipelineError::upstream(SERVICE_NAME, format!("响应解析失败: {}", e)))?;

            match operation.status.to_ascii_lowercase().as_str() {
                "succeeded" => {
                    return operation
                        .result
                        .ok_or_else(|| PipelineError::upstream(SERVICE_NAME, "操作成功但没有结果"));
                }
                "failed" | "canceled" | "cancelled" => {
                    let detail = operation
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| operation.status.clone());
                    return Err(PipelineError::upstream(
                        SERVICE_NAME,
                        format!("分析失败: {}", truncate_text(&detail, 500)),
                    ));
                }
                other => debug!("[文档 {}] OCR 状态: {}", document, other),
            }

            if Instant::now() >= deadline {
                warn!("[文档 {}] OCR 轮询超时", document);
                return Err(PipelineError::upstream(
                    SERVICE_NAME,
                    format!("超过 {} 秒未完成", self.timeout.as_secs()),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl OcrService for HttpOcrService {
    async fn analyze(&self, request: OcrRequest) -> PipelineResult<OcrResult> {
        if self.endpoint.is_empty() {
            return Err(PipelineError::upstream(SERVICE_NAME, "未配置 OCR_ENDPOINT"));
        }

        let operation_url = self.submit(&request).await?;
        info!("[文档 {}] OCR 已提交，等待结果...", request.document);

        let result = self.poll(&operation_url, &request.document).await?;
        Ok(result.into_ocr_result(&request.document, &request.analyzer_id))
    }
}

// ========== 服务端响应结构 ==========

#[derive(Debug, Deserialize)]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    contents: Vec<AnalyzedContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzedContent {
    #[serde(default)]
    pages: Vec<AnalyzedPage>,
    #[serde(default)]
    tables: Vec<AnalyzedTable>,
    #[serde(default)]
    fields: BTreeMap<String, AnalyzedField>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzedPage {
    page_number: u32,
    #[serde(default)]
    lines: Vec<AnalyzedLine>,
}

#[derive(Debug, Deserialize)]
struct AnalyzedLine {
    content: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzedTable {
    row_count: usize,
    column_count: usize,
    #[serde(default)]
    cells: Vec<AnalyzedCell>,
    #[serde(default)]
    bounding_regions: Vec<BoundingRegion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzedCell {
    row_index: usize,
    column_index: usize,
    #[serde(default)]
    content: String,
    #[serde(default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoundingRegion {
    page_number: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzedField {
    #[serde(default)]
    value_string: Option<String>,
    #[serde(default)]
    value_number: Option<f64>,
    #[serde(default)]
    value_date: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl AnalyzedField {
    fn display_value(&self) -> String {
        self.value_string
            .clone()
            .or_else(|| self.value_date.clone())
            .or_else(|| self.value_number.map(|n| n.to_string()))
            .or_else(|| self.content.clone())
            .unwrap_or_default()
    }
}

impl AnalyzedTable {
    fn into_table(self) -> Table {
        let page_number = self.bounding_regions.first().map(|r| r.page_number).unwrap_or(1);
        let mut grid = vec![vec![String::new(); self.column_count]; self.row_count];
        let mut header_row = false;

        for cell in self.cells {
            if cell.row_index >= self.row_count || cell.column_index >= self.column_count {
                continue;
            }
            if cell.row_index == 0 && cell.kind.as_deref() == Some("columnHeader") {
                header_row = true;
            }
            grid[cell.row_index][cell.column_index] = cell.content;
        }

        if header_row && !grid.is_empty() {
            let headers = grid.remove(0);
            Table {
                page_number,
                headers,
                rows: grid,
            }
        } else {
            Table {
                page_number,
                headers: Vec::new(),
                rows: grid,
            }
        }
    }
}

impl AnalyzeResult {
    /// 转换为内部 OCR 结果
    fn into_ocr_result(self, document: &str, analyzer_id: &str) -> OcrResult {
        let mut pages = Vec::new();
        let mut tables = Vec::new();
        let mut fields = Vec::new();

        for content in self.contents {
            pages.extend(content.pages.into_iter().map(|p| Page {
                page_number: p.page_number,
                blocks: p
                    .lines
                    .into_iter()
                    .map(|l| TextBlock {
                        content: l.content,
                        confidence: l.confidence.map(|c| c.clamp(0.0, 1.0)),
                    })
                    .collect(),
            }));
            tables.extend(content.tables.into_iter().map(AnalyzedTable::into_table));
            fields.extend(content.fields.into_iter().map(|(name, field)| Field {
                value: field.display_value(),
                // 服务端未给出置信度时视为完全可信
                confidence: field.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
                name,
            }));
        }

        OcrResult {
            document: document.to_string(),
            analyzer_id: analyzer_id.to_string(),
            page_count: pages.len() as u32,
            pages,
            tables,
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "status": "Succeeded",
        "result": {
            "contents": [{
                "markdown": "ignored",
                "pages": [
                    {"pageNumber": 1, "lines": [{"content": "CLAIM FORM"}, {"content": "Name: Jane Roe"}]},
                    {"pageNumber": 2, "lines": [{"content": "Signed", "confidence": 0.93}]}
                ],
                "tables": [{
                    "rowCount": 3,
                    "columnCount": 2,
                    "boundingRegions": [{"pageNumber": 2}],
                    "cells": [
                        {"rowIndex": 0, "columnIndex": 0, "content": "Item", "kind": "columnHeader"},
                        {"rowIndex": 0, "columnIndex": 1, "content": "Cost", "kind": "columnHeader"},
                        {"rowIndex": 1, "columnIndex": 0, "content": "MRI"},
                        {"rowIndex": 1, "columnIndex": 1, "content": "900"},
                        {"rowIndex": 2, "columnIndex": 0, "content": "X-ray"},
                        {"rowIndex": 9, "columnIndex": 0, "content": "out of range"}
                    ]
                }],
                "fields": {
                    "Total": {"type": "number", "valueNumber": 1020, "confidence": 0.62},
                    "Patient": {"type": "string", "valueString": "Jane Roe"}
                }
            }]
        }
    }"#;

    #[test]
    fn test_operation_converts_to_ocr_result() {
        let operation: AnalyzeOperation = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(operation.status, "Succeeded");

        let result = operation
            .result
            .unwrap()
            .into_ocr_result("claim.png", "prebuilt-layout");

        assert_eq!(result.page_count, 2);
        assert_eq!(result.pages[0].blocks[1].content, "Name: Jane Roe");
        assert_eq!(result.pages[1].blocks[0].confidence, Some(0.93));

        let table = &result.tables[0];
        assert_eq!(table.page_number, 2);
        assert_eq!(table.headers, vec!["Item".to_string(), "Cost".to_string()]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["X-ray".to_string(), String::new()]);

        // BTreeMap 保证字段按名称排序
        assert_eq!(result.fields[0].name, "Patient");
        assert_eq!(result.fields[0].confidence, 1.0);
        assert_eq!(result.fields[1].value, "1020");
        assert!(result.check().is_ok());
    }

    #[test]
    fn test_table_without_header_keeps_all_rows() {
        let table = AnalyzedTable {
            row_count: 2,
            column_count: 1,
            cells: vec![
                AnalyzedCell { row_index: 0, column_index: 0, content: "a".to_string(), kind: None },
                AnalyzedCell { row_index: 1, column_index: 0, content: "b".to_string(), kind: None },
            ],
            bounding_regions: vec![],
        }
        .into_table();
        assert!(table.headers.is_empty());
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.page_number, 1);
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_upstream_error() {
        let service = HttpOcrService::new(&Config::default());
        let err = service
            .analyze(OcrRequest {
                document: "a.png".to_string(),
                analyzer_id: "prebuilt-layout".to_string(),
                content: vec![1, 2, 3],
            })
            .await
            .unwrap_err();
        assert!(err.is_upstream());
    }

    /// 测试真实 OCR 服务连通性
    ///
    /// 运行方式：
    /// ```bash
    /// OCR_ENDPOINT=... OCR_API_KEY=... cargo test test_live_ocr -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_live_ocr() {
        let _ = tracing_subscriber::fmt::try_init();
        let config = Config::from_env();
        let service = HttpOcrService::new(&config);
        let content = std::fs::read("sample.png").expect("需要在当前目录放置 sample.png");

        let result = service
            .analyze(OcrRequest {
                document: "sample.png".to_string(),
                analyzer_id: config.ocr_analyzer_id.clone(),
                content,
            })
            .await
            .expect("OCR 调用失败");
        println!("页数: {}, 表格: {}", result.page_count, result.tables.len());
        assert!(result.page_count > 0);
    }
}
