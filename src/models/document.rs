//! 文档与存储桶
//!
//! 文档以名称标识，在各个存储桶之间流转；所有派生对象的键都由文档名推导

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// OCR 结果键后缀
pub const OCR_RESULT_SUFFIX: &str = ".ocr.json";
/// 摘要键后缀
pub const SUMMARY_SUFFIX: &str = ".summary.txt";
/// 导出文件键后缀
pub const EXPORT_SUFFIX: &str = ".xlsx";

/// 流水线各阶段对应的存储桶
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// 待处理的原始文档
    Incoming,
    /// OCR 结构化结果
    Enhanced,
    /// 文本摘要
    Summaries,
    /// 表格导出
    Exports,
    /// 已归档的原始文档
    Archived,
}

impl Bucket {
    pub const ALL: [Bucket; 5] = [
        Bucket::Incoming,
        Bucket::Enhanced,
        Bucket::Summaries,
        Bucket::Exports,
        Bucket::Archived,
    ];
}

/// 存储桶名称映射（对应云端容器名）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNames {
    pub incoming: String,
    pub enhanced: String,
    pub summaries: String,
    pub exports: String,
    pub archived: String,
}

impl BucketNames {
    pub fn name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Incoming => &self.incoming,
            Bucket::Enhanced => &self.enhanced,
            Bucket::Summaries => &self.summaries,
            Bucket::Exports => &self.exports,
            Bucket::Archived => &self.archived,
        }
    }
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            incoming: "incoming-docs".to_string(),
            enhanced: "enhanced-results".to_string(),
            summaries: "summary-reports".to_string(),
            exports: "excel-result".to_string(),
            archived: "processed-docs".to_string(),
        }
    }
}

/// 文档生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStage {
    Incoming,
    Enhanced,
    Summarized,
    Exported,
    Archived,
}

impl Display for DocumentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DocumentStage::Incoming => "待处理",
            DocumentStage::Enhanced => "已识别",
            DocumentStage::Summarized => "已摘要",
            DocumentStage::Exported => "已导出",
            DocumentStage::Archived => "已归档",
        };
        f.write_str(name)
    }
}

/// OCR 结果键：文档名 + 固定后缀
pub fn ocr_result_key(document: &str) -> String {
    format!("{}{}", document, OCR_RESULT_SUFFIX)
}

/// 从 OCR 结果键还原文档名
pub fn document_from_ocr_key(ocr_key: &str) -> &str {
    ocr_key.strip_suffix(OCR_RESULT_SUFFIX).unwrap_or(ocr_key)
}

/// 摘要键（由 OCR 结果键推导）
pub fn summary_key(ocr_key: &str) -> String {
    format!("{}{}", document_from_ocr_key(ocr_key), SUMMARY_SUFFIX)
}

/// 导出文件键（由 OCR 结果键推导）
pub fn export_key(ocr_key: &str) -> String {
    format!("{}{}", document_from_ocr_key(ocr_key), EXPORT_SUFFIX)
}

/// 检查对象键是否合法：非空、无路径分隔符、不含 `..`
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
        && !key.starts_with('.')
        && !key.contains('/')
        && !key.contains('\\')
        && !key.contains("..")
}
