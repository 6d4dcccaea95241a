use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::models::BucketNames;

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "docflow.toml";

/// 程序配置
///
/// 加载顺序：默认值 → TOML 配置文件（可选）→ 环境变量
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 存储配置 ---
    /// 存储后端: "fs" 或 "memory"
    pub storage_backend: String,
    /// 文件系统存储根目录
    pub storage_root: String,
    pub incoming_container: String,
    pub enhanced_container: String,
    pub summary_container: String,
    pub export_container: String,
    pub archive_container: String,
    // --- OCR 服务配置 ---
    pub ocr_endpoint: String,
    pub ocr_api_key: String,
    pub ocr_api_version: String,
    pub ocr_analyzer_id: String,
    /// 轮询间隔（毫秒）
    pub ocr_poll_interval_ms: u64,
    /// 单次 OCR 调用的总超时（秒）
    pub ocr_timeout_secs: u64,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    // --- 工作流配置 ---
    /// OCR 的最大重试次数（校验失败与上游错误分别计数）
    pub max_ocr_retries: u32,
    /// 摘要文本覆盖率下限
    pub min_text_coverage: f64,
    /// 低置信度阈值（低于该值的字段需要在摘要中标记）
    pub low_confidence_threshold: f64,
    /// 同时处理的文档数量
    pub max_concurrent_documents: usize,
    /// 查询时提供给 LLM 的上下文字符上限
    pub query_context_chars: usize,
    /// 查询时附带的最近对话消息条数
    pub query_history_messages: usize,
    // --- 日志配置 ---
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_backend: "fs".to_string(),
            storage_root: "blob_storage".to_string(),
            incoming_container: "incoming-docs".to_string(),
            enhanced_container: "enhanced-results".to_string(),
            summary_container: "summary-reports".to_string(),
            export_container: "excel-result".to_string(),
            archive_container: "processed-docs".to_string(),
            ocr_endpoint: String::new(),
            ocr_api_key: String::new(),
            ocr_api_version: "2025-11-01".to_string(),
            ocr_analyzer_id: "prebuilt-layout".to_string(),
            ocr_poll_interval_ms: 1000,
            ocr_timeout_secs: 300,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            max_ocr_retries: 1,
            min_text_coverage: 0.5,
            low_confidence_threshold: 0.8,
            max_concurrent_documents: 4,
            query_context_chars: 12_000,
            query_history_messages: 20,
            verbose_logging: false,
            output_log_file: "docflow_session.log".to_string(),
        }
    }
}

impl Config {
    /// 加载配置：配置文件（如存在）叠加环境变量
    pub fn load() -> Result<Self> {
        let path = std::env::var("DOCFLOW_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let base = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        Ok(base.with_env_overrides())
    }

    /// 从 TOML 文件加载，缺失的字段使用默认值
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("无法解析配置文件: {}", path.display()))
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// 仅使用默认值 + 环境变量
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 用环境变量覆盖当前配置
    pub fn with_env_overrides(self) -> Self {
        Self {
            storage_backend: env_string("STORAGE_BACKEND", self.storage_backend),
            storage_root: env_string("STORAGE_ROOT", self.storage_root),
            incoming_container: env_string("INCOMING_CONTAINER", self.incoming_container),
            enhanced_container: env_string("ENHANCED_CONTAINER", self.enhanced_container),
            summary_container: env_string("SUMMARY_CONTAINER", self.summary_container),
            export_container: env_string("EXPORT_CONTAINER", self.export_container),
            archive_container: env_string("ARCHIVE_CONTAINER", self.archive_container),
            ocr_endpoint: env_string("OCR_ENDPOINT", self.ocr_endpoint),
            ocr_api_key: env_string("OCR_API_KEY", self.ocr_api_key),
            ocr_api_version: env_string("OCR_API_VERSION", self.ocr_api_version),
            ocr_analyzer_id: env_string("OCR_ANALYZER_ID", self.ocr_analyzer_id),
            ocr_poll_interval_ms: env_parsed("OCR_POLL_INTERVAL_MS", self.ocr_poll_interval_ms),
            ocr_timeout_secs: env_parsed("OCR_TIMEOUT_SECS", self.ocr_timeout_secs),
            llm_api_key: env_string("LLM_API_KEY", self.llm_api_key),
            llm_api_base_url: env_string("LLM_API_BASE_URL", self.llm_api_base_url),
            llm_model_name: env_string("LLM_MODEL_NAME", self.llm_model_name),
            max_ocr_retries: env_parsed("MAX_OCR_RETRIES", self.max_ocr_retries),
            min_text_coverage: env_parsed("MIN_TEXT_COVERAGE", self.min_text_coverage),
            low_confidence_threshold: env_parsed("LOW_CONFIDENCE_THRESHOLD", self.low_confidence_threshold),
            max_concurrent_documents: env_parsed("MAX_CONCURRENT_DOCUMENTS", self.max_concurrent_documents),
            query_context_chars: env_parsed("QUERY_CONTEXT_CHARS", self.query_context_chars),
            query_history_messages: env_parsed("QUERY_HISTORY_MESSAGES", self.query_history_messages),
            verbose_logging: env_parsed("VERBOSE_LOGGING", self.verbose_logging),
            output_log_file: env_string("OUTPUT_LOG_FILE", self.output_log_file),
        }
    }

    /// 各阶段容器名称
    pub fn bucket_names(&self) -> BucketNames {
        BucketNames {
            incoming: self.incoming_container.clone(),
            enhanced: self.enhanced_container.clone(),
            summaries: self.summary_container.clone(),
            exports: self.export_container.clone(),
            archived: self.archive_container.clone(),
        }
    }
}

fn env_string(var: &str, fallback: String) -> String {
    std::env::var(var).unwrap_or(fallback)
}

fn env_parsed<T: std::str::FromStr>(var: &str, fallback: T) -> T {
    std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(fallback)
}
