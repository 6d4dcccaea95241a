use thiserror::Error;

/// 存储层错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlobError {
    /// 对象不存在
    #[error("对象不存在: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// 非法的对象键
    #[error("非法的对象键: {0}")]
    InvalidKey(String),

    /// 底层 IO 失败
    #[error("存储 IO 错误: {0}")]
    Io(String),
}

/// 流水线错误
///
/// 所有步骤、能力注册表和工作流共用同一套错误分类。
/// 实现 `Clone`，便于状态机把错误记录在 `DocumentRun` 上。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// 引用的对象不存在（不重试，直接返回给调用方）
    #[error("对象不存在: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// 外部服务调用失败（OCR 可按状态机重试一次）
    #[error("上游服务调用失败 ({service}): {message}")]
    UpstreamService { service: String, message: String },

    /// 中间数据格式错误
    #[error("OCR 结果解析失败 ({key}): {message}")]
    Parse { key: String, message: String },

    /// 导出失败
    #[error("导出失败 ({key}): {message}")]
    Export { key: String, message: String },

    /// 能力调用参数不符合 schema
    #[error("能力 {capability} 参数不合法: {message}")]
    InvalidInput { capability: String, message: String },

    /// 未注册的能力
    #[error("未知能力: {0}")]
    UnknownCapability(String),

    /// 校验未通过且没有覆盖标记时禁止归档
    #[error("校验未通过，禁止归档: {document}")]
    ArchiveBlocked { document: String },

    /// 校验失败且重试次数已用尽
    #[error("校验失败且重试次数已用尽 ({document}): {discrepancies} 项差异")]
    ValidationExhausted { document: String, discrepancies: usize },

    /// 状态机步数超限
    #[error("工作流超出最大步数: {document}")]
    StepLimit { document: String },
}

impl PipelineError {
    /// 存储错误映射到流水线错误
    ///
    /// `NotFound` 保持原样，其余一律视为存储服务（上游）失败
    pub fn from_blob(err: BlobError) -> Self {
        match err {
            BlobError::NotFound { bucket, key } => PipelineError::NotFound { bucket, key },
            BlobError::InvalidKey(key) => PipelineError::InvalidInput {
                capability: "blob-store".to_string(),
                message: format!("非法的对象键: {}", key),
            },
            BlobError::Io(message) => PipelineError::UpstreamService {
                service: "blob-store".to_string(),
                message,
            },
        }
    }

    /// 创建上游服务错误
    pub fn upstream(service: impl Into<String>, message: impl ToString) -> Self {
        PipelineError::UpstreamService {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// 创建解析错误
    pub fn parse(key: impl Into<String>, message: impl ToString) -> Self {
        PipelineError::Parse {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// 创建导出错误
    pub fn export(key: impl Into<String>, message: impl ToString) -> Self {
        PipelineError::Export {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// 是否为上游服务错误
    pub fn is_upstream(&self) -> bool {
        matches!(self, PipelineError::UpstreamService { .. })
    }
}

impl From<BlobError> for PipelineError {
    fn from(err: BlobError) -> Self {
        PipelineError::from_blob(err)
    }
}

/// 流水线结果类型
pub type PipelineResult<T> = Result<T, PipelineError>;
