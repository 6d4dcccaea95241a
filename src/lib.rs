//! # Docflow
//!
//! 文档处理工作流：OCR → 解析 → 校验 → 导出 → 归档，并支持基于处理结果的问答
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 对象存储，只暴露按键读写删的能力
//! - `FsBlobStore` - 每个桶一个目录，临时文件 + rename 保证原子写
//! - `MemoryBlobStore` - 内存实现，用于试运行和测试
//!
//! ### ② 外部客户端（Clients）
//! - `HttpOcrService` - 托管的内容理解服务（提交 + 轮询）
//! - `LlmClient` - 兼容 OpenAI API 的聊天接口
//!
//! ### ③ 业务能力层（Services）
//! - `services/` - 每个步骤一个能力，只处理单个文档
//! - `OcrStep` / `ParseStep` / `ExportStep` / `ArchiveStep` / `Validator`
//! - `Inspector` - 只读内容查询，`QueryService` - 问答
//!
//! ### ④ 流程层（Workflow）
//! - `CapabilityRegistry` - 能力名称 → {描述, 输入 schema, 处理器}
//! - `decide` - 纯函数状态机，`DocumentFlow` - 驱动单个文档到终态
//!
//! ### ⑤ 编排层（Orchestration）
//! - `Session` - 显式会话，持有对话线程与处理记录
//! - `batch_processor` - 多文档并发处理
//! - `App` - 交互式控制台

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{BlobError, PipelineError, PipelineResult};
pub use infrastructure::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use orchestrator::{App, Session};
pub use workflow::{standard_registry, CapabilityRegistry, DocumentFlow, DocumentRun, RunPolicy, WorkflowState};
