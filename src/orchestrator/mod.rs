//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `session` - 会话
//! - 显式打开 / 关闭，持有对话线程
//! - 把用户请求路由到文档处理或查询路径
//!
//! ### `batch_processor` - 批量文档处理器
//! - 控制并发数量（Semaphore）
//! - 输出全局统计信息
//!
//! ### `app` - 交互式控制台
//! - 创建存储、OCR、LLM 等外部资源
//!
//! ## 层次关系
//!
//! ```text
//! app → session
//!         ↓
//! batch_processor (处理 Vec<文档>)
//!         ↓
//! workflow::DocumentFlow (处理单个文档)
//!         ↓
//! services (能力层：ocr / parse / validate / export / archive)
//!         ↓
//! infrastructure (基础设施：BlobStore)
//! ```

pub mod app;
pub mod batch_processor;
pub mod session;

pub use app::App;
pub use batch_processor::{process_documents, ProcessingStats};
pub use session::{ProcessedDocument, Session, SessionSummary, Turn, UserRequest};
