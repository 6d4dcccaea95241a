//! 流程层（Workflow Layer）
//!
//! ## 模块划分
//!
//! ### `capability` - 能力注册表
//! - 能力名称 → {描述, 严格输入 schema, 处理器}
//! - 调用前按 schema 校验参数
//!
//! ### `state` - 状态机
//! - `WorkflowState`、`DocumentRun`
//! - 纯函数 `decide`：根据当前状态给出下一步动作
//!
//! ### `document_flow` - 单文档流程
//! - 循环执行 `decide` → 调用能力 → 记录结果，直到终态

pub mod capability;
pub mod document_flow;
pub mod state;

pub use capability::{standard_registry, Capability, CapabilityHandler, CapabilityRegistry, InputSchema, ParamKind};
pub use document_flow::DocumentFlow;
pub use state::{decide, Decision, DocumentRun, RetryCause, RunPolicy, StepRecord, WorkflowState};
