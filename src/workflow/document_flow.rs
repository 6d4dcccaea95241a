//! 文档处理流程 - 流程层
//!
//! 核心职责：驱动单个文档的状态机直到终态
//!
//! - 每一步先由 `decide` 决定动作，再通过能力注册表执行
//! - 只依赖注册表中的能力，不直接访问存储
//! - 同一文档的能力调用严格串行

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::workflow::capability::{CapabilityRegistry, CLEAN_UP};
use crate::workflow::state::{decide, Decision, DocumentRun, RunPolicy, WorkflowState};

/// 文档处理流程
pub struct DocumentFlow {
    registry: Arc<CapabilityRegistry>,
}

impl DocumentFlow {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// 处理一个文档，返回终态的运行记录
    pub async fn run(&self, document: &str, policy: &RunPolicy) -> DocumentRun {
        let mut run = DocumentRun::new(document);
        info!("{} 📄 开始处理", run);

        loop {
            let decision = decide(&run, policy);
            run.steps += 1;

            match &decision {
                Decision::Finish => break,
                Decision::Invoke { capability, input } => {
                    let capability = *capability;

                    // 调用时再检查一次归档守卫
                    if capability == CLEAN_UP && !run.archive_allowed(policy) {
                        run.record_error(
                            capability,
                            PipelineError::ArchiveBlocked {
                                document: run.document.clone(),
                            },
                        );
                        continue;
                    }

                    run.record_invocation(capability);
                    debug!("{} [{}] 调用 {}", run, run.state, capability);

                    match self.registry.invoke(capability, input.clone()).await {
                        Ok(output) => run.record_output(capability, &output),
                        Err(e) => {
                            warn!("{} ⚠️ {} 失败: {}", run, capability, e);
                            run.record_error(capability, e);
                        }
                    }
                }
                Decision::Transition(next) => {
                    debug!("{} {} → {}", run, run.state, next);
                    run.apply(&decision);
                }
                Decision::Retry { reason, .. } => {
                    warn!("{} 🔁 重新 OCR (第 {} 次尝试后): {}", run, run.ocr_attempts, reason);
                    run.apply(&decision);
                }
                Decision::Override { discrepancies } => {
                    warn!(
                        "{} ⚠️ 校验重试已用尽 ({} 项差异)，按覆盖标记继续",
                        run, discrepancies
                    );
                    run.apply(&decision);
                }
                Decision::Fail(err) => {
                    error!("{} ❌ 处理失败: {}", run, err);
                    run.apply(&decision);
                }
            }
        }

        if run.state == WorkflowState::Done {
            info!(
                "{} ✅ 处理完成 (OCR {} 次, 共 {} 步)",
                run, run.ocr_attempts, run.steps
            );
        }

        run
    }
}
