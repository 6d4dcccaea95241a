//! 批量文档处理器 - 编排层
//!
//! ## 职责
//!
//! - 并发控制：使用 Semaphore 限制同时处理的文档数量
//! - 每个文档一个 tokio 任务，文档之间除存储外不共享可变状态
//! - 汇总统计
//!
//! 单个文档的步骤顺序由 `DocumentFlow` 负责，这里不关心。

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::error;

use crate::error::PipelineError;
use crate::utils::logging::{log_batch_start, print_final_stats};
use crate::workflow::{DocumentFlow, DocumentRun, RunPolicy, WorkflowState};

/// 处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStats {
    pub success: usize,
    pub failed: usize,
    pub total: usize,
}

impl ProcessingStats {
    pub fn from_runs(runs: &[DocumentRun]) -> Self {
        let success = runs.iter().filter(|r| r.state == WorkflowState::Done).count();
        Self {
            success,
            failed: runs.len() - success,
            total: runs.len(),
        }
    }
}

/// 并发处理多个文档
///
/// 返回的运行记录与输入顺序一致
pub async fn process_documents(
    flow: Arc<DocumentFlow>,
    documents: Vec<String>,
    policy: RunPolicy,
    max_concurrent: usize,
) -> Vec<DocumentRun> {
    let max_concurrent = max_concurrent.max(1);
    log_batch_start(documents.len(), max_concurrent);

    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut handles = Vec::with_capacity(documents.len());

    for document in &documents {
        let semaphore = semaphore.clone();
        let flow = flow.clone();
        let policy = policy.clone();
        let name = document.clone();

        handles.push(tokio::spawn(async move {
            // 信号量只在本函数内持有，不会被关闭
            let _permit = semaphore.acquire_owned().await.ok();
            flow.run(&name, &policy).await
        }));
    }

    // 等待所有任务完成
    let mut runs = Vec::with_capacity(handles.len());
    for (document, joined) in documents.into_iter().zip(join_all(handles).await) {
        match joined {
            Ok(run) => runs.push(run),
            Err(e) => {
                error!("[文档 {}] 任务执行失败: {}", document, e);
                let mut run = DocumentRun::new(document);
                run.state = WorkflowState::Failed;
                run.error = Some(PipelineError::upstream("worker", e));
                runs.push(run);
            }
        }
    }

    let stats = ProcessingStats::from_runs(&runs);
    print_final_stats(stats.success, stats.failed, stats.total);

    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_from_runs() {
        let mut done = DocumentRun::new("a.png");
        done.state = WorkflowState::Done;
        let mut failed = DocumentRun::new("b.png");
        failed.state = WorkflowState::Failed;

        let stats = ProcessingStats::from_runs(&[done, failed]);
        assert_eq!(
            stats,
            ProcessingStats {
                success: 1,
                failed: 1,
                total: 2
            }
        );
    }
}
