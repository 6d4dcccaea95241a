//! 文档工作流状态机
//!
//! `decide` 是纯函数：只看当前 `DocumentRun` 和 `RunPolicy`，给出下一步动作。
//! 执行动作、记录结果由 `DocumentFlow` 负责。
//!
//! 状态流转：
//! ```text
//! idle → ocr_running → validating → parse_running → export_running → archiving → done
//!            ↑             │
//!            └── 重试 ─────┘            （任意状态 → failed）
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt::Display;

use crate::error::PipelineError;
use crate::models::{DocumentStage, ValidationReport};
use crate::workflow::capability::{CLEAN_UP, CREATE_EXCEL, PARSE_OCR, PERFORM_OCR, VALIDATE};

/// 默认的状态机最大步数
pub const DEFAULT_MAX_STEPS: usize = 32;

/// 工作流状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    OcrRunning,
    Validating,
    ParseRunning,
    ExportRunning,
    Archiving,
    Done,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Failed)
    }
}

impl Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkflowState::Idle => "idle",
            WorkflowState::OcrRunning => "ocr_running",
            WorkflowState::Validating => "validating",
            WorkflowState::ParseRunning => "parse_running",
            WorkflowState::ExportRunning => "export_running",
            WorkflowState::Archiving => "archiving",
            WorkflowState::Done => "done",
            WorkflowState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 单次运行的策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPolicy {
    /// OCR 最多重试次数；校验失败与 OCR 上游错误各自计数
    pub max_ocr_retries: u32,
    /// 校验未通过也允许导出与归档
    pub force_archive: bool,
    /// 指定 OCR 分析器；`None` 使用配置中的默认值
    pub analyzer_id: Option<String>,
    pub max_steps: usize,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            max_ocr_retries: 1,
            force_archive: false,
            analyzer_id: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

/// 一次能力调用的记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub capability: String,
    pub state: WorkflowState,
    pub ok: bool,
    pub detail: String,
}

/// 单个文档的一次运行
#[derive(Debug, Clone)]
pub struct DocumentRun {
    pub document: String,
    pub state: WorkflowState,
    pub ocr_key: Option<String>,
    pub summary_key: Option<String>,
    /// 摘要是否对应当前的 OCR 结果
    pub summary_fresh: bool,
    pub export_key: Option<String>,
    pub archived_key: Option<String>,
    /// 最近一次校验报告
    pub report: Option<ValidationReport>,
    /// 已发起的 OCR 调用次数
    pub ocr_attempts: u32,
    /// 因校验未通过而重新 OCR 的次数
    pub validation_retries: u32,
    /// 因 OCR 上游错误而重新 OCR 的次数
    pub upstream_retries: u32,
    pub steps: usize,
    /// 上一次能力调用的错误，下一次决策时处理
    pub pending_error: Option<PipelineError>,
    /// 终止错误
    pub error: Option<PipelineError>,
    pub warnings: Vec<String>,
    pub history: Vec<StepRecord>,
}

impl DocumentRun {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            state: WorkflowState::Idle,
            ocr_key: None,
            summary_key: None,
            summary_fresh: false,
            export_key: None,
            archived_key: None,
            report: None,
            ocr_attempts: 0,
            validation_retries: 0,
            upstream_retries: 0,
            steps: 0,
            pending_error: None,
            error: None,
            warnings: Vec::new(),
            history: Vec::new(),
        }
    }

    /// 最近一次校验是否通过
    pub fn last_report_passed(&self) -> bool {
        self.report.as_ref().is_some_and(|r| r.passed)
    }

    /// 归档守卫：校验通过，或调用方显式覆盖
    pub fn archive_allowed(&self, policy: &RunPolicy) -> bool {
        self.last_report_passed() || policy.force_archive
    }

    /// 文档当前所处的生命周期阶段（只随步骤成功而前进）
    pub fn stage(&self) -> DocumentStage {
        if self.archived_key.is_some() {
            DocumentStage::Archived
        } else if self.export_key.is_some() {
            DocumentStage::Exported
        } else if self.summary_key.is_some() {
            DocumentStage::Summarized
        } else if self.ocr_key.is_some() {
            DocumentStage::Enhanced
        } else {
            DocumentStage::Incoming
        }
    }

    /// 某能力被调用的次数
    pub fn invocations(&self, capability: &str) -> usize {
        self.history.iter().filter(|r| r.capability == capability).count()
    }

    /// 运行结果
    pub fn outcome(&self) -> Result<(), PipelineError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// 丢弃当前 OCR 结果及其派生物，准备重新 OCR
    fn reset_for_retry(&mut self) {
        self.ocr_key = None;
        self.summary_key = None;
        self.summary_fresh = false;
        self.report = None;
        self.pending_error = None;
        self.state = WorkflowState::OcrRunning;
    }

    /// 应用决策（调用类决策由 `DocumentFlow` 执行后通过 `record_*` 记录）
    pub fn apply(&mut self, decision: &Decision) {
        match decision {
            Decision::Invoke { .. } | Decision::Finish => {}
            Decision::Transition(next) => self.state = *next,
            Decision::Retry { cause, reason } => {
                match cause {
                    RetryCause::Validation => self.validation_retries += 1,
                    RetryCause::Upstream => self.upstream_retries += 1,
                }
                self.warnings.push(format!("重试 OCR: {}", reason));
                self.reset_for_retry();
            }
            Decision::Override { discrepancies } => {
                self.warnings.push(format!(
                    "校验未通过 ({} 项差异)，按覆盖标记继续导出与归档",
                    discrepancies
                ));
                self.state = WorkflowState::ParseRunning;
            }
            Decision::Fail(err) => {
                self.error = Some(err.clone());
                self.pending_error = None;
                self.state = WorkflowState::Failed;
            }
        }
    }

    /// 记录即将发起的调用
    pub fn record_invocation(&mut self, capability: &str) {
        if capability == PERFORM_OCR {
            self.ocr_attempts += 1;
        }
    }

    /// 记录调用成功的输出
    pub fn record_output(&mut self, capability: &str, output: &JsonValue) {
        let detail = match capability {
            PERFORM_OCR => {
                self.ocr_key = string_field(output, "result_blob_name");
                self.summary_fresh = false;
                self.report = None;
                self.ocr_key.clone()
            }
            PARSE_OCR => {
                self.summary_key = string_field(output, "summary_report_blob_name");
                self.summary_fresh = self.summary_key.is_some();
                self.summary_key.clone()
            }
            VALIDATE => {
                self.report = serde_json::from_value(output.clone()).ok();
                self.report.as_ref().map(|r| r.headline())
            }
            CREATE_EXCEL => {
                self.export_key = string_field(output, "result_blob_name");
                self.export_key.clone()
            }
            CLEAN_UP => {
                self.archived_key = string_field(output, "archived_blob_name");
                self.archived_key.clone()
            }
            _ => None,
        };

        match detail {
            Some(detail) => self.history.push(StepRecord {
                capability: capability.to_string(),
                state: self.state,
                ok: true,
                detail,
            }),
            None => {
                let err = PipelineError::parse(capability, format!("能力输出缺少必要字段: {}", output));
                self.record_error(capability, err);
            }
        }
    }

    /// 记录调用失败
    pub fn record_error(&mut self, capability: &str, err: PipelineError) {
        self.history.push(StepRecord {
            capability: capability.to_string(),
            state: self.state,
            ok: false,
            detail: err.to_string(),
        });
        self.pending_error = Some(err);
    }
}

impl Display for DocumentRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[文档 {}]", self.document)
    }
}

fn string_field(output: &JsonValue, name: &str) -> Option<String> {
    output.get(name).and_then(JsonValue::as_str).map(str::to_string)
}

/// 重新 OCR 的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    Validation,
    Upstream,
}

/// 状态机决策
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// 调用能力
    Invoke {
        capability: &'static str,
        input: JsonValue,
    },
    /// 进入下一状态
    Transition(WorkflowState),
    /// 丢弃当前结果，回到 ocr_running
    Retry { cause: RetryCause, reason: String },
    /// 校验重试已用尽，按覆盖标记继续
    Override { discrepancies: usize },
    /// 终止失败
    Fail(PipelineError),
    /// 已到终态
    Finish,
}

/// 决定下一步动作
pub fn decide(run: &DocumentRun, policy: &RunPolicy) -> Decision {
    if run.state.is_terminal() {
        return Decision::Finish;
    }

    if run.steps >= policy.max_steps {
        return Decision::Fail(PipelineError::StepLimit {
            document: run.document.clone(),
        });
    }

    if let Some(err) = &run.pending_error {
        // 只有 OCR 的上游错误可以重试
        if err.is_upstream()
            && run.state == WorkflowState::OcrRunning
            && run.ocr_key.is_none()
            && run.upstream_retries < policy.max_ocr_retries
        {
            return Decision::Retry {
                cause: RetryCause::Upstream,
                reason: err.to_string(),
            };
        }
        return Decision::Fail(err.clone());
    }

    match run.state {
        WorkflowState::Idle => Decision::Transition(WorkflowState::OcrRunning),

        WorkflowState::OcrRunning => match &run.ocr_key {
            None => {
                let mut input = json!({ "blob_name": run.document });
                if let Some(analyzer_id) = &policy.analyzer_id {
                    input["analyzer_id"] = json!(analyzer_id);
                }
                Decision::Invoke { capability: PERFORM_OCR, input }
            }
            Some(ocr_key) if !run.summary_fresh => Decision::Invoke {
                capability: PARSE_OCR,
                input: json!({ "ocr_result_blob_name": ocr_key }),
            },
            Some(_) => Decision::Transition(WorkflowState::Validating),
        },

        WorkflowState::Validating => match (&run.ocr_key, &run.summary_key, &run.report) {
            (Some(ocr_key), Some(summary_key), None) => Decision::Invoke {
                capability: VALIDATE,
                input: json!({
                    "ocr_result_blob_name": ocr_key,
                    "summary_blob_name": summary_key,
                }),
            },
            (_, _, Some(report)) if report.passed => Decision::Transition(WorkflowState::ParseRunning),
            (_, _, Some(report)) => {
                if run.validation_retries < policy.max_ocr_retries {
                    Decision::Retry {
                        cause: RetryCause::Validation,
                        reason: report.headline(),
                    }
                } else if policy.force_archive {
                    Decision::Override {
                        discrepancies: report.discrepancies.len(),
                    }
                } else {
                    Decision::Fail(PipelineError::ValidationExhausted {
                        document: run.document.clone(),
                        discrepancies: report.discrepancies.len(),
                    })
                }
            }
            // 没有 OCR 结果或摘要就到了校验阶段，回到 OCR
            _ => Decision::Transition(WorkflowState::OcrRunning),
        },

        WorkflowState::ParseRunning => match &run.ocr_key {
            Some(ocr_key) if !run.summary_fresh => Decision::Invoke {
                capability: PARSE_OCR,
                input: json!({ "ocr_result_blob_name": ocr_key }),
            },
            Some(_) => Decision::Transition(WorkflowState::ExportRunning),
            None => Decision::Transition(WorkflowState::OcrRunning),
        },

        WorkflowState::ExportRunning => match (&run.ocr_key, &run.export_key) {
            (Some(ocr_key), None) => Decision::Invoke {
                capability: CREATE_EXCEL,
                input: json!({ "ocr_result_blob_name": ocr_key }),
            },
            (Some(_), Some(_)) => Decision::Transition(WorkflowState::Archiving),
            (None, _) => Decision::Transition(WorkflowState::OcrRunning),
        },

        WorkflowState::Archiving => {
            if run.archived_key.is_some() {
                Decision::Transition(WorkflowState::Done)
            } else if run.archive_allowed(policy) {
                Decision::Invoke {
                    capability: CLEAN_UP,
                    input: json!({ "incoming_docs_blob_name": run.document }),
                }
            } else {
                Decision::Fail(PipelineError::ArchiveBlocked {
                    document: run.document.clone(),
                })
            }
        }

        WorkflowState::Done | WorkflowState::Failed => Decision::Finish,
    }
}
