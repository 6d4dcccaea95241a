//! 会话 - 编排层
//!
//! 一个会话由调用方显式打开和关闭，持有：
//! - 对话线程（用户 / 助手的轮次，带时间戳）
//! - 本会话处理过的文档记录
//! - 查询路径：基于已处理文档的输出回答问题
//!
//! 会话之间不共享状态；关闭会话即销毁对话线程。

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::{ChatMessage, ChatRole};
use crate::config::Config;
use crate::infrastructure::BlobStore;
use crate::models::document::is_valid_key;
use crate::models::{Bucket, DocumentStage};
use crate::orchestrator::batch_processor::{self, ProcessingStats};
use crate::services::QueryAnswerer;
use crate::utils::logging::truncate_text;
use crate::workflow::capability::{GET_OCR_RESULT_CONTENT, GET_PARSED_SUMMARY_CONTENT};
use crate::workflow::{CapabilityRegistry, DocumentFlow, DocumentRun, RunPolicy, WorkflowState};

/// 列出输出文件的短语（整句匹配，空白已规整）
const LIST_OUTPUT_PHRASES: [&str; 7] = [
    "list outputs",
    "list the outputs",
    "list output files",
    "list the output files",
    "输出文件",
    "列出输出",
    "产出文件",
];

/// 对话中的一轮
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: ChatRole,
    pub content: String,
    pub at: DateTime<Local>,
}

/// 用户请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRequest {
    /// 上传本地文件到 incoming 桶
    Upload(PathBuf),
    /// 处理单个文档
    Process { document: String, force: bool },
    /// 处理 incoming 桶中的全部文档
    ProcessAll { force: bool },
    /// 列出本会话的输出文件
    ListOutputs,
    /// 自由提问
    Query(String),
    Empty,
}

impl UserRequest {
    /// 解析一行输入
    ///
    /// 支持的命令：`upload <路径>`、`process <文档> [--force]`、`process-all [--force]`、
    /// `outputs`、`ask <问题>`；其他输入一律视为提问
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return UserRequest::Empty;
        }

        let (command, rest) = match input.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (input, ""),
        };

        match command.to_lowercase().as_str() {
            "upload" if !rest.is_empty() => UserRequest::Upload(PathBuf::from(rest)),
            "process" if !rest.is_empty() => {
                let force = rest.split_whitespace().any(|t| t == "--force");
                let document = rest
                    .split_whitespace()
                    .filter(|t| *t != "--force")
                    .collect::<Vec<_>>()
                    .join(" ");
                if document.is_empty() {
                    UserRequest::Query(input.to_string())
                } else {
                    UserRequest::Process { document, force }
                }
            }
            "process-all" => UserRequest::ProcessAll {
                force: rest.split_whitespace().any(|t| t == "--force"),
            },
            "outputs" if rest.is_empty() => UserRequest::ListOutputs,
            "ask" if !rest.is_empty() => UserRequest::Query(rest.to_string()),
            _ => UserRequest::Query(input.to_string()),
        }
    }
}

/// 本会话处理过的文档
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub document: String,
    pub state: WorkflowState,
    pub stage: DocumentStage,
    pub ocr_key: Option<String>,
    pub summary_key: Option<String>,
    pub export_key: Option<String>,
    pub archived_key: Option<String>,
    pub report_passed: bool,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub processed_at: DateTime<Local>,
}

impl ProcessedDocument {
    fn from_run(run: &DocumentRun) -> Self {
        Self {
            document: run.document.clone(),
            state: run.state,
            stage: run.stage(),
            ocr_key: run.ocr_key.clone(),
            summary_key: run.summary_key.clone(),
            export_key: run.export_key.clone(),
            archived_key: run.archived_key.clone(),
            report_passed: run.last_report_passed(),
            error: run.error.as_ref().map(|e| e.to_string()),
            warnings: run.warnings.clone(),
            processed_at: Local::now(),
        }
    }
}

/// 会话结束时的汇总
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub turns: usize,
    pub stats: ProcessingStats,
}

/// 会话
pub struct Session {
    id: String,
    store: Arc<dyn BlobStore>,
    flow: Arc<DocumentFlow>,
    answerer: Arc<dyn QueryAnswerer>,
    policy: RunPolicy,
    max_concurrent: usize,
    context_chars: usize,
    history_messages: usize,
    thread: Vec<Turn>,
    documents: BTreeMap<String, ProcessedDocument>,
}

impl Session {
    /// 打开新会话
    pub fn open(
        config: &Config,
        store: Arc<dyn BlobStore>,
        registry: CapabilityRegistry,
        answerer: Arc<dyn QueryAnswerer>,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        info!("🆕 会话已打开: {}", id);

        Self {
            id,
            store,
            flow: Arc::new(DocumentFlow::new(Arc::new(registry))),
            answerer,
            policy: RunPolicy {
                max_ocr_retries: config.max_ocr_retries,
                ..RunPolicy::default()
            },
            max_concurrent: config.max_concurrent_documents,
            context_chars: config.query_context_chars,
            history_messages: config.query_history_messages,
            thread: Vec::new(),
            documents: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn thread(&self) -> &[Turn] {
        &self.thread
    }

    /// 本会话处理过的文档（按文档名排序）
    pub fn documents(&self) -> impl Iterator<Item = &ProcessedDocument> {
        self.documents.values()
    }

    /// 处理一行用户输入，返回助手回复
    ///
    /// 输入与回复都会追加到对话线程；失败也以回复文本的形式返回
    pub async fn handle(&mut self, input: &str) -> String {
        let request = UserRequest::parse(input);
        if request == UserRequest::Empty {
            return String::new();
        }

        let reply = match self.dispatch(request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("会话 {} 请求失败: {:#}", self.id, e);
                format!("❌ {:#}", e)
            }
        };

        self.push_turn(ChatRole::User, input.trim());
        self.push_turn(ChatRole::Assistant, &reply);
        reply
    }

    async fn dispatch(&mut self, request: UserRequest) -> Result<String> {
        match request {
            UserRequest::Upload(path) => {
                let name = self.upload_document(&path).await?;
                Ok(format!("📤 已上传 {} 到 {}", name, self.store.bucket_name(Bucket::Incoming)))
            }
            UserRequest::Process { document, force } => {
                let run = self.process_document(&document, force).await;
                Ok(describe_run(&run))
            }
            UserRequest::ProcessAll { force } => {
                let runs = self.process_incoming(force).await?;
                if runs.is_empty() {
                    return Ok("incoming 桶中没有待处理的文档".to_string());
                }
                let stats = ProcessingStats::from_runs(&runs);
                let mut lines = vec![format!("批量处理完成: 成功 {}/{}", stats.success, stats.total)];
                lines.extend(runs.iter().map(describe_run));
                Ok(lines.join("\n"))
            }
            UserRequest::ListOutputs => Ok(self.list_outputs()),
            UserRequest::Query(question) => self.query(&question).await,
            UserRequest::Empty => Ok(String::new()),
        }
    }

    /// 上传本地文件到 incoming 桶，返回文档名
    pub async fn upload_document(&self, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| is_valid_key(n))
            .with_context(|| format!("无法从路径得到合法的文档名: {}", path.display()))?
            .to_string();

        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("读取文件失败: {}", path.display()))?;
        self.store
            .put(Bucket::Incoming, &name, content)
            .await
            .with_context(|| format!("上传 {} 失败", name))?;

        info!("[文档 {}] 📤 已上传", name);
        Ok(name)
    }

    /// 处理单个文档
    ///
    /// `force_archive` 为 true 时，校验未通过也会导出并归档
    pub async fn process_document(&mut self, document: &str, force_archive: bool) -> DocumentRun {
        let policy = RunPolicy {
            force_archive,
            ..self.policy.clone()
        };
        let run = self.flow.run(document, &policy).await;
        self.record(&run);
        run
    }

    /// 并发处理 incoming 桶中的全部文档
    pub async fn process_incoming(&mut self, force_archive: bool) -> Result<Vec<DocumentRun>> {
        let documents = self
            .store
            .list(Bucket::Incoming)
            .await
            .context("列出 incoming 桶失败")?;
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let policy = RunPolicy {
            force_archive,
            ..self.policy.clone()
        };
        let runs =
            batch_processor::process_documents(self.flow.clone(), documents, policy, self.max_concurrent).await;
        for run in &runs {
            self.record(run);
        }
        Ok(runs)
    }

    /// 回答问题
    ///
    /// 只使用本会话已处理文档的摘要与 OCR 结果；要求列出输出文件时直接返回清单
    pub async fn query(&self, question: &str) -> Result<String> {
        if is_listing_request(question) {
            return Ok(self.list_outputs());
        }

        if !self.documents.values().any(|d| d.summary_key.is_some()) {
            return Ok("本会话还没有已处理的文档，请先处理文档再提问".to_string());
        }

        let context = self.build_context().await?;
        let recent = self.thread.len().saturating_sub(self.history_messages);
        let history: Vec<ChatMessage> = self.thread[recent..]
            .iter()
            .map(|t| ChatMessage {
                role: t.role,
                content: t.content.clone(),
            })
            .collect();

        self.answerer
            .answer(question, &context, &history)
            .await
            .context("回答问题失败")
    }

    /// 本会话的输出文件清单，每个文件注明来源文档
    pub fn list_outputs(&self) -> String {
        let mut lines = Vec::new();
        for doc in self.documents.values() {
            let outputs = [
                (Bucket::Enhanced, &doc.ocr_key),
                (Bucket::Summaries, &doc.summary_key),
                (Bucket::Exports, &doc.export_key),
                (Bucket::Archived, &doc.archived_key),
            ];
            for (bucket, key) in outputs {
                if let Some(key) = key {
                    lines.push(format!(
                        "- {}/{} (来源文档: {})",
                        self.store.bucket_name(bucket),
                        key,
                        doc.document
                    ));
                }
            }
        }

        if lines.is_empty() {
            "本会话还没有输出文件".to_string()
        } else {
            format!("本会话的输出文件:\n{}", lines.join("\n"))
        }
    }

    /// 关闭会话，返回汇总
    pub fn close(self) -> SessionSummary {
        let success = self
            .documents
            .values()
            .filter(|d| d.state == WorkflowState::Done)
            .count();
        let stats = ProcessingStats {
            success,
            failed: self.documents.len() - success,
            total: self.documents.len(),
        };
        info!("👋 会话已关闭: {} ({} 轮对话)", self.id, self.thread.len());

        SessionSummary {
            id: self.id,
            turns: self.thread.len(),
            stats,
        }
    }

    /// 通过只读能力拼装查询上下文
    async fn build_context(&self) -> Result<String> {
        let registry = self.flow.registry();
        let mut context = String::new();

        for doc in self.documents.values() {
            let Some(summary_key) = &doc.summary_key else {
                continue;
            };

            let summary = registry
                .invoke(GET_PARSED_SUMMARY_CONTENT, json!({ "summary_blob_name": summary_key }))
                .await
                .with_context(|| format!("读取摘要 {} 失败", summary_key))?;

            context.push_str(&format!("[文档 {}]\n", doc.document));
            if let Some(text) = summary["content"].as_str() {
                context.push_str(text);
            }

            if let Some(ocr_key) = &doc.ocr_key {
                match registry
                    .invoke(GET_OCR_RESULT_CONTENT, json!({ "ocr_result_blob_name": ocr_key }))
                    .await
                {
                    Ok(ocr) => {
                        context.push_str(&format!(
                            "\nOCR 概要: {} 页, {} 个表格, {} 个字段\n表格数据: {}\n",
                            ocr["pages"], ocr["table_count"], ocr["field_count"], ocr["content"]["tables"]
                        ));
                    }
                    Err(e) => warn!("[文档 {}] 读取 OCR 结果失败，仅使用摘要: {}", doc.document, e),
                }
            }
            context.push('\n');
        }

        Ok(truncate_text(&context, self.context_chars))
    }

    /// 记录一次运行
    ///
    /// 没有产出任何对象的失败运行不会覆盖之前的记录；有产出时，本次没有重新生成的键沿用之前的记录
    fn record(&mut self, run: &DocumentRun) {
        let mut record = ProcessedDocument::from_run(run);
        if let Some(previous) = self.documents.get(&run.document) {
            if run.stage() == DocumentStage::Incoming && run.state != WorkflowState::Done {
                warn!(
                    "[文档 {}] 本次运行没有产出 ({}), 保留之前的处理记录",
                    run.document,
                    record.error.as_deref().unwrap_or("-")
                );
                return;
            }
            record.ocr_key = record.ocr_key.or_else(|| previous.ocr_key.clone());
            record.summary_key = record.summary_key.or_else(|| previous.summary_key.clone());
            record.export_key = record.export_key.or_else(|| previous.export_key.clone());
            record.archived_key = record.archived_key.or_else(|| previous.archived_key.clone());
        }
        self.documents.insert(run.document.clone(), record);
    }

    fn push_turn(&mut self, role: ChatRole, content: &str) {
        self.thread.push(Turn {
            role,
            content: content.to_string(),
            at: Local::now(),
        });
    }
}

/// 是否为"列出输出文件"类请求
pub fn is_listing_request(question: &str) -> bool {
    let question = question.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    LIST_OUTPUT_PHRASES.iter().any(|p| question.contains(p))
}

/// 运行结果的回复文本
fn describe_run(run: &DocumentRun) -> String {
    let mut text = match (&run.state, &run.error) {
        (WorkflowState::Done, _) => format!(
            "✅ {} 处理完成: OCR 结果 {}, 摘要 {}, Excel {}, 已归档",
            run.document,
            run.ocr_key.as_deref().unwrap_or("-"),
            run.summary_key.as_deref().unwrap_or("-"),
            run.export_key.as_deref().unwrap_or("-"),
        ),
        (_, Some(err)) => format!("❌ {} 处理失败 (停在{}阶段): {}", run.document, run.stage(), err),
        (state, None) => format!("⚠️ {} 停在状态 {}", run.document, state),
    };
    if let Some(report) = &run.report {
        text.push_str(&format!("\n   {}", report.headline()));
    }
    for warning in &run.warnings {
        text.push_str(&format!("\n   ⚠️ {}", warning));
    }
    text
}
