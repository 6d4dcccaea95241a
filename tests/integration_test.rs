use async_trait::async_trait;
use docflow::clients::{ChatMessage, OcrRequest, OcrService};
use docflow::config::Config;
use docflow::error::{BlobError, PipelineError, PipelineResult};
use docflow::infrastructure::{BlobStore, FsBlobStore, MemoryBlobStore};
use docflow::models::{
    Bucket, Discrepancy, Field, OcrResult, Page, SheetKind, Table, TextBlock, ValidationChecks, ValidationReport,
};
use docflow::orchestrator::Session;
use docflow::services::{ExportStep, QueryAnswerer, Validator};
use docflow::workflow::capability::{CapabilityHandler, CLEAN_UP, PERFORM_OCR, VALIDATE};
use docflow::workflow::{standard_registry, CapabilityRegistry, WorkflowState};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};

// ========== 测试替身 ==========

/// 固定返回两页文档的 OCR 服务；前 `fail_first` 次调用返回上游错误
struct FakeOcr {
    calls: AtomicUsize,
    fail_first: usize,
}

impl FakeOcr {
    fn new() -> Arc<Self> {
        Self::failing(0)
    }

    fn failing(fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrService for FakeOcr {
    async fn analyze(&self, request: OcrRequest) -> PipelineResult<OcrResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(PipelineError::upstream("ocr-service", "503 Service Unavailable"));
        }
        Ok(two_page_result(&request.document, &request.analyzer_id))
    }
}

fn two_page_result(document: &str, analyzer_id: &str) -> OcrResult {
    OcrResult {
        document: document.to_string(),
        analyzer_id: analyzer_id.to_string(),
        page_count: 2,
        pages: vec![
            Page {
                page_number: 1,
                blocks: vec![
                    TextBlock { content: "Insurance Claim Form".to_string(), confidence: Some(0.99) },
                    TextBlock { content: "Claimant: Jane Roe".to_string(), confidence: Some(0.97) },
                ],
            },
            Page {
                page_number: 2,
                blocks: vec![TextBlock { content: "Itemised damages below".to_string(), confidence: None }],
            },
        ],
        tables: vec![Table {
            page_number: 2,
            headers: vec!["Item".to_string(), "Cost".to_string()],
            rows: vec![
                vec!["Windshield".to_string(), "450".to_string()],
                vec!["Bumper".to_string(), "300".to_string()],
                vec!["Labour".to_string(), "120".to_string()],
            ],
        }],
        fields: vec![
            Field { name: "Policy No".to_string(), value: "PN-2231".to_string(), confidence: 0.96 },
            Field { name: "Phone".to_string(), value: "555-0199".to_string(), confidence: 0.42 },
        ],
    }
}

/// 总是返回未通过报告的校验器
struct RejectingValidator;

#[async_trait]
impl CapabilityHandler for RejectingValidator {
    async fn call(&self, _input: JsonValue) -> PipelineResult<JsonValue> {
        let report = ValidationReport::new(
            vec![Discrepancy::TableCountMismatch { expected: 1, found: 0 }],
            ValidationChecks {
                expected_tables: 1,
                listed_tables: 0,
                text_coverage: 1.0,
                low_confidence_fields: 0,
                flagged_fields: 0,
            },
        );
        Ok(serde_json::to_value(report).unwrap())
    }
}

/// 记录上下文的问答替身
#[derive(Default)]
struct RecordingAnswerer {
    contexts: Mutex<Vec<String>>,
    histories: Mutex<Vec<usize>>,
}

#[async_trait]
impl QueryAnswerer for RecordingAnswerer {
    async fn answer(&self, question: &str, context: &str, history: &[ChatMessage]) -> anyhow::Result<String> {
        self.contexts.lock().unwrap().push(context.to_string());
        self.histories.lock().unwrap().push(history.len());
        Ok(format!("根据 claim.pdf 回答: {}", question))
    }
}

/// 归档桶写入失败的存储
struct ArchiveFailingStore {
    inner: MemoryBlobStore,
}

#[async_trait]
impl BlobStore for ArchiveFailingStore {
    async fn get(&self, bucket: Bucket, key: &str) -> Result<Vec<u8>, BlobError> {
        self.inner.get(bucket, key).await
    }
    async fn put(&self, bucket: Bucket, key: &str, data: Vec<u8>) -> Result<(), BlobError> {
        if bucket == Bucket::Archived {
            return Err(BlobError::Io("connection reset".to_string()));
        }
        self.inner.put(bucket, key, data).await
    }
    async fn delete(&self, bucket: Bucket, key: &str) -> Result<bool, BlobError> {
        self.inner.delete(bucket, key).await
    }
    async fn exists(&self, bucket: Bucket, key: &str) -> Result<bool, BlobError> {
        self.inner.exists(bucket, key).await
    }
    async fn list(&self, bucket: Bucket) -> Result<Vec<String>, BlobError> {
        self.inner.list(bucket).await
    }
    fn bucket_name(&self, bucket: Bucket) -> String {
        self.inner.bucket_name(bucket)
    }
}

// ========== 辅助函数 ==========

async fn memory_store_with(documents: &[&str]) -> Arc<MemoryBlobStore> {
    let store = Arc::new(MemoryBlobStore::new());
    for document in documents {
        store
            .put(Bucket::Incoming, document, b"%PDF-1.7 fake".to_vec())
            .await
            .unwrap();
    }
    store
}

fn registry(store: Arc<dyn BlobStore>, ocr: Arc<FakeOcr>) -> CapabilityRegistry {
    standard_registry(store, ocr, &Config::default())
}

fn open_session(store: Arc<dyn BlobStore>, registry: CapabilityRegistry) -> (Session, Arc<RecordingAnswerer>) {
    let answerer = Arc::new(RecordingAnswerer::default());
    let session = Session::open(&Config::default(), store, registry, answerer.clone());
    (session, answerer)
}

// ========== 端到端 ==========

#[tokio::test]
async fn test_end_to_end_two_page_document() {
    let store = memory_store_with(&["claim.pdf"]).await;
    let ocr = FakeOcr::new();
    let (mut session, _) = open_session(store.clone(), registry(store.clone(), ocr.clone()));

    let run = session.process_document("claim.pdf", false).await;
    assert_ok!(run.outcome());
    assert_eq!(run.state, WorkflowState::Done);
    assert_eq!(ocr.calls(), 1);

    // 导出：一个表格工作表（3 行数据），一个键值工作表
    let workbook = assert_ok!(ExportStep::new(store.clone()).build_workbook("claim.pdf.ocr.json").await);
    let tables: Vec<_> = workbook.sheets_of(SheetKind::Table).collect();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].rows.len(), 3);
    assert_eq!(workbook.sheets_of(SheetKind::KeyValue).count(), 1);
    assert!(store.exists(Bucket::Exports, "claim.pdf.xlsx").await.unwrap());

    // 校验：低置信度字段在摘要中被标记
    let report = run.report.clone().unwrap();
    assert!(report.passed);
    assert_eq!(report.checks.low_confidence_fields, 1);
    assert_eq!(report.checks.flagged_fields, 1);
    let summary = store.get(Bucket::Summaries, "claim.pdf.summary.txt").await.unwrap();
    assert!(String::from_utf8(summary).unwrap().contains("[低置信度] Phone: 555-0199"));

    // 归档：源文档已移走
    assert!(!store.exists(Bucket::Incoming, "claim.pdf").await.unwrap());
    assert!(store.exists(Bucket::Archived, "claim.pdf").await.unwrap());
}

#[tokio::test]
async fn test_validator_is_deterministic_on_stored_objects() {
    let store = memory_store_with(&["claim.pdf"]).await;
    let (mut session, _) = open_session(store.clone(), registry(store.clone(), FakeOcr::new()));
    session.process_document("claim.pdf", false).await;

    let validator = Validator::new(store.clone(), &Config::default());
    let first = validator.run("claim.pdf.ocr.json", "claim.pdf.summary.txt").await.unwrap();
    let second = validator.run("claim.pdf.ocr.json", "claim.pdf.summary.txt").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_end_to_end_on_filesystem_store() {
    let dir = tempfile::tempdir().unwrap();
    let fs_store = FsBlobStore::new(dir.path(), Config::default().bucket_names());
    fs_store.ensure_buckets().await.unwrap();
    let store: Arc<dyn BlobStore> = Arc::new(fs_store);
    store
        .put(Bucket::Incoming, "claim.pdf", b"%PDF-1.7 fake".to_vec())
        .await
        .unwrap();

    let (mut session, _) = open_session(store.clone(), registry(store.clone(), FakeOcr::new()));
    let run = session.process_document("claim.pdf", false).await;

    assert_eq!(run.state, WorkflowState::Done);
    assert!(dir.path().join("processed-docs").join("claim.pdf").exists());
    assert!(dir.path().join("excel-result").join("claim.pdf.xlsx").exists());
    assert!(!dir.path().join("incoming-docs").join("claim.pdf").exists());
}

// ========== 重试与归档守卫 ==========

#[tokio::test]
async fn test_validation_failure_retries_ocr_at_most_once() {
    let store = memory_store_with(&["claim.pdf"]).await;
    let ocr = FakeOcr::new();
    let mut registry = registry(store.clone(), ocr.clone());
    registry.replace_handler(VALIDATE, Arc::new(RejectingValidator)).unwrap();
    let (mut session, _) = open_session(store.clone(), registry);

    let run = session.process_document("claim.pdf", false).await;

    let err = assert_err!(run.outcome());
    assert_eq!(
        err,
        PipelineError::ValidationExhausted {
            document: "claim.pdf".to_string(),
            discrepancies: 1
        }
    );
    // OCR → 校验失败 → OCR → 校验失败 → 终止，没有第三次 OCR
    assert_eq!(ocr.calls(), 2);
    assert_eq!(run.invocations(PERFORM_OCR), 2);
    assert_eq!(run.invocations(VALIDATE), 2);
    // 校验未通过，不归档
    assert_eq!(run.invocations(CLEAN_UP), 0);
    assert!(store.exists(Bucket::Incoming, "claim.pdf").await.unwrap());
}

#[tokio::test]
async fn test_override_archives_despite_failed_validation() {
    let store = memory_store_with(&["claim.pdf"]).await;
    let mut registry = registry(store.clone(), FakeOcr::new());
    registry.replace_handler(VALIDATE, Arc::new(RejectingValidator)).unwrap();
    let (mut session, _) = open_session(store.clone(), registry);

    let run = session.process_document("claim.pdf", true).await;

    assert_eq!(run.state, WorkflowState::Done);
    assert!(!run.last_report_passed());
    assert!(run.warnings.iter().any(|w| w.contains("覆盖")));
    assert_eq!(run.invocations(CLEAN_UP), 1);
    assert!(store.exists(Bucket::Archived, "claim.pdf").await.unwrap());
}

#[tokio::test]
async fn test_transient_ocr_failure_is_retried() {
    let store = memory_store_with(&["claim.pdf"]).await;
    let ocr = FakeOcr::failing(1);
    let (mut session, _) = open_session(store.clone(), registry(store.clone(), ocr.clone()));

    let run = session.process_document("claim.pdf", false).await;

    assert_eq!(run.state, WorkflowState::Done);
    assert_eq!(ocr.calls(), 2);
}

#[tokio::test]
async fn test_upstream_retry_then_validation_failure_still_retries_once() {
    let store = memory_store_with(&["claim.pdf"]).await;
    let ocr = FakeOcr::failing(1);
    let mut registry = registry(store.clone(), ocr.clone());
    registry.replace_handler(VALIDATE, Arc::new(RejectingValidator)).unwrap();
    let (mut session, _) = open_session(store.clone(), registry);

    let run = session.process_document("claim.pdf", false).await;

    // OCR(503) → OCR → 校验失败 → OCR → 校验失败 → 终止
    assert!(matches!(
        assert_err!(run.outcome()),
        PipelineError::ValidationExhausted { .. }
    ));
    assert_eq!(ocr.calls(), 3);
    assert_eq!(run.invocations(VALIDATE), 2);
    assert_eq!(run.upstream_retries, 1);
    assert_eq!(run.validation_retries, 1);
    assert!(store.exists(Bucket::Incoming, "claim.pdf").await.unwrap());
}

#[tokio::test]
async fn test_persistent_ocr_failure_is_surfaced() {
    let store = memory_store_with(&["claim.pdf"]).await;
    let ocr = FakeOcr::failing(usize::MAX);
    let (mut session, _) = open_session(store.clone(), registry(store.clone(), ocr.clone()));

    let run = session.process_document("claim.pdf", false).await;

    assert!(assert_err!(run.outcome()).is_upstream());
    assert_eq!(ocr.calls(), 2);
    assert!(store.list(Bucket::Enhanced).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_document_is_not_retried() {
    let store = memory_store_with(&[]).await;
    let ocr = FakeOcr::new();
    let (mut session, _) = open_session(store.clone(), registry(store.clone(), ocr.clone()));

    let run = session.process_document("ghost.pdf", false).await;

    assert!(matches!(run.outcome(), Err(PipelineError::NotFound { .. })));
    assert_eq!(run.invocations(PERFORM_OCR), 1);
    assert_eq!(ocr.calls(), 0);
}

#[tokio::test]
async fn test_archive_copy_failure_keeps_source() {
    let store = Arc::new(ArchiveFailingStore {
        inner: MemoryBlobStore::new(),
    });
    store
        .put(Bucket::Incoming, "claim.pdf", b"%PDF-1.7 fake".to_vec())
        .await
        .unwrap();
    let (mut session, _) = open_session(store.clone(), registry(store.clone(), FakeOcr::new()));

    let run = session.process_document("claim.pdf", false).await;

    assert_eq!(run.state, WorkflowState::Failed);
    assert!(assert_err!(run.outcome()).is_upstream());
    assert_eq!(
        store.get(Bucket::Incoming, "claim.pdf").await.unwrap(),
        b"%PDF-1.7 fake".to_vec()
    );
}

// ========== 批量与会话 ==========

#[tokio::test]
async fn test_process_incoming_handles_every_document() {
    let store = memory_store_with(&["a.pdf", "b.pdf", "c.pdf"]).await;
    let ocr = FakeOcr::new();
    let (mut session, _) = open_session(store.clone(), registry(store.clone(), ocr.clone()));

    let runs = session.process_incoming(false).await.unwrap();

    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|r| r.state == WorkflowState::Done));
    assert_eq!(ocr.calls(), 3);
    assert!(store.list(Bucket::Incoming).await.unwrap().is_empty());
    assert_eq!(store.list(Bucket::Exports).await.unwrap().len(), 3);

    let summary = session.close();
    assert_eq!(summary.stats.success, 3);
}

#[tokio::test]
async fn test_query_uses_processed_outputs() {
    let store = memory_store_with(&["claim.pdf"]).await;
    let (mut session, answerer) = open_session(store.clone(), registry(store.clone(), FakeOcr::new()));

    let before = session.handle("总金额是多少?").await;
    assert!(before.contains("还没有已处理的文档"));
    assert!(answerer.contexts.lock().unwrap().is_empty());

    session.handle("process claim.pdf").await;
    let reply = session.handle("ask 索赔人是谁?").await;

    assert!(reply.contains("索赔人是谁?"));
    let contexts = answerer.contexts.lock().unwrap();
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].contains("[文档 claim.pdf]"));
    assert!(contexts[0].contains("Claimant: Jane Roe"));
    assert!(contexts[0].contains("Windshield"));
    // 历史包含之前的两轮对话（4 条消息）
    assert_eq!(answerer.histories.lock().unwrap()[0], 4);
    assert_eq!(session.thread().len(), 6);
}

#[tokio::test]
async fn test_list_outputs_cites_source_document() {
    let store = memory_store_with(&["claim.pdf", "invoice.png"]).await;
    let (mut session, answerer) = open_session(store.clone(), registry(store.clone(), FakeOcr::new()));
    session.process_incoming(false).await.unwrap();

    let reply = session.handle("请列出输出文件").await;

    assert!(reply.contains("excel-result/claim.pdf.xlsx (来源文档: claim.pdf)"));
    assert!(reply.contains("excel-result/invoice.png.xlsx (来源文档: invoice.png)"));
    assert!(reply.contains("processed-docs/claim.pdf (来源文档: claim.pdf)"));
    assert!(answerer.contexts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_rerun_keeps_earlier_outputs() {
    let store = memory_store_with(&["claim.pdf"]).await;
    let (mut session, answerer) = open_session(store.clone(), registry(store.clone(), FakeOcr::new()));

    let first = session.process_document("claim.pdf", false).await;
    assert_eq!(first.state, WorkflowState::Done);

    // 源文档已归档，再次处理在 OCR 之前就失败
    let rerun = session.process_document("claim.pdf", false).await;
    assert!(matches!(rerun.outcome(), Err(PipelineError::NotFound { .. })));

    let record = session.documents().next().unwrap();
    assert_eq!(record.state, WorkflowState::Done);
    assert_eq!(record.export_key.as_deref(), Some("claim.pdf.xlsx"));

    let listing = session.handle("outputs").await;
    assert!(listing.contains("excel-result/claim.pdf.xlsx (来源文档: claim.pdf)"));

    let reply = session.handle("索赔人是谁?").await;
    assert!(reply.contains("索赔人是谁?"));
    assert!(answerer.contexts.lock().unwrap()[0].contains("Claimant: Jane Roe"));

    assert_eq!(session.close().stats.success, 1);
}

#[tokio::test]
async fn test_query_history_is_capped() {
    let store = memory_store_with(&["claim.pdf"]).await;
    let config = Config {
        query_history_messages: 3,
        ..Config::default()
    };
    let answerer = Arc::new(RecordingAnswerer::default());
    let mut session = Session::open(
        &config,
        store.clone(),
        registry(store.clone(), FakeOcr::new()),
        answerer.clone(),
    );

    session.handle("process claim.pdf").await;
    for _ in 0..4 {
        session.handle("总金额是多少?").await;
    }

    let histories = answerer.histories.lock().unwrap();
    assert_eq!(*histories, vec![2, 3, 3, 3]);
    assert_eq!(session.thread().len(), 10);
}

#[tokio::test]
async fn test_upload_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("receipt.jpg");
    std::fs::write(&path, b"jpeg bytes").unwrap();

    let store = memory_store_with(&[]).await;
    let (mut session, _) = open_session(store.clone(), registry(store.clone(), FakeOcr::new()));

    let reply = session.handle(&format!("upload {}", path.display())).await;

    assert!(reply.contains("receipt.jpg"));
    assert_eq!(store.get(Bucket::Incoming, "receipt.jpg").await.unwrap(), b"jpeg bytes".to_vec());

    let missing = session.handle("upload /no/such/file.png").await;
    assert!(missing.starts_with("❌"));
}
