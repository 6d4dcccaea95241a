pub mod archive_step;
pub mod export_step;
pub mod inspect;
pub mod ocr_step;
pub mod parse_step;
pub mod query_service;
pub mod validator;

pub use archive_step::{ArchiveStep, ArchiveStepOutput};
pub use export_step::{ExportStep, ExportStepOutput};
pub use inspect::{Inspector, OcrContent, SummaryContent};
pub use ocr_step::{OcrStep, OcrStepOutput};
pub use parse_step::{ParseStep, ParseStepOutput};
pub use query_service::{QueryAnswerer, QueryService};
pub use validator::{validate, Thresholds, Validator};

use crate::error::{PipelineError, PipelineResult};
use crate::infrastructure::BlobStore;
use crate::models::{Bucket, OcrResult};

/// 读取并解析 enhanced 桶中的 OCR 结果
///
/// 对象不存在时返回 `NotFound`；结构不合法时用 `malformed` 构造调用方自己的错误类型
pub(crate) async fn load_ocr_result(
    store: &dyn BlobStore,
    ocr_key: &str,
    malformed: fn(String, String) -> PipelineError,
) -> PipelineResult<OcrResult> {
    let bytes = store.get(Bucket::Enhanced, ocr_key).await?;
    OcrResult::from_json_slice(&bytes).map_err(|message| malformed(ocr_key.to_string(), message))
}
