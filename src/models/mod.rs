pub mod document;
pub mod ocr_result;
pub mod report;
pub mod summary;
pub mod workbook;

pub use document::{Bucket, BucketNames, DocumentStage};
pub use ocr_result::{Field, OcrResult, Page, Table, TextBlock};
pub use report::{Discrepancy, ValidationChecks, ValidationReport};
pub use summary::{render_summary, SummarySections};
pub use workbook::{Sheet, SheetKind, Workbook};
