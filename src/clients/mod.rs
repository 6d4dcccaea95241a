pub mod llm_client;
pub mod ocr_client;

pub use llm_client::{ChatMessage, ChatRole, LlmClient};
pub use ocr_client::{HttpOcrService, OcrRequest, OcrService};
