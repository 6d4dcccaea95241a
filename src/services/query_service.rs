//! 查询服务 - 业务能力层
//!
//! 基于已处理文档的摘要与 OCR 结果回答用户问题。
//! 只负责"回答"能力：上下文由会话通过能力注册表准备好后传入。

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::clients::{ChatMessage, LlmClient};

/// 系统提示词
const SYSTEM_PROMPT: &str = "你是文档处理助手。只根据下面提供的文档内容回答问题，\
回答时注明依据的文档名；文档内容中找不到答案时直接说明无法从已处理文档中找到。";

/// 问答能力
#[async_trait]
pub trait QueryAnswerer: Send + Sync {
    /// 回答问题
    ///
    /// - `context`: 已处理文档的内容（已截断）
    /// - `history`: 本会话之前的对话
    async fn answer(&self, question: &str, context: &str, history: &[ChatMessage]) -> Result<String>;
}

/// 组装带文档上下文的系统消息
pub fn build_system_message(context: &str) -> String {
    if context.trim().is_empty() {
        format!("{}\n\n(当前没有已处理的文档)", SYSTEM_PROMPT)
    } else {
        format!("{}\n\n=== 文档内容 ===\n{}", SYSTEM_PROMPT, context)
    }
}

/// 基于 LLM 的问答服务
pub struct QueryService {
    llm: LlmClient,
}

impl QueryService {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl QueryAnswerer for QueryService {
    async fn answer(&self, question: &str, context: &str, history: &[ChatMessage]) -> Result<String> {
        debug!(
            "问答: 模型 {}, 上下文 {} 字符",
            self.llm.model_name(),
            context.chars().count()
        );
        self.llm
            .chat(&build_system_message(context), history, question)
            .await
    }
}
