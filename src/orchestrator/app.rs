//! 交互式控制台
//!
//! 持有会话与外部资源（存储、OCR 服务、LLM），逐行读取用户输入交给会话处理。

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::clients::{HttpOcrService, LlmClient, OcrService};
use crate::config::Config;
use crate::infrastructure::{BlobStore, FsBlobStore, MemoryBlobStore};
use crate::orchestrator::session::Session;
use crate::services::QueryService;
use crate::utils::logging::{init_log_file, log_startup};
use crate::workflow::standard_registry;

const HELP: &str = "命令: upload <路径> | process <文档> [--force] | process-all [--force] | outputs | ask <问题> | quit";

/// 应用主结构
pub struct App {
    session: Session,
}

impl App {
    /// 初始化应用：创建存储、客户端和会话
    pub async fn initialize(config: Config) -> Result<Self> {
        let store: Arc<dyn BlobStore> = match config.storage_backend.as_str() {
            "memory" => Arc::new(MemoryBlobStore::with_names(config.bucket_names())),
            "fs" => {
                let store = FsBlobStore::new(&config.storage_root, config.bucket_names());
                store
                    .ensure_buckets()
                    .await
                    .with_context(|| format!("初始化存储目录失败: {}", config.storage_root))?;
                Arc::new(store)
            }
            other => anyhow::bail!("未知的存储后端: {}", other),
        };

        let ocr: Arc<dyn OcrService> = Arc::new(HttpOcrService::new(&config));
        let registry = standard_registry(store.clone(), ocr, &config);
        let answerer = Arc::new(QueryService::new(LlmClient::new(&config)));

        let session = Session::open(&config, store, registry, answerer);

        init_log_file(&config.output_log_file, session.id())?;
        log_startup(&config.storage_root, config.max_concurrent_documents);

        Ok(Self { session })
    }

    /// 运行交互循环，直到输入 quit 或标准输入结束
    pub async fn run(mut self) -> Result<()> {
        println!("{}", HELP);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("读取标准输入失败")? {
            let input = line.trim();
            match input {
                "" => continue,
                "quit" | "exit" => break,
                "help" => {
                    println!("{}", HELP);
                    continue;
                }
                _ => {}
            }

            let reply = self.session.handle(input).await;
            println!("{}\n", reply);
        }

        let summary = self.session.close();
        info!(
            "会话 {} 结束: {} 轮对话, 成功 {}/{}",
            summary.id, summary.turns, summary.stats.success, summary.stats.total
        );
        Ok(())
    }
}
