//! 对象存储 - 基础设施层
//!
//! 只暴露按键读写删的能力，不认识 OCR 结果 / 摘要等业务对象。
//! 单个对象的读写是原子的：读方要么看到完整旧值，要么看到完整新值。

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::BlobError;
use crate::models::document::is_valid_key;
use crate::models::{Bucket, BucketNames};

/// 对象存储抽象
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// 读取对象；不存在时返回 `BlobError::NotFound`
    async fn get(&self, bucket: Bucket, key: &str) -> Result<Vec<u8>, BlobError>;

    /// 写入对象（覆盖已有对象）
    async fn put(&self, bucket: Bucket, key: &str, data: Vec<u8>) -> Result<(), BlobError>;

    /// 删除对象；返回是否真的删除了
    async fn delete(&self, bucket: Bucket, key: &str) -> Result<bool, BlobError>;

    /// 对象是否存在
    async fn exists(&self, bucket: Bucket, key: &str) -> Result<bool, BlobError>;

    /// 列出桶内所有键（按字典序）
    async fn list(&self, bucket: Bucket) -> Result<Vec<String>, BlobError>;

    /// 桶对应的容器名（用于错误信息和日志）
    fn bucket_name(&self, bucket: Bucket) -> String;
}

fn check_key(key: &str) -> Result<(), BlobError> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(BlobError::InvalidKey(key.to_string()))
    }
}

/// 文件系统存储
///
/// 布局：`{root}/{容器名}/{key}`。
/// 写入先落到同目录下的临时文件再 rename，保证不会出现半写状态。
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    names: BucketNames,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, names: BucketNames) -> Self {
        Self {
            root: root.into(),
            names,
        }
    }

    /// 创建所有桶目录
    pub async fn ensure_buckets(&self) -> Result<(), BlobError> {
        for bucket in Bucket::ALL {
            fs::create_dir_all(self.bucket_dir(bucket))
                .await
                .map_err(|e| BlobError::Io(format!("创建目录失败: {}", e)))?;
        }
        Ok(())
    }

    fn bucket_dir(&self, bucket: Bucket) -> PathBuf {
        self.root.join(self.names.name(bucket))
    }

    fn object_path(&self, bucket: Bucket, key: &str) -> Result<PathBuf, BlobError> {
        check_key(key)?;
        Ok(self.bucket_dir(bucket).join(key))
    }

    fn not_found(&self, bucket: Bucket, key: &str) -> BlobError {
        BlobError::NotFound {
            bucket: self.bucket_name(bucket),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, bucket: Bucket, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path).await {
            Ok(data) => {
                debug!("读取对象 {}/{} ({} 字节)", self.bucket_name(bucket), key, data.len());
                Ok(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(self.not_found(bucket, key)),
            Err(e) => Err(BlobError::Io(format!("读取 {} 失败: {}", path.display(), e))),
        }
    }

    async fn put(&self, bucket: Bucket, key: &str, data: Vec<u8>) -> Result<(), BlobError> {
        let path = self.object_path(bucket, key)?;
        let dir = self.bucket_dir(bucket);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| BlobError::Io(format!("创建目录失败: {}", e)))?;

        let temp_path = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        let write_result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = write_result {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!("清理临时文件失败 {}: {}", temp_path.display(), cleanup);
                }
            }
            return Err(BlobError::Io(format!("写入 {} 失败: {}", path.display(), e)));
        }

        debug!("写入对象 {}/{} ({} 字节)", self.bucket_name(bucket), key, data.len());
        Ok(())
    }

    async fn delete(&self, bucket: Bucket, key: &str) -> Result<bool, BlobError> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobError::Io(format!("删除 {} 失败: {}", path.display(), e))),
        }
    }

    async fn exists(&self, bucket: Bucket, key: &str) -> Result<bool, BlobError> {
        let path = self.object_path(bucket, key)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| BlobError::Io(format!("检查 {} 失败: {}", path.display(), e)))
    }

    async fn list(&self, bucket: Bucket) -> Result<Vec<String>, BlobError> {
        let dir = self.bucket_dir(bucket);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BlobError::Io(format!("读取目录 {} 失败: {}", dir.display(), e))),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BlobError::Io(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            // 跳过写入中的临时文件
            if name.starts_with('.') {
                continue;
            }
            if entry.path().is_file() {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn bucket_name(&self, bucket: Bucket) -> String {
        self.names.name(bucket).to_string()
    }
}

/// 内存存储（试运行与测试）
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    names: BucketNames,
    objects: RwLock<HashMap<(Bucket, String), Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_names(names: BucketNames) -> Self {
        Self {
            names,
            objects: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, bucket: Bucket, key: &str) -> Result<Vec<u8>, BlobError> {
        check_key(key)?;
        self.objects
            .read()
            .await
            .get(&(bucket, key.to_string()))
            .cloned()
            .ok_or_else(|| BlobError::NotFound {
                bucket: self.bucket_name(bucket),
                key: key.to_string(),
            })
    }

    async fn put(&self, bucket: Bucket, key: &str, data: Vec<u8>) -> Result<(), BlobError> {
        check_key(key)?;
        self.objects.write().await.insert((bucket, key.to_string()), data);
        Ok(())
    }

    async fn delete(&self, bucket: Bucket, key: &str) -> Result<bool, BlobError> {
        check_key(key)?;
        Ok(self
            .objects
            .write()
            .await
            .remove(&(bucket, key.to_string()))
            .is_some())
    }

    async fn exists(&self, bucket: Bucket, key: &str) -> Result<bool, BlobError> {
        check_key(key)?;
        Ok(self.objects.read().await.contains_key(&(bucket, key.to_string())))
    }

    async fn list(&self, bucket: Bucket) -> Result<Vec<String>, BlobError> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .await
            .keys()
            .filter(|(b, _)| *b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn bucket_name(&self, bucket: Bucket) -> String {
        self.names.name(bucket).to_string()
    }
}
