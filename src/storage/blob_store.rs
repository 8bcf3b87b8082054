//! 图片 Blob 存储
//!
//! 按不透明字符串键存放图片二进制内容，一键一文件。
//! 键由上层按 `{recordId}_{role}[_{index}]` 派生，只包含
//! 数字、字母和下划线，可以直接作为文件名。
//!
//! 条目只创建一次、删除一次，正常流程中不会被覆盖
//! （备份导入通过生成新键避让冲突，而不是覆盖）。

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;

use super::StorageError;

/// 图片 Blob 存储服务
pub struct BlobStore {
    /// 存储根目录
    base_dir: PathBuf,
}

impl BlobStore {
    /// 创建存储服务，默认使用 ~/.imagecast/blobs 目录
    pub fn new() -> Result<Self, StorageError> {
        let base_dir = Self::default_base_dir()?;
        Self::with_base_dir(base_dir)
    }

    /// 使用指定目录创建存储服务
    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| StorageError::Unavailable(format!("创建图片存储目录失败: {}", e)))?;
        Ok(Self { base_dir })
    }

    fn default_base_dir() -> Result<PathBuf, StorageError> {
        let home = dirs::home_dir()
            .ok_or_else(|| StorageError::Unavailable("无法获取用户主目录".to_string()))?;
        Ok(home.join(".imagecast").join("blobs"))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    /// 写入一个 Blob，返回其键
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let path = self.blob_path(key);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::Io {
                key: key.to_string(),
                source: e,
            })?;
        tracing::debug!("[BlobStore] put {} ({} bytes)", key, bytes.len());
        Ok(key.to_string())
    }

    /// 读取一个 Blob，键不存在时返回 None
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let path = self.blob_path(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    /// 批量读取，只返回存在的键
    pub async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Bytes>, StorageError> {
        let reads = keys.iter().map(|key| async move {
            let bytes = self.get(key).await?;
            Ok::<_, StorageError>((key, bytes))
        });

        let mut found = HashMap::new();
        for result in futures::future::join_all(reads).await {
            let (key, bytes) = result?;
            if let Some(bytes) = bytes {
                found.insert(key.clone(), bytes);
            }
        }
        Ok(found)
    }

    /// 删除一个 Blob，键不存在时视为成功
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.blob_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("[BlobStore] delete {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    /// 检查键是否存在
    pub async fn contains(&self, key: &str) -> bool {
        tokio::fs::try_exists(self.blob_path(key))
            .await
            .unwrap_or(false)
    }
}
