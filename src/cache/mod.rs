//! 图片句柄缓存
//!
//! 进程内的键 → 可渲染句柄（data URL 字符串）映射，对应浏览器
//! 里的 Object URL：同一个键最多持有一个活跃句柄，Blob 被删除
//! 时句柄必须一并失效，否则前端会拿到陈旧图片。
//!
//! 每个键挂一个 `OnceCell`，并发 resolve 同一个未缓存的键时
//! 收敛到一次底层读取，不会产生重复句柄。缓存不持久化，
//! 进程生命周期内有效。

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::storage::{BlobStore, StorageError};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// 图片句柄缓存
pub struct ImageCache {
    blob_store: Arc<BlobStore>,
    /// 键 → 句柄单元。句柄为 None 表示该键在 Blob Store 中不存在
    /// （负缓存在 invalidate 时同样被清除）。
    entries: DashMap<String, Arc<OnceCell<Option<String>>>>,
}

impl ImageCache {
    pub fn new(blob_store: Arc<BlobStore>) -> Self {
        Self {
            blob_store,
            entries: DashMap::new(),
        }
    }

    /// 解析一个键的可渲染句柄
    ///
    /// 首次调用读取 Blob Store 并编码为 data URL，之后在失效前
    /// 幂等返回同一个句柄。键不存在时返回 Ok(None)。
    pub async fn resolve(&self, key: &str) -> Result<Option<String>, StorageError> {
        let cell = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let handle = cell
            .get_or_try_init(|| async {
                let bytes = self.blob_store.get(key).await?;
                match bytes {
                    Some(bytes) => {
                        tracing::debug!("[ImageCache] resolve {} ({} bytes)", key, bytes.len());
                        Ok::<_, StorageError>(Some(to_data_url(&bytes)))
                    }
                    None => Ok(None),
                }
            })
            .await?
            .clone();

        // 不缓存"不存在"：键可能稍后才被写入
        if handle.is_none() {
            self.entries.remove(key);
        }
        Ok(handle)
    }

    /// 批量解析，只返回解析成功的键
    ///
    /// 逐键走 resolve，天然去重在途请求。单键失败记录警告后
    /// 跳过，不影响其余键。
    pub async fn resolve_many(&self, keys: &[String]) -> Vec<(String, String)> {
        let mut resolved = Vec::with_capacity(keys.len());
        for key in keys {
            match self.resolve(key).await {
                Ok(Some(handle)) => resolved.push((key.clone(), handle)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("[ImageCache] resolve {} 失败: {}", key, e);
                }
            }
        }
        resolved
    }

    /// 使一个键的句柄失效
    ///
    /// 删除 Blob 的每条路径都必须调用，之后的 resolve 会重新
    /// 读取存储而不是返回陈旧句柄。
    pub fn invalidate(&self, key: &str) {
        if self.entries.remove(key).is_some() {
            tracing::debug!("[ImageCache] invalidate {}", key);
        }
    }

    /// 当前缓存的条目数（含未完成的解析）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 把图片字节编码为自描述的 data URL
pub fn to_data_url(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", sniff_mime(bytes), BASE64.encode(bytes))
}

/// 从魔数判断图片 MIME 类型，未知时按 PNG 处理
fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP") {
        "image/webp"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "image/png"
    }
}
