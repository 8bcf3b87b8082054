//! 本地持久化存储
//!
//! 两个相互独立的本地存储：
//! - [`BlobStore`]: 按键存放图片二进制内容（文件落盘）
//! - [`SettingsStore`]: 存放历史账本 JSON 与 API 凭证（SQLite settings 表）
//!
//! 两者之间没有事务关联，一致性由上层的写入顺序协议维护
//! （先写 Blob 再登记，先删 Blob 再注销）。

mod blob_store;
mod settings;

pub use blob_store::BlobStore;
pub use settings::{AppPaths, SettingsStore, API_KEY_KEY, HISTORY_KEY};

use thiserror::Error;

/// 存储层错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 存储不可用（目录无法创建、数据库无法打开）
    #[error("存储不可用: {0}")]
    Unavailable(String),

    /// 单次读写失败
    #[error("存储操作失败 ({key}): {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("数据库操作失败: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
}
