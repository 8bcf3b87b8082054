//! 设置存储
//!
//! SQLite settings 表（key TEXT PRIMARY KEY, value TEXT），
//! 与 Blob 存储相互独立。历史账本序列化为一个 JSON 值存在
//! 专用键下，API 凭证单独占一个键。

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::StorageError;

/// 历史账本的存储键
pub const HISTORY_KEY: &str = "generation_history";
/// API 凭证的存储键
pub const API_KEY_KEY: &str = "openai_api_key";

/// 设置存储服务
pub struct SettingsStore {
    conn: Mutex<Connection>,
}

impl SettingsStore {
    /// 打开默认位置的数据库（~/.imagecast/imagecast.db）
    pub fn new() -> Result<Self, StorageError> {
        let home = dirs::home_dir()
            .ok_or_else(|| StorageError::Unavailable("无法获取用户主目录".to_string()))?;
        let dir = home.join(".imagecast");
        std::fs::create_dir_all(&dir)
            .map_err(|e| StorageError::Unavailable(format!("创建数据目录失败: {}", e)))?;
        Self::open(dir.join("imagecast.db"))
    }

    /// 打开指定路径的数据库
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StorageError::Unavailable(format!("打开设置数据库失败: {}", e)))?;
        Self::create_tables(&conn)?;
        tracing::info!(
            "[SettingsStore] Database opened: {}",
            path.as_ref().display()
        );
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 内存数据库，仅用于测试
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn create_tables(conn: &Connection) -> Result<(), StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// 读取一个设置值
    pub fn get_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入一个设置值（存在则覆盖）
    pub fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// 删除一个设置值
    pub fn delete_value(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// 读取并反序列化一个 JSON 设置值
    ///
    /// 值缺失返回 None；值损坏同样返回 None（记录警告），
    /// 调用方据此回退到默认状态，绝不视为致命错误。
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.get_value(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("[SettingsStore] 设置值 {} 损坏，按缺失处理: {}", key, e);
                Ok(None)
            }
        }
    }

    /// 序列化并写入一个 JSON 设置值
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.set_value(key, &raw)
    }
}

/// 应用数据目录布局
pub struct AppPaths {
    pub data_dir: PathBuf,
}

impl AppPaths {
    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("imagecast.db")
    }
}
