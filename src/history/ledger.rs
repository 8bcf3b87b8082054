//! 历史账本
//!
//! 有序的生成记录列表，最新在前，容量封顶。账本是"存在哪些
//! 历史"的唯一事实来源，但它只管理元数据顺序，不触碰 Blob
//! 存储——容量淘汰时把被挤出的记录交还调用方清理。

use std::collections::HashSet;

use crate::models::GenerationRecord;
use crate::storage::{SettingsStore, StorageError, HISTORY_KEY};

/// 默认容量上限
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// 历史账本
pub struct HistoryLedger {
    records: Vec<GenerationRecord>,
    cap: usize,
}

impl HistoryLedger {
    pub fn new(cap: usize) -> Self {
        Self {
            records: Vec::new(),
            cap,
        }
    }

    /// 从设置存储加载账本
    ///
    /// 值缺失或损坏都按空历史处理，绝不报错。
    pub fn load(settings: &SettingsStore, cap: usize) -> Self {
        let records: Vec<GenerationRecord> = match settings.get_json(HISTORY_KEY) {
            Ok(Some(records)) => records,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!("[HistoryLedger] 加载历史失败，按空历史处理: {}", e);
                Vec::new()
            }
        };
        tracing::info!("[HistoryLedger] Loaded {} records", records.len());
        Self { records, cap }
    }

    /// 持久化整个账本到设置存储
    pub fn persist(&self, settings: &SettingsStore) -> Result<(), StorageError> {
        settings.set_json(HISTORY_KEY, &self.records)
    }

    /// 头部插入一条记录
    ///
    /// 超出容量时弹出最旧的一条并返回，由调用方负责清理其
    /// 关联的 Blob 与缓存句柄。一次 append 至多淘汰一条。
    pub fn append(&mut self, record: GenerationRecord) -> Option<GenerationRecord> {
        self.records.insert(0, record);
        if self.records.len() > self.cap {
            self.records.pop()
        } else {
            None
        }
    }

    /// 移除所有匹配 ID 的记录并返回
    pub fn remove(&mut self, ids: &HashSet<String>) -> Vec<GenerationRecord> {
        let mut removed = Vec::new();
        self.records.retain(|r| {
            if ids.contains(&r.id) {
                removed.push(r.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// 全部记录，最新在前
    pub fn list(&self) -> &[GenerationRecord] {
        &self.records
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}
