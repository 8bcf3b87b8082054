//! 历史服务
//!
//! 账本与 Blob 存储之间的关联与顺序协议：
//! - 创建记录：先写全部图片 Blob 收集键，再构造记录登记进账本
//!   （账本绝不引用未写入的键）
//! - 删除记录：先尽力删除引用的 Blob 并使缓存句柄失效，
//!   再从账本移除（孤儿 Blob 是无害垃圾，不是损坏）
//! - 容量淘汰走同一条删除路径，且清理失败绝不影响新记录的可见性
//!
//! 两个存储之间没有事务，一致性完全由这里的操作顺序维护。

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;

use crate::cache::ImageCache;
use crate::models::{
    estimate_cost, new_record_id, BlobRole, GenerationKind, GenerationRecord, UsageInfo,
};
use crate::storage::{BlobStore, SettingsStore, StorageError};

use super::ledger::HistoryLedger;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// 一次待登记的生成结果
#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub kind: GenerationKind,
    pub prompt: Option<String>,
    pub model: String,
    pub size: String,
    /// 服务端上报的完成时间（Unix 毫秒）
    pub request_time: i64,
    pub usage: Option<UsageInfo>,
    /// 生成结果图片
    pub images: Vec<Bytes>,
    /// 源图（仅 edit/variation）
    pub source_image: Option<Bytes>,
    /// 蒙版（仅 edit）
    pub mask_image: Option<Bytes>,
}

/// 记录创建结果
///
/// 部分图片写入失败时记录仍会带着写成功的键入账
/// （昂贵的生成结果不应因本地写盘失败而全部丢弃），
/// 但失败必须通过 warnings 上报给用户，绝不静默。
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub record: GenerationRecord,
    /// 用户可见的告警（部分写入失败、账本持久化失败）
    pub warnings: Vec<String>,
}

/// 历史服务
pub struct HistoryService {
    blob_store: Arc<BlobStore>,
    settings: Arc<SettingsStore>,
    cache: Arc<ImageCache>,
    ledger: Mutex<HistoryLedger>,
}

impl HistoryService {
    pub fn new(
        blob_store: Arc<BlobStore>,
        settings: Arc<SettingsStore>,
        cache: Arc<ImageCache>,
        cap: usize,
    ) -> Self {
        let ledger = HistoryLedger::load(&settings, cap);
        Self {
            blob_store,
            settings,
            cache,
            ledger: Mutex::new(ledger),
        }
    }

    /// 登记一次生成结果
    ///
    /// 顺序：写 Blob → 构造记录 → 入账并持久化 → 清理被淘汰的
    /// 旧记录。淘汰清理在新记录已经可见之后进行，它的失败
    /// 只记日志，不会回滚或遮蔽新记录。
    pub async fn record_generation(
        &self,
        generation: NewGeneration,
    ) -> Result<SaveOutcome, HistoryError> {
        let id = new_record_id();
        let mut warnings = Vec::new();

        // 1. 先写全部图片 Blob，收集写成功的键
        let mut result_keys = Vec::new();
        for (i, image) in generation.images.iter().enumerate() {
            let key = BlobRole::Result.blob_key(&id, Some(i));
            match self.blob_store.put(&key, image).await {
                Ok(key) => result_keys.push(key),
                Err(e) => {
                    tracing::error!("[HistoryService] 结果图片保存失败 {}: {}", key, e);
                    warnings.push(format!("第 {} 张结果图片未能保存: {}", i + 1, e));
                }
            }
        }

        let source_image_key = match &generation.source_image {
            Some(bytes) => {
                let key = BlobRole::Original.blob_key(&id, None);
                match self.blob_store.put(&key, bytes).await {
                    Ok(key) => Some(key),
                    Err(e) => {
                        tracing::error!("[HistoryService] 源图保存失败 {}: {}", key, e);
                        warnings.push(format!("源图未能保存: {}", e));
                        None
                    }
                }
            }
            None => None,
        };

        let mask_image_key = match &generation.mask_image {
            Some(bytes) => {
                let key = BlobRole::Mask.blob_key(&id, None);
                match self.blob_store.put(&key, bytes).await {
                    Ok(key) => Some(key),
                    Err(e) => {
                        tracing::error!("[HistoryService] 蒙版保存失败 {}: {}", key, e);
                        warnings.push(format!("蒙版未能保存: {}", e));
                        None
                    }
                }
            }
            None => None,
        };

        // 2. 构造记录，只引用写成功的键
        let image_count = result_keys.len() as u32;
        let cost = estimate_cost(&generation.model, &generation.size, image_count);
        let record = GenerationRecord {
            id: id.clone(),
            kind: generation.kind,
            prompt: generation.prompt,
            size: generation.size,
            image_count,
            cost,
            model: generation.model,
            created_at: chrono::Utc::now().timestamp_millis(),
            request_time: generation.request_time,
            result_image_keys: result_keys,
            source_image_key,
            mask_image_key,
            usage: generation.usage,
        };

        // 3. 入账并持久化
        let evicted = {
            let mut ledger = self.ledger.lock();
            let evicted = ledger.append(record.clone());
            if let Err(e) = ledger.persist(&self.settings) {
                tracing::error!("[HistoryService] 历史持久化失败: {}", e);
                warnings.push(format!("历史记录未能写入本地存储: {}", e));
            }
            evicted
        };

        // 4. 新记录已可见，再清理被淘汰的旧记录
        if let Some(evicted) = evicted {
            tracing::info!(
                "[HistoryService] History cap reached, evicting record {}",
                evicted.id
            );
            self.cleanup_record(&evicted).await;
        }

        tracing::info!(
            "[HistoryService] Recorded generation {} ({} images)",
            record.id,
            record.image_count
        );
        Ok(SaveOutcome { record, warnings })
    }

    /// 删除一组记录
    ///
    /// 顺序：删 Blob（尽力）→ 失效缓存句柄 → 从账本移除并持久化。
    /// 单个 Blob 删除失败只记日志，不阻塞其余条目和账本移除。
    pub async fn delete_records(&self, ids: &HashSet<String>) -> Result<usize, HistoryError> {
        let targets: Vec<GenerationRecord> = {
            let ledger = self.ledger.lock();
            ledger
                .list()
                .iter()
                .filter(|r| ids.contains(&r.id))
                .cloned()
                .collect()
        };

        for record in &targets {
            self.cleanup_record(record).await;
        }

        let removed = {
            let mut ledger = self.ledger.lock();
            let removed = ledger.remove(ids);
            ledger.persist(&self.settings)?;
            removed
        };

        tracing::info!("[HistoryService] Deleted {} records", removed.len());
        Ok(removed.len())
    }

    /// 尽力清理一条记录引用的所有 Blob 与缓存句柄
    async fn cleanup_record(&self, record: &GenerationRecord) {
        for key in record.all_blob_keys() {
            if let Err(e) = self.blob_store.delete(&key).await {
                tracing::warn!("[HistoryService] Blob 清理失败 {}: {}", key, e);
            }
            self.cache.invalidate(&key);
        }
    }

    /// 全部记录，最新在前
    pub fn list_records(&self) -> Vec<GenerationRecord> {
        self.ledger.lock().list().to_vec()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ledger.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.ledger.lock().len()
    }

    /// 当前历史中的全部记录 ID
    pub fn existing_ids(&self) -> HashSet<String> {
        self.ledger
            .lock()
            .list()
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }

    /// 解析单个键的可渲染句柄
    pub async fn resolve_image(&self, key: &str) -> Result<Option<String>, HistoryError> {
        Ok(self.cache.resolve(key).await?)
    }

    /// 批量解析（渲染可见历史窗口用）
    pub async fn resolve_images(&self, keys: &[String]) -> Vec<(String, String)> {
        self.cache.resolve_many(keys).await
    }

    /// 把导入的记录并入账本
    ///
    /// 按创建时间从旧到新逐条头插，保持最新在前的顺序，
    /// 并通过正常的 append 路径重新套用容量上限——超容时
    /// 被挤出的记录和普通淘汰一样被清理。
    pub async fn merge_records(
        &self,
        mut new_records: Vec<GenerationRecord>,
    ) -> Result<(), HistoryError> {
        new_records.sort_by_key(|r| r.created_at);

        let mut evicted_all = Vec::new();
        {
            let mut ledger = self.ledger.lock();
            for record in new_records {
                if let Some(evicted) = ledger.append(record) {
                    evicted_all.push(evicted);
                }
            }
            ledger.persist(&self.settings)?;
        }

        for evicted in evicted_all {
            self.cleanup_record(&evicted).await;
        }
        Ok(())
    }
}
