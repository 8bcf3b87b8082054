//! 应用服务组装
//!
//! 持有全部存储与服务实例，把"生成 → 落盘 → 入账"与
//! "导出 / 导入 → 并账"两条完整工作流串起来。前端（或
//! 任何调用方）只跟这里的方法打交道。

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};

use crate::backup::{ExportService, ImportResult, ImportService};
use crate::cache::ImageCache;
use crate::history::{HistoryService, NewGeneration, SaveOutcome, DEFAULT_HISTORY_CAP};
use crate::models::openai::{ImageEditRequest, ImageGenerationRequest, ImageVariationRequest};
use crate::models::{GenerationKind, GenerationRecord};
use crate::providers::OpenAIImageProvider;
use crate::storage::{AppPaths, BlobStore, SettingsStore, StorageError, API_KEY_KEY};

/// 应用服务集合
pub struct AppServices {
    pub blob_store: Arc<BlobStore>,
    pub settings: Arc<SettingsStore>,
    pub cache: Arc<ImageCache>,
    pub history: Arc<HistoryService>,
}

impl AppServices {
    /// 用默认数据目录（~/.imagecast）初始化
    pub fn init() -> Result<Self, StorageError> {
        let home = dirs::home_dir()
            .ok_or_else(|| StorageError::Unavailable("无法获取用户主目录".to_string()))?;
        Self::with_data_dir(home.join(".imagecast"), DEFAULT_HISTORY_CAP)
    }

    /// 用指定数据目录初始化（测试用临时目录）
    pub fn with_data_dir(data_dir: PathBuf, history_cap: usize) -> Result<Self, StorageError> {
        let paths = AppPaths { data_dir };
        let blob_store = Arc::new(BlobStore::with_base_dir(paths.blobs_dir())?);
        let settings = Arc::new(SettingsStore::open(paths.database_path())?);
        let cache = Arc::new(ImageCache::new(blob_store.clone()));
        let history = Arc::new(HistoryService::new(
            blob_store.clone(),
            settings.clone(),
            cache.clone(),
            history_cap,
        ));
        Ok(Self {
            blob_store,
            settings,
            cache,
            history,
        })
    }

    // ========================================================================
    // API 凭证
    // ========================================================================

    pub fn api_key(&self) -> Result<Option<String>, StorageError> {
        self.settings.get_value(API_KEY_KEY)
    }

    pub fn set_api_key(&self, key: &str) -> Result<(), StorageError> {
        self.settings.set_value(API_KEY_KEY, key)
    }

    fn provider(&self) -> anyhow::Result<OpenAIImageProvider> {
        let key = self
            .api_key()?
            .ok_or_else(|| anyhow!("尚未配置 API Key"))?;
        Ok(OpenAIImageProvider::new(key))
    }

    // ========================================================================
    // 生成工作流：请求 API → 图片落盘 → 记录入账
    // ========================================================================

    /// 文生图并入账
    pub async fn generate(
        &self,
        request: ImageGenerationRequest,
    ) -> anyhow::Result<SaveOutcome> {
        let provider = self.provider()?;
        let response = provider.generate(&request).await?;
        let outcome = self
            .history
            .record_generation(NewGeneration {
                kind: GenerationKind::Generate,
                prompt: Some(request.prompt),
                model: request.model,
                size: request.size,
                request_time: response.created_at,
                usage: response.usage,
                images: response.images,
                source_image: None,
                mask_image: None,
            })
            .await?;
        Ok(outcome)
    }

    /// 图片编辑并入账
    pub async fn edit(&self, request: ImageEditRequest) -> anyhow::Result<SaveOutcome> {
        let provider = self.provider()?;
        let response = provider.edit(&request).await?;
        let outcome = self
            .history
            .record_generation(NewGeneration {
                kind: GenerationKind::Edit,
                prompt: Some(request.prompt),
                model: request.model,
                size: request.size,
                request_time: response.created_at,
                usage: response.usage,
                images: response.images,
                source_image: Some(request.image.into()),
                mask_image: request.mask.map(Into::into),
            })
            .await?;
        Ok(outcome)
    }

    /// 图片变体并入账（变体没有提示词）
    pub async fn variation(&self, request: ImageVariationRequest) -> anyhow::Result<SaveOutcome> {
        let provider = self.provider()?;
        let response = provider.variation(&request).await?;
        let outcome = self
            .history
            .record_generation(NewGeneration {
                kind: GenerationKind::Variation,
                prompt: None,
                model: request.model,
                size: request.size,
                request_time: response.created_at,
                usage: response.usage,
                images: response.images,
                source_image: Some(request.image.into()),
                mask_image: None,
            })
            .await?;
        Ok(outcome)
    }

    // ========================================================================
    // 备份工作流
    // ========================================================================

    /// 把完整历史导出为备份 JSON 文本
    pub async fn export_history(&self) -> anyhow::Result<String> {
        let records = self.history.list_records();
        ExportService::export_to_string(&records, &self.blob_store)
            .await
            .context("导出历史失败")
    }

    /// 导入备份并并入在线账本
    ///
    /// 顶层校验失败整体拒绝、零副作用；成功后新记录已经
    /// 在账本中（并按容量上限完成了可能的淘汰清理）。
    pub async fn import_history(&self, raw: &str) -> anyhow::Result<ImportResult> {
        let existing: HashSet<String> = self.history.existing_ids();
        let result = ImportService::import(raw, &existing, &self.blob_store).await?;
        self.history
            .merge_records(result.new_records.clone())
            .await?;
        Ok(result)
    }

    // ========================================================================
    // 查询
    // ========================================================================

    pub fn list_history(&self) -> Vec<GenerationRecord> {
        self.history.list_records()
    }

    pub async fn resolve_image(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.history.resolve_image(key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BACKUP_VERSION;
    use bytes::Bytes;
    use tempfile::TempDir;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 7];

    fn create_app(cap: usize) -> (AppServices, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let app = AppServices::with_data_dir(temp_dir.path().to_path_buf(), cap).unwrap();
        (app, temp_dir)
    }

    async fn seed_record(app: &AppServices, prompt: &str) -> GenerationRecord {
        app.history
            .record_generation(NewGeneration {
                kind: GenerationKind::Generate,
                prompt: Some(prompt.to_string()),
                model: "gpt-image-1".to_string(),
                size: "1024x1024".to_string(),
                request_time: 1_700_000_000_000,
                usage: None,
                images: vec![Bytes::from_static(PNG)],
                source_image: None,
                mask_image: None,
            })
            .await
            .unwrap()
            .record
    }

    #[test]
    fn test_api_key_roundtrip() {
        let (app, _temp) = create_app(100);
        assert!(app.api_key().unwrap().is_none());
        app.set_api_key("sk-test").unwrap();
        assert_eq!(app.api_key().unwrap().as_deref(), Some("sk-test"));
    }

    #[tokio::test]
    async fn test_export_import_into_empty_app() {
        let (source, _t1) = create_app(100);
        seed_record(&source, "one").await;
        seed_record(&source, "two").await;
        seed_record(&source, "three").await;

        let raw = source.export_history().await.unwrap();

        let (target, _t2) = create_app(100);
        let result = target.import_history(&raw).await.unwrap();
        assert_eq!(result.imported, 3);
        assert_eq!(result.skipped, 0);

        let history = target.list_history();
        assert_eq!(history.len(), 3);
        // 每条记录的图片都可渲染
        for record in &history {
            for key in record.all_blob_keys() {
                assert!(target.resolve_image(&key).await.unwrap().is_some());
            }
        }
    }

    #[tokio::test]
    async fn test_import_skips_duplicates_without_touching_existing() {
        let (app, _temp) = create_app(100);
        let record = seed_record(&app, "original prompt").await;
        let raw = app.export_history().await.unwrap();

        let result = app.import_history(&raw).await.unwrap();
        assert_eq!(result.imported, 0);
        assert_eq!(result.skipped, 1);

        // 已有记录原样保留，没有重复
        let history = app.list_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, record.id);
        assert_eq!(history[0].prompt.as_deref(), Some("original prompt"));
    }

    #[tokio::test]
    async fn test_import_bad_version_mutates_nothing() {
        let (app, _temp) = create_app(100);
        seed_record(&app, "keep me").await;
        let raw = app.export_history().await.unwrap();

        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        value["version"] = serde_json::json!(BACKUP_VERSION + 1);

        let err = app.import_history(&value.to_string()).await;
        assert!(err.is_err());
        assert_eq!(app.list_history().len(), 1);
    }

    #[tokio::test]
    async fn test_import_reapplies_cap() {
        let (source, _t1) = create_app(100);
        for i in 0..5 {
            seed_record(&source, &format!("p{}", i)).await;
        }
        let raw = source.export_history().await.unwrap();

        // 目标容量只有 3，导入后从旧到新淘汰
        let (target, _t2) = create_app(3);
        let result = target.import_history(&raw).await.unwrap();
        assert_eq!(result.imported, 5);
        assert_eq!(target.list_history().len(), 3);
    }
}
