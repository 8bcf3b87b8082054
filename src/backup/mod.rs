//! 历史备份导入导出
//!
//! 备份是单个 JSON 文档：
//! `{version: 1, exportedAt: <ms>, records: [{record, images}]}`，
//! 图片以自描述的 data URL 内联（MIME + base64 内容），
//! 因此一个文件即可在环境之间完整迁移。
//!
//! 导入端对顶层结构严格校验：version 必须精确等于支持的值，
//! 不认识的版本直接拒绝而不是猜测。校验失败零副作用。

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::to_data_url;
use crate::models::{BlobRole, GenerationRecord};
use crate::storage::{BlobStore, StorageError};

/// 当前支持的备份版本
pub const BACKUP_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("序列化备份失败: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("备份文件不是有效的 JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("备份文件格式不正确: {0}")]
    InvalidShape(String),

    #[error("不支持的备份版本 {found}（当前支持 {supported}）")]
    UnsupportedVersion { found: String, supported: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// 备份文档顶层结构
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupBundle {
    pub version: u64,
    pub exported_at: i64,
    pub records: Vec<BackupRecord>,
}

/// 备份中的一条记录：元数据 + 内联图片
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub record: GenerationRecord,
    pub images: BackupImages,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupImages {
    /// 结果图片的 data URL，按记录内顺序
    pub results: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
}

/// 导入结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub imported: usize,
    /// 因 ID 已存在（或条目无法解析）而跳过的记录数
    pub skipped: usize,
    /// 已写入 Blob、待并入账本的新记录
    #[serde(skip)]
    pub new_records: Vec<GenerationRecord>,
}

// ============================================================================
// 导出
// ============================================================================

/// 历史导出服务
pub struct ExportService;

impl ExportService {
    /// 把一组账本记录打包为备份文档
    ///
    /// 逐条读取引用的 Blob 并编码为 data URL；导出时缺失的
    /// Blob 只是从该记录中省略对应图片，绝不让整个导出失败。
    pub async fn export(
        records: &[GenerationRecord],
        blob_store: &BlobStore,
    ) -> Result<BackupBundle, ExportError> {
        let mut bundle_records = Vec::with_capacity(records.len());

        for record in records {
            let mut results = Vec::new();
            for key in &record.result_image_keys {
                match blob_store.get(key).await? {
                    Some(bytes) => results.push(to_data_url(&bytes)),
                    None => {
                        tracing::warn!("[Backup] 导出时缺失 Blob {}，跳过该图片", key);
                    }
                }
            }

            let original = match &record.source_image_key {
                Some(key) => blob_store.get(key).await?.map(|b| to_data_url(&b)),
                None => None,
            };
            let mask = match &record.mask_image_key {
                Some(key) => blob_store.get(key).await?.map(|b| to_data_url(&b)),
                None => None,
            };

            bundle_records.push(BackupRecord {
                record: record.clone(),
                images: BackupImages {
                    results,
                    original,
                    mask,
                },
            });
        }

        tracing::info!("[Backup] Exported {} records", bundle_records.len());
        Ok(BackupBundle {
            version: BACKUP_VERSION,
            exported_at: Utc::now().timestamp_millis(),
            records: bundle_records,
        })
    }

    /// 导出并序列化为 JSON 文本
    pub async fn export_to_string(
        records: &[GenerationRecord],
        blob_store: &BlobStore,
    ) -> Result<String, ExportError> {
        let bundle = Self::export(records, blob_store).await?;
        Ok(serde_json::to_string(&bundle)?)
    }
}

// ============================================================================
// 导入
// ============================================================================

/// 历史导入服务
pub struct ImportService;

impl ImportService {
    /// 校验并导入一份备份文档
    ///
    /// 顶层校验失败立即返回错误，不产生任何写入。逐条处理记录：
    /// ID 已存在则计入 skipped（以 ID 为唯一去重键，不比较内容）；
    /// 否则解码内联图片并写入按记录 ID 和角色新派生的键下——
    /// 绝不复用来源环境的键，避免跨环境冲突。单张图片解码失败
    /// 只丢弃该图片，记录本身保留。
    ///
    /// 调用方负责把 `new_records` 并入在线账本。
    pub async fn import(
        raw: &str,
        existing_ids: &HashSet<String>,
        blob_store: &BlobStore,
    ) -> Result<ImportResult, ImportError> {
        let bundle = Self::validate(raw)?;

        let mut imported = 0usize;
        let mut skipped = 0usize;
        let mut new_records = Vec::new();

        for entry in bundle.records {
            if existing_ids.contains(&entry.record.id) {
                skipped += 1;
                continue;
            }
            // 记录 ID 会参与派生 Blob 键（进而成为文件名），
            // 来源环境的 ID 必须是文件名安全的，否则跳过
            if !is_safe_record_id(&entry.record.id) {
                tracing::warn!("[Backup] 记录 ID {:?} 不合法，跳过", entry.record.id);
                skipped += 1;
                continue;
            }

            let record = Self::import_record(entry, blob_store).await?;
            imported += 1;
            new_records.push(record);
        }

        tracing::info!(
            "[Backup] Import finished: {} imported, {} skipped",
            imported,
            skipped
        );
        Ok(ImportResult {
            imported,
            skipped,
            new_records,
        })
    }

    /// 严格校验顶层结构
    ///
    /// version 必须精确等于 [`BACKUP_VERSION`]，exportedAt 必须是
    /// 数字，records 必须是数组。任何一条不满足都拒绝整个文件。
    pub fn validate(raw: &str) -> Result<BackupBundle, ImportError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        let obj = value
            .as_object()
            .ok_or_else(|| ImportError::InvalidShape("顶层必须是对象".to_string()))?;

        let version = obj
            .get("version")
            .ok_or_else(|| ImportError::InvalidShape("缺少 version 字段".to_string()))?;
        if version.as_u64() != Some(BACKUP_VERSION) {
            return Err(ImportError::UnsupportedVersion {
                found: version.to_string(),
                supported: BACKUP_VERSION,
            });
        }

        if !obj.get("exportedAt").map(|v| v.is_number()).unwrap_or(false) {
            return Err(ImportError::InvalidShape(
                "exportedAt 必须是数字".to_string(),
            ));
        }
        if !obj.get("records").map(|v| v.is_array()).unwrap_or(false) {
            return Err(ImportError::InvalidShape("records 必须是数组".to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }

    /// 导入单条记录：解码内联图片并写入新派生的键
    async fn import_record(
        entry: BackupRecord,
        blob_store: &BlobStore,
    ) -> Result<GenerationRecord, ImportError> {
        let mut record = entry.record;
        let id = record.id.clone();

        let mut result_keys = Vec::new();
        for (i, data_url) in entry.images.results.iter().enumerate() {
            match parse_data_url(data_url) {
                Some((_mime, bytes)) => {
                    let key = BlobRole::Result.blob_key(&id, Some(i));
                    blob_store.put(&key, &bytes).await?;
                    result_keys.push(key);
                }
                None => {
                    tracing::warn!("[Backup] 记录 {} 第 {} 张图片无法解码，跳过", id, i);
                }
            }
        }

        let source_image_key = match entry.images.original.as_deref().and_then(parse_data_url) {
            Some((_mime, bytes)) => {
                let key = BlobRole::Original.blob_key(&id, None);
                blob_store.put(&key, &bytes).await?;
                Some(key)
            }
            None => None,
        };
        let mask_image_key = match entry.images.mask.as_deref().and_then(parse_data_url) {
            Some((_mime, bytes)) => {
                let key = BlobRole::Mask.blob_key(&id, None);
                blob_store.put(&key, &bytes).await?;
                Some(key)
            }
            None => None,
        };

        record.result_image_keys = result_keys;
        record.source_image_key = source_image_key;
        record.mask_image_key = mask_image_key;
        Ok(record)
    }
}

/// 记录 ID 是否可以安全地用作文件名成分
fn is_safe_record_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// 解析 data URL：`data:image/png;base64,xxxx` → (MIME, 字节)
///
/// 结构不对或 base64 解码失败都返回 None。
pub fn parse_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime = header.split(';').next().unwrap_or("image/png").to_string();
    let bytes = BASE64.decode(data).ok()?;
    Some((mime, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenerationKind;
    use tempfile::TempDir;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 9, 9];

    fn create_test_store() -> (BlobStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = BlobStore::with_base_dir(temp_dir.path().to_path_buf()).unwrap();
        (store, temp_dir)
    }

    fn make_record(id: &str, results: usize, with_mask: bool) -> GenerationRecord {
        GenerationRecord {
            id: id.to_string(),
            kind: if with_mask {
                GenerationKind::Edit
            } else {
                GenerationKind::Generate
            },
            prompt: Some(format!("prompt {}", id)),
            size: "1024x1024".to_string(),
            image_count: results as u32,
            cost: 0.04,
            model: "dall-e-3".to_string(),
            created_at: 1_700_000_000_000,
            request_time: 1_700_000_000_500,
            result_image_keys: (0..results)
                .map(|i| BlobRole::Result.blob_key(id, Some(i)))
                .collect(),
            source_image_key: with_mask.then(|| BlobRole::Original.blob_key(id, None)),
            mask_image_key: with_mask.then(|| BlobRole::Mask.blob_key(id, None)),
            usage: None,
        }
    }

    async fn seed_blobs(store: &BlobStore, record: &GenerationRecord) {
        for key in record.all_blob_keys() {
            store.put(&key, PNG).await.unwrap();
        }
    }

    #[test]
    fn test_parse_data_url() {
        let url = to_data_url(PNG);
        let (mime, bytes) = parse_data_url(&url).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, PNG);

        assert!(parse_data_url("not a data url").is_none());
        assert!(parse_data_url("data:image/png;base64,@@@").is_none());
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() {
        let (source_store, _t1) = create_test_store();
        let records = vec![
            make_record("300", 1, false),
            make_record("200", 2, true),
            make_record("100", 1, false),
        ];
        for r in &records {
            seed_blobs(&source_store, r).await;
        }

        let raw = ExportService::export_to_string(&records, &source_store)
            .await
            .unwrap();

        // 导入到空目标环境
        let (target_store, _t2) = create_test_store();
        let result = ImportService::import(&raw, &HashSet::new(), &target_store)
            .await
            .unwrap();
        assert_eq!(result.imported, 3);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.new_records.len(), 3);

        // 元数据与图片字节都保真
        for (new, old) in result.new_records.iter().zip(&records) {
            assert_eq!(new.id, old.id);
            assert_eq!(new.prompt, old.prompt);
            assert_eq!(new.size, old.size);
            assert_eq!(new.cost, old.cost);
            assert_eq!(new.result_image_keys.len(), old.result_image_keys.len());
            for key in new.all_blob_keys() {
                let bytes = target_store.get(&key).await.unwrap().unwrap();
                assert_eq!(&bytes[..], PNG);
            }
        }
    }

    #[tokio::test]
    async fn test_import_skips_existing_ids() {
        let (source_store, _t1) = create_test_store();
        let records = vec![make_record("100", 1, false), make_record("200", 1, false)];
        for r in &records {
            seed_blobs(&source_store, r).await;
        }
        let raw = ExportService::export_to_string(&records, &source_store)
            .await
            .unwrap();

        let (target_store, _t2) = create_test_store();
        let existing: HashSet<String> = ["100".to_string()].into_iter().collect();
        let result = ImportService::import(&raw, &existing, &target_store)
            .await
            .unwrap();
        assert_eq!(result.imported, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.new_records[0].id, "200");
        // 被跳过的记录没有写入任何 Blob
        assert!(!target_store.contains("100_result_0").await);
    }

    #[tokio::test]
    async fn test_import_rejects_unknown_version() {
        let (source_store, _t1) = create_test_store();
        let records = vec![
            make_record("100", 1, false),
            make_record("200", 1, false),
            make_record("300", 1, false),
        ];
        for r in &records {
            seed_blobs(&source_store, r).await;
        }
        let raw = ExportService::export_to_string(&records, &source_store)
            .await
            .unwrap();

        // 把 version 篡改为 2
        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        value["version"] = serde_json::json!(2);
        let corrupted = value.to_string();

        let (target_store, _t2) = create_test_store();
        let err = ImportService::import(&corrupted, &HashSet::new(), &target_store)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedVersion { .. }));
        // 零副作用
        assert!(!target_store.contains("100_result_0").await);
    }

    #[tokio::test]
    async fn test_import_rejects_invalid_shape() {
        let (store, _t) = create_test_store();

        for bad in [
            "not json at all",
            r#"{"exportedAt": 1, "records": []}"#,
            r#"{"version": 1, "exportedAt": "yesterday", "records": []}"#,
            r#"{"version": 1, "exportedAt": 1, "records": {}}"#,
        ] {
            let result = ImportService::import(bad, &HashSet::new(), &store).await;
            assert!(result.is_err(), "should reject: {}", bad);
        }
    }

    #[tokio::test]
    async fn test_unreadable_image_degrades_per_record() {
        let (source_store, _t1) = create_test_store();
        let record = make_record("100", 2, false);
        seed_blobs(&source_store, &record).await;
        let bundle = ExportService::export(&[record], &source_store).await.unwrap();

        // 破坏第一张图片的 base64 内容
        let mut value = serde_json::to_value(&bundle).unwrap();
        value["records"][0]["images"]["results"][0] =
            serde_json::json!("data:image/png;base64,%%%%");
        let raw = value.to_string();

        let (target_store, _t2) = create_test_store();
        let result = ImportService::import(&raw, &HashSet::new(), &target_store)
            .await
            .unwrap();
        // 记录保留，只丢弃坏图片；键保持原序号
        assert_eq!(result.imported, 1);
        let record = &result.new_records[0];
        assert_eq!(record.result_image_keys.len(), 1);
        assert_eq!(record.result_image_keys[0], "100_result_1");
    }

    #[tokio::test]
    async fn test_import_skips_unsafe_record_id() {
        let (store, _t) = create_test_store();
        let raw = serde_json::json!({
            "version": 1,
            "exportedAt": 1_700_000_000_000i64,
            "records": [{
                "record": make_record("../escape", 0, false),
                "images": {"results": []}
            }]
        })
        .to_string();

        let result = ImportService::import(&raw, &HashSet::new(), &store)
            .await
            .unwrap();
        assert_eq!(result.imported, 0);
        assert_eq!(result.skipped, 1);
    }

    #[tokio::test]
    async fn test_export_omits_missing_blob() {
        let (store, _t) = create_test_store();
        let record = make_record("100", 2, true);
        seed_blobs(&store, &record).await;
        // 第二张结果图在导出前丢失
        store.delete("100_result_1").await.unwrap();

        let bundle = ExportService::export(&[record], &store).await.unwrap();
        assert_eq!(bundle.records.len(), 1);
        assert_eq!(bundle.records[0].images.results.len(), 1);
        assert!(bundle.records[0].images.mask.is_some());
    }
}
