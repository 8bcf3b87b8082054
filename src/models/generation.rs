//! 生成历史数据模型
//!
//! 定义一次生成请求/响应周期的历史记录结构，以及
//! 记录与图片 Blob 之间的键关联协议。

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 生成类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    /// 文生图
    Generate,
    /// 图片编辑（带蒙版）
    Edit,
    /// 图片变体
    Variation,
}

/// Blob 键的角色部分
///
/// 每条记录的图片按角色存入 Blob Store：
/// - `result`: 生成结果（带序号）
/// - `original`: 编辑/变体的源图
/// - `mask`: 编辑用的蒙版
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobRole {
    Result,
    Original,
    Mask,
}

impl BlobRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobRole::Result => "result",
            BlobRole::Original => "original",
            BlobRole::Mask => "mask",
        }
    }

    /// 派生 Blob Store 键：`{recordId}_{role}[_{index}]`
    ///
    /// 只有 result 角色携带序号（一条记录可能有多张结果图）。
    pub fn blob_key(&self, record_id: &str, index: Option<usize>) -> String {
        match (self, index) {
            (BlobRole::Result, Some(i)) => format!("{}_{}_{}", record_id, self.as_str(), i),
            _ => format!("{}_{}", record_id, self.as_str()),
        }
    }
}

/// Token 用量明细
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_tokens: Option<u64>,
}

/// Token 用量统计（仅部分模型上报）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageInfo {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens_details: Option<TokenDetails>,
}

/// 一条生成历史记录
///
/// 只保存元数据，图片内容按键存放在 Blob Store 中。
/// 记录存在期间，其引用的每个键都应能在 Blob Store 中找到；
/// 两个存储之间没有事务保证，多步写入中的短暂不一致视为
/// 可恢复状态而非损坏。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    /// 唯一 ID（时间派生，导入导出后保持稳定）
    pub id: String,
    /// 生成类型，创建后不变
    pub kind: GenerationKind,
    /// 提示词（变体请求没有提示词）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// 图片尺寸，如 "1024x1024"
    pub size: String,
    /// 请求的图片数量
    pub image_count: u32,
    /// 估算费用（美元）
    pub cost: f64,
    /// 模型 ID
    pub model: String,
    /// 本地创建时间（Unix 毫秒，排序键）
    pub created_at: i64,
    /// 服务端上报的完成时间（Unix 毫秒）
    pub request_time: i64,
    /// 结果图片的 Blob 键，成功时长度等于 image_count
    pub result_image_keys: Vec<String>,
    /// 源图键（仅 edit/variation）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_image_key: Option<String>,
    /// 蒙版键（仅 edit）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_image_key: Option<String>,
    /// Token 用量（仅部分模型上报）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,
}

impl GenerationRecord {
    /// 收集记录引用的全部 Blob 键（结果 + 源图 + 蒙版）
    pub fn all_blob_keys(&self) -> Vec<String> {
        let mut keys = self.result_image_keys.clone();
        if let Some(key) = &self.source_image_key {
            keys.push(key.clone());
        }
        if let Some(key) = &self.mask_image_key {
            keys.push(key.clone());
        }
        keys
    }
}

/// 生成新的记录 ID
///
/// 毫秒时间戳 + 三位随机数，近似单调递增且足够避免
/// 同一毫秒内的冲突。
pub fn new_record_id() -> String {
    let now = Utc::now().timestamp_millis();
    let suffix: u16 = rand::thread_rng().gen_range(0..1000);
    format!("{}{:03}", now, suffix)
}

/// 按模型/尺寸/数量估算费用（美元）
///
/// 价格表来自各模型的公开定价，未知组合按 0 计。
pub fn estimate_cost(model: &str, size: &str, image_count: u32) -> f64 {
    let per_image = match model {
        "gpt-image-1" => match size {
            "1024x1024" => 0.042,
            "1024x1536" | "1536x1024" => 0.063,
            _ => 0.042,
        },
        "dall-e-3" => match size {
            "1024x1024" => 0.04,
            "1024x1792" | "1792x1024" => 0.08,
            _ => 0.04,
        },
        "dall-e-2" => match size {
            "1024x1024" => 0.02,
            "512x512" => 0.018,
            "256x256" => 0.016,
            _ => 0.02,
        },
        _ => 0.0,
    };
    per_image * image_count as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_key_format() {
        assert_eq!(
            BlobRole::Result.blob_key("1700000000000123", Some(0)),
            "1700000000000123_result_0"
        );
        assert_eq!(
            BlobRole::Original.blob_key("1700000000000123", None),
            "1700000000000123_original"
        );
        assert_eq!(
            BlobRole::Mask.blob_key("1700000000000123", None),
            "1700000000000123_mask"
        );
    }

    #[test]
    fn test_record_id_is_time_derived() {
        let before = Utc::now().timestamp_millis();
        let id = new_record_id();
        let after = Utc::now().timestamp_millis();

        // 前 13 位是毫秒时间戳，后 3 位是随机数
        assert_eq!(id.len(), 16);
        let ts: i64 = id[..13].parse().unwrap();
        assert!(ts >= before && ts <= after);
    }

    #[test]
    fn test_all_blob_keys() {
        let record = GenerationRecord {
            id: "100".to_string(),
            kind: GenerationKind::Edit,
            prompt: Some("a cat".to_string()),
            size: "1024x1024".to_string(),
            image_count: 2,
            cost: 0.084,
            model: "gpt-image-1".to_string(),
            created_at: 0,
            request_time: 0,
            result_image_keys: vec!["100_result_0".to_string(), "100_result_1".to_string()],
            source_image_key: Some("100_original".to_string()),
            mask_image_key: Some("100_mask".to_string()),
            usage: None,
        };
        let keys = record.all_blob_keys();
        assert_eq!(keys.len(), 4);
        assert!(keys.contains(&"100_mask".to_string()));
    }

    #[test]
    fn test_serde_camel_case() {
        let record = GenerationRecord {
            id: "1".to_string(),
            kind: GenerationKind::Generate,
            prompt: None,
            size: "512x512".to_string(),
            image_count: 1,
            cost: 0.018,
            model: "dall-e-2".to_string(),
            created_at: 1,
            request_time: 2,
            result_image_keys: vec![],
            source_image_key: None,
            mask_image_key: None,
            usage: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("imageCount").is_some());
        assert!(json.get("resultImageKeys").is_some());
        // None 字段不序列化
        assert!(json.get("prompt").is_none());
        assert_eq!(json.get("kind").unwrap(), "generate");
    }

    #[test]
    fn test_estimate_cost() {
        assert_eq!(estimate_cost("dall-e-3", "1024x1024", 2), 0.08);
        assert_eq!(estimate_cost("dall-e-2", "256x256", 1), 0.016);
        assert_eq!(estimate_cost("unknown-model", "1024x1024", 3), 0.0);
    }
}
