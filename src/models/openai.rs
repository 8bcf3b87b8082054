//! OpenAI Images API 数据模型
//!
//! 覆盖 generations / edits / variations 三个端点的请求与响应。
//! edits 和 variations 走 multipart 表单，请求结构只用于组装参数。

use serde::{Deserialize, Serialize};

/// 文生图请求（POST /v1/images/generations，JSON 体）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    pub model: String,
    pub prompt: String,
    pub n: u32,
    pub size: String,
    /// gpt-image-1 的质量参数（low / medium / high / auto）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    /// dall-e 系列要求显式指定 b64_json 才返回内联图片
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
}

/// 图片编辑请求（POST /v1/images/edits，multipart 表单）
#[derive(Debug, Clone)]
pub struct ImageEditRequest {
    pub model: String,
    pub prompt: String,
    pub n: u32,
    pub size: String,
    /// 源图 PNG 字节
    pub image: Vec<u8>,
    /// 蒙版 PNG 字节（透明区域为可编辑区域）
    pub mask: Option<Vec<u8>>,
}

/// 图片变体请求（POST /v1/images/variations，multipart 表单）
#[derive(Debug, Clone)]
pub struct ImageVariationRequest {
    pub model: String,
    pub n: u32,
    pub size: String,
    pub image: Vec<u8>,
}

/// 响应中的单张图片
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// 响应中的 token 用量明细
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiTokenDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_tokens: Option<u64>,
}

/// 响应中的 token 用量
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUsage {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens_details: Option<ApiTokenDetails>,
}

/// Images API 成功响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesApiResponse {
    /// 服务端完成时间（Unix 秒）
    pub created: i64,
    pub data: Vec<GeneratedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ApiUsage>,
}

/// OpenAI 错误响应体：`{"error": {"message": "...", ...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIErrorBody {
    pub error: OpenAIErrorInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIErrorInfo {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<serde_json::Value>,
}
