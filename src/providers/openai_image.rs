//! OpenAI Images API Provider
//!
//! 覆盖 generations（JSON）、edits 与 variations（multipart）
//! 三个端点。响应里的 b64_json 在这里解码成字节，上层只见
//! 二进制图片。服务端的错误信息原样透传给用户，不做自动重试——
//! 失败后工作区状态（提示词、源图、蒙版）由前端保留，用户手动重试。

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use thiserror::Error;

use crate::models::openai::{
    ImageEditRequest, ImageGenerationRequest, ImageVariationRequest, ImagesApiResponse,
    OpenAIErrorBody,
};
use crate::models::UsageInfo;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum GenerationError {
    /// 服务端返回的错误，message 为服务商原文
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("请求发送失败: {0}")]
    Network(#[from] reqwest::Error),

    #[error("响应解析失败: {0}")]
    InvalidResponse(String),
}

/// 一次成功生成的结果
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    /// 解码后的图片字节
    pub images: Vec<Bytes>,
    /// 服务端上报的完成时间（Unix 毫秒）
    pub created_at: i64,
    pub usage: Option<UsageInfo>,
}

/// OpenAI Images API 客户端
pub struct OpenAIImageProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAIImageProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    /// 指定 base URL（测试或自建网关）
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// 文生图
    pub async fn generate(
        &self,
        request: &ImageGenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        tracing::info!(
            "[OpenAIImage] generate model={} n={} size={}",
            request.model,
            request.n,
            request.size
        );
        let resp = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        Self::decode_response(resp).await
    }

    /// 图片编辑（源图 + 可选蒙版）
    pub async fn edit(
        &self,
        request: &ImageEditRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        tracing::info!(
            "[OpenAIImage] edit model={} n={} size={} mask={}",
            request.model,
            request.n,
            request.size,
            request.mask.is_some()
        );
        let mut form = Form::new()
            .text("model", request.model.clone())
            .text("prompt", request.prompt.clone())
            .text("n", request.n.to_string())
            .text("size", request.size.clone())
            .text("response_format", "b64_json")
            .part(
                "image",
                Part::bytes(request.image.clone())
                    .file_name("image.png")
                    .mime_str("image/png")
                    .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?,
            );
        if let Some(mask) = &request.mask {
            form = form.part(
                "mask",
                Part::bytes(mask.clone())
                    .file_name("mask.png")
                    .mime_str("image/png")
                    .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?,
            );
        }

        let resp = self
            .client
            .post(format!("{}/images/edits", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        Self::decode_response(resp).await
    }

    /// 图片变体（无提示词）
    pub async fn variation(
        &self,
        request: &ImageVariationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        tracing::info!(
            "[OpenAIImage] variation model={} n={} size={}",
            request.model,
            request.n,
            request.size
        );
        let form = Form::new()
            .text("model", request.model.clone())
            .text("n", request.n.to_string())
            .text("size", request.size.clone())
            .text("response_format", "b64_json")
            .part(
                "image",
                Part::bytes(request.image.clone())
                    .file_name("image.png")
                    .mime_str("image/png")
                    .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?,
            );

        let resp = self
            .client
            .post(format!("{}/images/variations", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        Self::decode_response(resp).await
    }

    /// 解析响应：成功时解码 b64_json，失败时提取服务商错误原文
    async fn decode_response(
        resp: reqwest::Response,
    ) -> Result<GenerationResponse, GenerationError> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            // 尽量取出服务商自己的 message，取不出再退化为整个响应体
            let message = serde_json::from_str::<OpenAIErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));
            tracing::error!("[OpenAIImage] API error {}: {}", status, message);
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ImagesApiResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::InvalidResponse(format!("响应不是预期结构: {}", e)))?;

        let mut images = Vec::with_capacity(parsed.data.len());
        for (i, item) in parsed.data.iter().enumerate() {
            let Some(b64) = &item.b64_json else {
                return Err(GenerationError::InvalidResponse(format!(
                    "第 {} 张图片缺少 b64_json 内容",
                    i + 1
                )));
            };
            let bytes = BASE64.decode(b64).map_err(|e| {
                GenerationError::InvalidResponse(format!("第 {} 张图片 base64 解码失败: {}", i + 1, e))
            })?;
            images.push(Bytes::from(bytes));
        }

        let usage = parsed.usage.map(|u| UsageInfo {
            total_tokens: u.total_tokens,
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            input_tokens_details: u.input_tokens_details.map(|d| crate::models::TokenDetails {
                text_tokens: d.text_tokens,
                image_tokens: d.image_tokens,
            }),
        });

        Ok(GenerationResponse {
            images,
            created_at: parsed.created * 1000,
            usage,
        })
    }
}
