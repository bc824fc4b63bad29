//! LLM 服务 - 业务能力层
//!
//! 只负责"调用视觉大模型"能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务

use std::sync::Mutex;

use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, LlmError};
use crate::models::TokenUsage;

/// LLM 服务
///
/// 职责：
/// - 调用 LLM API（可附带图片）
/// - 累计 token 用量
/// - 不认识 Figure / Panel
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    usage: Mutex<TokenUsage>,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
            top_p: config.llm_top_p,
            max_tokens: config.llm_max_tokens,
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// 截至目前累计的 token 用量
    pub fn usage(&self) -> TokenUsage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }

    /// 通用的 LLM 调用函数
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    /// - `imgs`: 图片 URL 列表（可选，支持 `data:` URL），会追加到用户消息中
    ///
    /// # 返回
    /// 返回 LLM 的响应内容（去掉首尾空白）
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
        imgs: Option<&[String]>,
    ) -> Result<String> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());

        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()
                .map_err(request_build_failed)?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = match imgs.filter(|urls| !urls.is_empty()) {
            Some(img_urls) => {
                // Vision API：文本 + 图片
                let mut content_parts = vec![ChatCompletionRequestUserMessageContentPart::Text(
                    ChatCompletionRequestMessageContentPartText {
                        text: user_message.to_string(),
                    },
                )];

                for url in img_urls {
                    content_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                        ChatCompletionRequestMessageContentPartImage {
                            image_url: ImageUrl {
                                url: url.clone(),
                                detail: Some(ImageDetail::Auto),
                            },
                        },
                    ));
                }

                debug!("使用 Vision API，包含 {} 张图片", img_urls.len());

                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(
                        content_parts,
                    ))
                    .build()
                    .map_err(request_build_failed)?
            }
            None => ChatCompletionRequestUserMessageArgs::default()
                .content(user_message)
                .build()
                .map_err(request_build_failed)?,
        };

        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .top_p(self.top_p)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(request_build_failed)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            AppError::llm_api_failed(&self.model_name, e)
        })?;

        if let Some(usage) = &response.usage {
            self.record_usage(
                usage.prompt_tokens as u64,
                usage.completion_tokens as u64,
                usage.total_tokens as u64,
            );
        }

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| LlmError::EmptyContent {
                model: self.model_name.clone(),
            })?;

        Ok(content.trim().to_string())
    }

    fn record_usage(&self, prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) {
        if let Ok(mut usage) = self.usage.lock() {
            usage.add(prompt_tokens, completion_tokens, total_tokens);
        }
    }
}

fn request_build_failed(e: impl std::error::Error + Send + Sync + 'static) -> AppError {
    AppError::Llm(LlmError::RequestBuildFailed {
        source: Box::new(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service() -> LlmService {
        let config = Config {
            llm_api_key: "test-key".to_string(),
            llm_api_base_url: "http://localhost:9/v1".to_string(),
            ..Config::default()
        };
        LlmService::new(&config)
    }

    #[test]
    fn test_usage_accumulates() {
        let service = create_test_service();
        assert_eq!(service.usage(), TokenUsage::default());

        service.record_usage(100, 20, 120);
        service.record_usage(50, 10, 60);

        let usage = service.usage();
        assert_eq!(usage.prompt_tokens, 150);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(usage.total_tokens, 180);
    }

    #[test]
    fn test_model_name_from_config() {
        let service = create_test_service();
        assert_eq!(service.model_name(), Config::default().llm_model_name);
    }

    /// 测试通用 LLM 调用
    ///
    /// 运行方式：
    /// ```bash
    /// LLM_API_KEY=... cargo test test_send_to_llm_live -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_send_to_llm_live() {
        let _ = tracing_subscriber::fmt::try_init();

        let service = LlmService::new(&Config::load().expect("加载配置失败"));
        let response = service
            .send_to_llm("Reply with the single word: ok", Some("You are terse."), None)
            .await
            .expect("LLM 调用失败");

        println!("LLM 响应: {}", response);
        assert!(!response.is_empty());
        assert!(service.usage().total_tokens > 0);
    }
}
