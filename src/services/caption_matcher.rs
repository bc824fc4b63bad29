//! 子图图注匹配服务
//!
//! 把一个子图裁剪和整张图的图注交给视觉模型，取回该子图的标签与图注

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::infrastructure::PanelImage;
use crate::models::PanelLabelGuess;
use crate::services::llm_service::LlmService;
use crate::utils::logging::truncate_text;

/// 子图图注匹配能力
#[async_trait]
pub trait CaptionMatcher: Send + Sync {
    /// 返回视觉模型对该子图的标签猜测（标签可能为空）
    async fn match_panel(&self, panel: &PanelImage, figure_caption: &str)
        -> Result<PanelLabelGuess>;
}

/// 基于 LLM 视觉模型的图注匹配
pub struct LlmCaptionMatcher {
    llm_service: Arc<LlmService>,
}

impl LlmCaptionMatcher {
    pub fn new(llm_service: Arc<LlmService>) -> Self {
        Self { llm_service }
    }
}

#[async_trait]
impl CaptionMatcher for LlmCaptionMatcher {
    async fn match_panel(
        &self,
        panel: &PanelImage,
        figure_caption: &str,
    ) -> Result<PanelLabelGuess> {
        if panel.is_empty() {
            warn!("子图图像为空，跳过 LLM 调用");
            return Ok(PanelLabelGuess::default());
        }

        let user_message = build_user_prompt(figure_caption);
        let images = [panel.data_url()];

        let response = self
            .llm_service
            .send_to_llm(&user_message, Some(SYSTEM_PROMPT), Some(&images))
            .await?;

        let guess = parse_panel_response(&response);
        debug!(
            "LLM 匹配结果: 标签 '{}', 图注: {}",
            guess.label,
            truncate_text(&guess.caption, 60)
        );
        Ok(guess)
    }
}

const SYSTEM_PROMPT: &str = "You are an AI assistant specialized in analyzing scientific figures. \
Your task is to match a panel image with its corresponding part of the figure caption.\n\
1. Analyze the provided panel image carefully.\n\
2. Read the entire figure caption.\n\
3. Identify which part of the caption corresponds to the panel in the image.\n\
4. Write a panel caption that stays as close as possible to the original wording, \
keeps all scientific details (statistics, methods) and adds nothing that is not in the caption.\n\
5. Start your response with 'PANEL_X:', where X is the label of the panel (e.g. A, B, C).\n\
If the panel label cannot be determined, start with 'PANEL_:'.";

fn build_user_prompt(figure_caption: &str) -> String {
    format!(
        r#"Figure Caption:
{}

Please analyze the provided panel image and match it with the appropriate part of the figure caption above. Provide a caption specific to this panel, following the format specified in the system prompt."#,
        figure_caption
    )
}

/// 标签只接受子图标签的形状：`A`、`AB`、`1`、`1C`
const PANEL_PREFIX: &str =
    r"(?is)^\s*\**\s*PANEL(?:[_\s-]*([A-Za-z]{1,2}|\d+[A-Za-z]{0,2})\b)?[_\s-]*\**\s*:\s*(.*)$";

/// 去掉包裹回复的 Markdown 代码块（```json ... ```）
fn strip_code_fence(response: &str) -> &str {
    let Some(rest) = response.strip_prefix("```") else {
        return response;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body).trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// 解析视觉模型的回复
///
/// 依次尝试：
/// 1. JSON `{"panel_label": ..., "panel_caption": ...}`（可包在代码块中）
/// 2. `PANEL_X: caption`
/// 3. 无法识别时标签为空，整段回复作为图注
pub fn parse_panel_response(response: &str) -> PanelLabelGuess {
    let response = response.trim();

    if let Ok(guess) = serde_json::from_str::<PanelLabelGuess>(strip_code_fence(response)) {
        return PanelLabelGuess::new(guess.label.trim(), guess.caption.trim());
    }

    if let Ok(re) = Regex::new(PANEL_PREFIX) {
        if let Some(caps) = re.captures(response) {
            let label = caps.get(1).map_or("", |m| m.as_str());
            let caption = caps.get(2).map_or("", |m| m.as_str());
            return PanelLabelGuess::new(label.trim(), caption.trim());
        }
    }

    warn!(
        "无法识别子图标签，整段回复作为图注: {}",
        truncate_text(response, 60)
    );
    PanelLabelGuess::new("", response)
}
