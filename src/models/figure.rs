use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::panel::{ConflictRecord, Panel};

/// 稿件中的一张图
///
/// 本阶段不关心的字段通过 `extra` 原样透传
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub figure_label: String,

    #[serde(default)]
    pub img_files: Vec<String>,

    #[serde(default)]
    pub sd_files: Vec<String>,

    #[serde(default)]
    pub figure_caption: String,

    #[serde(default)]
    pub panels: Vec<Panel>,

    /// 对账诊断信息，不属于权威子图列表
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting_panels: Vec<ConflictRecord>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Figure {
    pub fn new(figure_label: impl Into<String>, figure_caption: impl Into<String>) -> Self {
        Self {
            figure_label: figure_label.into(),
            img_files: Vec::new(),
            sd_files: Vec::new(),
            figure_caption: figure_caption.into(),
            panels: Vec::new(),
            conflicting_panels: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_panels(mut self, panels: Vec<Panel>) -> Self {
        self.panels = panels;
        self
    }

    pub fn with_image(mut self, img_file: impl Into<String>) -> Self {
        self.img_files.push(img_file.into());
        self
    }

    /// 用于检测的主图像（第一个图像文件）
    pub fn primary_image(&self) -> Option<&str> {
        self.img_files.first().map(String::as_str)
    }
}

/// 整个稿件的结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManuscriptStructure {
    #[serde(default)]
    pub manuscript_id: String,

    #[serde(default)]
    pub figures: Vec<Figure>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// LLM token 用量统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) {
        self.prompt_tokens += prompt_tokens;
        self.completion_tokens += completion_tokens;
        self.total_tokens += total_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_figure_preserves_unknown_fields() {
        let value = json!({
            "figure_label": "Figure 1",
            "img_files": ["graphic/fig1.png"],
            "sd_files": [],
            "figure_caption": "caption",
            "duplicated_panels": "false",
            "panels": [{"panel_label": "A", "panel_caption": "x"}]
        });
        let figure: Figure = serde_json::from_value(value).unwrap();
        assert_eq!(figure.primary_image(), Some("graphic/fig1.png"));
        assert_eq!(figure.panels.len(), 1);

        let out = serde_json::to_value(&figure).unwrap();
        assert_eq!(out["duplicated_panels"], json!("false"));
        // 没有冲突时不输出该字段
        assert!(out.get("conflicting_panels").is_none());
    }

    #[test]
    fn test_token_usage_add() {
        let mut usage = TokenUsage::default();
        usage.add(10, 5, 15);
        usage.add(1, 2, 3);
        assert_eq!(
            usage,
            TokenUsage {
                prompt_tokens: 11,
                completion_tokens: 7,
                total_tokens: 18
            }
        );
    }
}
