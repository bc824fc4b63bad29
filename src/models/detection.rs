use serde::{Deserialize, Serialize};

use super::panel::BBox;

/// 目标检测模型输出的一个区域
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f64,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f64) -> Self {
        Self { bbox, confidence }
    }
}

/// 视觉模型对单个子图裁剪给出的标签与图注
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelLabelGuess {
    #[serde(rename = "panel_label", default)]
    pub label: String,
    #[serde(rename = "panel_caption", default)]
    pub caption: String,
}

impl PanelLabelGuess {
    pub fn new(label: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            caption: caption.into(),
        }
    }
}

/// 一个通过置信度过滤的检测结果 + 对应的标签猜测
///
/// `detection_index` 是该检测在检测器原始输出中的位置，是它唯一的身份
#[derive(Debug, Clone, PartialEq)]
pub struct PanelMatch {
    pub detection: Detection,
    pub detection_index: usize,
    pub label_guess: String,
    pub caption_guess: String,
}

impl PanelMatch {
    pub fn new(detection: Detection, detection_index: usize, guess: PanelLabelGuess) -> Self {
        Self {
            detection,
            detection_index,
            label_guess: guess.label,
            caption_guess: guess.caption,
        }
    }

    /// 归一化标签：去掉首尾空白后转大写；空标签返回 `None`
    pub fn normalized_label(&self) -> Option<String> {
        let trimmed = self.label_guess.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_uppercase())
        }
    }
}
