use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 相对坐标边界框 `[x1, y1, x2, y2]`，取值范围 0..1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 中心点 `((x1+x2)/2, (y1+y2)/2)`
    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 两个中心点之间的欧氏距离平方（比较大小时无需开方）
    pub fn squared_distance_to(&self, other: &BBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).powi(2) + (ay - by).powi(2)
    }

    /// 是否为合法的归一化边界框
    pub fn is_normalized(&self) -> bool {
        let coords = [self.x1, self.y1, self.x2, self.y2];
        coords.iter().all(|c| c.is_finite() && (0.0..=1.0).contains(c))
            && self.x1 < self.x2
            && self.y1 < self.y2
    }

    /// 换算为像素坐标 `(left, top, right, bottom)`
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let w = width as f64;
        let h = height as f64;
        (
            (self.x1 * w) as u32,
            (self.y1 * h) as u32,
            (self.x2 * w) as u32,
            (self.y2 * h) as u32,
        )
    }
}

impl From<[f64; 4]> for BBox {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// 图中的一个子图（Panel）
///
/// 由文字抽取阶段创建，在对账阶段刷新 `bbox` / `confidence`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    #[serde(rename = "panel_label")]
    pub label: String,

    #[serde(rename = "panel_caption", default)]
    pub caption: String,

    /// 未被定位的子图为 `None`，序列化为 `[]`
    #[serde(rename = "panel_bbox", default, with = "optional_bbox")]
    pub bbox: Option<BBox>,

    #[serde(default)]
    pub confidence: f64,

    #[serde(rename = "sd_files", default)]
    pub source_data_files: Vec<String>,

    /// 原样保留的 AI 诊断信息，对账过程从不解读
    #[serde(rename = "ai_response", default, skip_serializing_if = "Option::is_none")]
    pub ai_diagnostic: Option<JsonValue>,
}

impl Panel {
    /// 文字抽取阶段产生的子图（尚未定位）
    pub fn new(label: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            caption: caption.into(),
            bbox: None,
            confidence: 0.0,
            source_data_files: Vec::new(),
            ai_diagnostic: None,
        }
    }

    /// 仅由视觉检测发现、文字中不存在的子图
    pub fn discovered(
        label: impl Into<String>,
        caption: impl Into<String>,
        bbox: BBox,
        confidence: f64,
    ) -> Self {
        Self {
            bbox: Some(bbox),
            confidence,
            ..Self::new(label, caption)
        }
    }

    pub fn with_source_data(mut self, files: Vec<String>) -> Self {
        self.source_data_files = files;
        self
    }

    pub fn with_bbox(mut self, bbox: BBox, confidence: f64) -> Self {
        self.bbox = Some(bbox);
        self.confidence = confidence;
        self
    }

    pub fn with_ai_diagnostic(mut self, value: JsonValue) -> Self {
        self.ai_diagnostic = Some(value);
        self
    }
}

/// 标签冲突中落败、且未被提升为新子图的检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    #[serde(rename = "panel_label")]
    pub label: String,
    pub detection_index: usize,
    pub confidence: f64,
    #[serde(rename = "panel_bbox")]
    pub bbox: BBox,
}

/// `panel_bbox` 字段：`[]` 表示未定位，四个数表示边界框
mod optional_bbox {
    use super::BBox;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<BBox>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bbox) => bbox.serialize(serializer),
            None => Vec::<f64>::new().serialize(serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<BBox>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let coords = Option::<Vec<f64>>::deserialize(deserializer)?.unwrap_or_default();
        match coords.as_slice() {
            [] => Ok(None),
            [x1, y1, x2, y2] => Ok(Some(BBox::new(*x1, *y1, *x2, *y2))),
            other => Err(D::Error::custom(format!(
                "panel_bbox 需要 0 或 4 个坐标，实际为 {} 个",
                other.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_center_and_distance() {
        let a = BBox::new(0.1, 0.1, 0.3, 0.3);
        let b = BBox::new(0.4, 0.5, 0.6, 0.7);
        let (cx, cy) = a.center();
        assert!((cx - 0.2).abs() < 1e-12);
        assert!((cy - 0.2).abs() < 1e-12);
        // (0.5-0.2)^2 + (0.6-0.2)^2 = 0.09 + 0.16
        assert!((a.squared_distance_to(&b) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_is_normalized() {
        assert!(BBox::new(0.0, 0.0, 1.0, 1.0).is_normalized());
        assert!(!BBox::new(0.5, 0.1, 0.2, 0.3).is_normalized());
        assert!(!BBox::new(0.1, 0.1, 1.2, 0.3).is_normalized());
        assert!(!BBox::new(f64::NAN, 0.1, 0.2, 0.3).is_normalized());
    }

    #[test]
    fn test_to_pixels() {
        let bbox = BBox::new(0.1, 0.25, 0.5, 1.0);
        assert_eq!(bbox.to_pixels(200, 100), (20, 25, 100, 100));
    }

    #[test]
    fn test_panel_json_uses_pipeline_field_names() {
        let value = json!({
            "panel_label": "A",
            "panel_caption": "caption",
            "panel_bbox": [],
            "sd_files": ["a.csv"],
            "ai_response": {"key": "value"}
        });
        let panel: Panel = serde_json::from_value(value).unwrap();
        assert_eq!(panel.label, "A");
        assert_eq!(panel.bbox, None);
        assert_eq!(panel.confidence, 0.0);
        assert_eq!(panel.source_data_files, vec!["a.csv".to_string()]);
        assert_eq!(panel.ai_diagnostic, Some(json!({"key": "value"})));

        let out = serde_json::to_value(panel.with_bbox(BBox::new(0.1, 0.2, 0.3, 0.4), 0.9)).unwrap();
        assert_eq!(out["panel_bbox"], json!([0.1, 0.2, 0.3, 0.4]));
        assert_eq!(out["confidence"], json!(0.9));
    }

    #[test]
    fn test_panel_bbox_rejects_wrong_length() {
        let value = json!({"panel_label": "A", "panel_bbox": [0.1, 0.2]});
        assert!(serde_json::from_value::<Panel>(value).is_err());
    }
}
