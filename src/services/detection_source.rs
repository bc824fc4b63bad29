//! 子图检测来源
//!
//! 目标检测模型本身不在本 crate 内运行，这里只定义取检测结果的接口

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::infrastructure::FigureImage;
use crate::models::{load_detections, Detection, Figure};

/// 给一张图返回检测器的原始输出（归一化坐标，检测器顺序）
#[async_trait]
pub trait DetectionSource: Send + Sync {
    async fn detect(&self, figure: &Figure, image: &FigureImage) -> Result<Vec<Detection>>;
}

/// 从预先导出的 JSON 文件读取检测结果
///
/// 文件格式：`{ "<figure_label>": [ { "bbox": [x1, y1, x2, y2], "confidence": 0.9 }, ... ] }`
#[derive(Debug, Clone, Default)]
pub struct JsonDetectionSource {
    detections: HashMap<String, Vec<Detection>>,
}

impl JsonDetectionSource {
    pub fn new(detections: HashMap<String, Vec<Detection>>) -> Self {
        Self { detections }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let detections = load_detections(path)
            .await
            .with_context(|| format!("加载检测结果失败: {}", path.display()))?;
        debug!("已加载 {} 张图的检测结果", detections.len());
        Ok(Self::new(detections))
    }

    pub fn figure_count(&self) -> usize {
        self.detections.len()
    }
}

#[async_trait]
impl DetectionSource for JsonDetectionSource {
    async fn detect(&self, figure: &Figure, _image: &FigureImage) -> Result<Vec<Detection>> {
        Ok(self
            .detections
            .get(&figure.figure_label)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BBox;
    use image::{DynamicImage, RgbImage};

    fn blank_image() -> FigureImage {
        FigureImage::from_image(DynamicImage::ImageRgb8(RgbImage::new(10, 10)), 2048)
    }

    #[tokio::test]
    async fn test_detect_known_and_unknown_figure() {
        let mut map = HashMap::new();
        map.insert(
            "Figure 1".to_string(),
            vec![Detection::new(BBox::new(0.0, 0.0, 0.5, 0.5), 0.9)],
        );
        let source = JsonDetectionSource::new(map);
        let image = blank_image();

        let found = source
            .detect(&Figure::new("Figure 1", ""), &image)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].confidence, 0.9);

        let missing = source
            .detect(&Figure::new("Figure 2", ""), &image)
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        tokio::fs::write(
            &path,
            r#"{"Figure 1": [{"bbox": [0.1, 0.1, 0.4, 0.4], "confidence": 0.8}]}"#,
        )
        .await
        .unwrap();

        let source = JsonDetectionSource::from_file(&path).await.unwrap();
        assert_eq!(source.figure_count(), 1);
    }

    #[tokio::test]
    async fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = JsonDetectionSource::from_file(&dir.path().join("nope.json")).await;
        assert!(result.is_err());
    }
}
