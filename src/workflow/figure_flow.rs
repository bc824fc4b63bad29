//! 图处理流程 - 流程层
//!
//! 核心职责：定义"一张图"的完整处理流程
//!
//! 流程顺序：
//! 1. 打开图像 → 取检测结果 → 过滤 → 裁剪
//! 2. 每个裁剪交给视觉模型猜标签（并发受限）
//! 3. 对账，整体替换图中的子图列表

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::infrastructure::{FigureImage, PanelImage};
use crate::models::{Detection, Figure, PanelMatch};
use crate::services::{CaptionMatcher, DetectionSource, PanelReconciler};
use crate::workflow::figure_ctx::FigureCtx;

/// 单张图的处理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FigureStats {
    /// 通过过滤的检测数量
    pub detections_kept: usize,
    /// 拿到标签猜测的检测数量
    pub matches: usize,
    /// 对账后的子图数量
    pub panels: usize,
    /// 本次新增的冲突记录数量
    pub conflicts: usize,
}

/// 图处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FigureOutcome {
    /// 处理完成
    Processed(FigureStats),
    /// 跳过（图保持原样）
    Skipped { reason: String },
}

/// 流程参数，从 [`Config`] 中取出与单张图相关的部分
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub image_root: PathBuf,
    pub confidence_threshold: f64,
    pub max_detections: usize,
    pub max_image_size: u32,
    pub max_concurrent_panels: usize,
}

impl FlowSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            image_root: config.image_root.clone(),
            confidence_threshold: config.confidence_threshold,
            max_detections: config.max_detections,
            max_image_size: config.max_image_size,
            max_concurrent_panels: config.max_concurrent_panels.max(1),
        }
    }
}

/// 图处理流程
///
/// - 编排完整的单图处理流程
/// - 不持有图像以外的资源
/// - 只依赖业务能力（services）
pub struct FigureFlow {
    detection_source: Arc<dyn DetectionSource>,
    caption_matcher: Arc<dyn CaptionMatcher>,
    reconciler: PanelReconciler,
    settings: FlowSettings,
}

impl FigureFlow {
    pub fn new(
        detection_source: Arc<dyn DetectionSource>,
        caption_matcher: Arc<dyn CaptionMatcher>,
        reconciler: PanelReconciler,
        settings: FlowSettings,
    ) -> Self {
        Self {
            detection_source,
            caption_matcher,
            reconciler,
            settings,
        }
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    pub async fn run(&self, figure: &mut Figure, ctx: &FigureCtx) -> Result<FigureOutcome> {
        // ========== 1. 打开图像 ==========
        let Some(img_file) = figure.primary_image() else {
            warn!("{} ⚠️ 没有图像文件，跳过", ctx);
            return Ok(FigureOutcome::Skipped {
                reason: "没有图像文件".to_string(),
            });
        };

        let path = self.settings.image_root.join(img_file);
        let max_size = self.settings.max_image_size;
        let image = tokio::task::spawn_blocking(move || FigureImage::open(&path, max_size))
            .await
            .context("图像解码任务异常退出")??;

        info!(
            "{} 🖼️ 图像已加载 ({}x{})",
            ctx,
            image.width(),
            image.height()
        );

        // ========== 2. 检测 + 过滤 + 裁剪 ==========
        let detections = self
            .detection_source
            .detect(figure, &image)
            .await
            .with_context(|| format!("{} 获取检测结果失败", ctx))?;

        let kept = filter_detections(
            &detections,
            self.settings.confidence_threshold,
            self.settings.max_detections,
        );
        info!(
            "{} 🔍 检测到 {} 个区域，保留 {} 个",
            ctx,
            detections.len(),
            kept.len()
        );

        let crops = crop_detections(&image, kept, ctx);
        let detections_kept = crops.len();

        // ========== 3. 视觉模型匹配 ==========
        let mut matches = self.match_crops(crops, &figure.figure_caption, ctx).await;
        matches.sort_by_key(|m| m.detection_index);

        // ========== 4. 对账 ==========
        let reconciliation = self.reconciler.reconcile(&figure.panels, &matches);
        let stats = FigureStats {
            detections_kept,
            matches: matches.len(),
            panels: reconciliation.panels.len(),
            conflicts: reconciliation.conflicts.len(),
        };

        figure.panels = reconciliation.panels;
        figure.conflicting_panels.extend(reconciliation.conflicts);

        info!(
            "{} ✓ 对账完成: {} 个子图, {} 个冲突",
            ctx, stats.panels, stats.conflicts
        );

        Ok(FigureOutcome::Processed(stats))
    }

    /// 并发匹配所有裁剪，失败的检测直接丢弃
    async fn match_crops(
        &self,
        crops: Vec<(usize, Detection, PanelImage)>,
        figure_caption: &str,
        ctx: &FigureCtx,
    ) -> Vec<PanelMatch> {
        let matcher = &self.caption_matcher;

        let results: Vec<_> = stream::iter(crops)
            .map(|(index, detection, crop)| async move {
                let guess = matcher.match_panel(&crop, figure_caption).await;
                (index, detection, guess)
            })
            .buffer_unordered(self.settings.max_concurrent_panels)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(index, detection, guess)| match guess {
                Ok(guess) => {
                    debug!(
                        "{} 检测 #{} → 标签 '{}'",
                        ctx, index, guess.label
                    );
                    Some(PanelMatch::new(detection, index, guess))
                }
                Err(e) => {
                    warn!("{} ⚠️ 检测 #{} 匹配失败: {:#}", ctx, index, e);
                    None
                }
            })
            .collect()
    }
}

/// 过滤检测结果，返回 `(检测序号, 检测)`
///
/// 序号是检测在检测器原始输出中的位置
pub fn filter_detections(
    detections: &[Detection],
    confidence_threshold: f64,
    max_detections: usize,
) -> Vec<(usize, Detection)> {
    detections
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, d)| d.confidence >= confidence_threshold)
        .filter(|(index, d)| {
            let valid = d.bbox.is_normalized();
            if !valid {
                warn!("检测 #{} 的边界框不是归一化坐标，已丢弃: {:?}", index, d.bbox);
            }
            valid
        })
        .take(max_detections)
        .collect()
}

fn crop_detections(
    image: &FigureImage,
    detections: Vec<(usize, Detection)>,
    ctx: &FigureCtx,
) -> Vec<(usize, Detection, PanelImage)> {
    detections
        .into_iter()
        .filter_map(|(index, detection)| match image.crop(&detection.bbox) {
            Ok(crop) => Some((index, detection, crop)),
            Err(e) => {
                warn!("{} ⚠️ 检测 #{} 裁剪失败: {}", ctx, index, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use image::RgbImage;

    use crate::models::{BBox, Panel, PanelLabelGuess};

    struct FixedDetections(Vec<Detection>);

    #[async_trait]
    impl DetectionSource for FixedDetections {
        async fn detect(&self, _figure: &Figure, _image: &FigureImage) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    /// 按裁剪宽度返回标签；没有登记的宽度视为调用失败
    struct ByWidth(HashMap<u32, &'static str>);

    #[async_trait]
    impl CaptionMatcher for ByWidth {
        async fn match_panel(&self, panel: &PanelImage, _caption: &str) -> Result<PanelLabelGuess> {
            let (width, _) = panel.dimensions();
            match self.0.get(&width) {
                Some(label) => Ok(PanelLabelGuess::new(*label, format!("caption {label}"))),
                None => anyhow::bail!("no answer for width {width}"),
            }
        }
    }

    fn detection(x1: f64, x2: f64, confidence: f64) -> Detection {
        Detection::new(BBox::new(x1, 0.0, x2, 0.5), confidence)
    }

    fn settings(image_root: PathBuf) -> FlowSettings {
        FlowSettings {
            image_root,
            confidence_threshold: 0.25,
            max_detections: 30,
            max_image_size: 2048,
            max_concurrent_panels: 2,
        }
    }

    fn ctx() -> FigureCtx {
        FigureCtx::new("M1".to_string(), 1, "Figure 1".to_string())
    }

    fn flow(dir: &std::path::Path, detections: Vec<Detection>, labels: &[(u32, &'static str)]) -> FigureFlow {
        FigureFlow::new(
            Arc::new(FixedDetections(detections)),
            Arc::new(ByWidth(labels.iter().copied().collect())),
            PanelReconciler::default(),
            settings(dir.to_path_buf()),
        )
    }

    fn write_image(dir: &std::path::Path) {
        RgbImage::new(100, 100).save(dir.join("fig1.png")).unwrap();
    }

    #[test]
    fn test_filter_detections() {
        let detections = vec![
            detection(0.0, 0.1, 0.9),
            detection(0.1, 0.2, 0.1),
            Detection::new(BBox::new(0.5, 0.0, 1.5, 0.5), 0.9),
            detection(0.3, 0.4, 0.25),
            detection(0.5, 0.6, 0.8),
        ];

        let kept = filter_detections(&detections, 0.25, 30);
        let indices: Vec<usize> = kept.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 3, 4]);

        let capped = filter_detections(&detections, 0.25, 2);
        let indices: Vec<usize> = capped.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 3]);
    }

    #[tokio::test]
    async fn test_figure_without_image_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let flow = flow(dir.path(), vec![], &[]);

        let mut figure = Figure::new("Figure 1", "").with_panels(vec![Panel::new("A", "a")]);
        let outcome = flow.run(&mut figure, &ctx()).await.unwrap();

        assert!(matches!(outcome, FigureOutcome::Skipped { .. }));
        assert_eq!(figure.panels.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_image_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let flow = flow(dir.path(), vec![], &[]);

        let mut figure = Figure::new("Figure 1", "").with_image("missing.png");
        assert!(flow.run(&mut figure, &ctx()).await.is_err());
    }

    #[tokio::test]
    async fn test_run_reconciles_matches() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path());

        // 宽度 10 / 20 / 30 像素，分别猜为 A / A / 空
        let flow = flow(
            dir.path(),
            vec![
                detection(0.0, 0.1, 0.9),
                detection(0.2, 0.4, 0.8),
                detection(0.5, 0.8, 0.7),
            ],
            &[(10, "A"), (20, "a"), (30, "")],
        );

        let mut figure = Figure::new("Figure 1", "(A) Foo. (B) Bar.")
            .with_image("fig1.png")
            .with_panels(vec![Panel::new("A", "Foo"), Panel::new("B", "Bar")]);

        let outcome = flow.run(&mut figure, &ctx()).await.unwrap();

        assert_eq!(
            outcome,
            FigureOutcome::Processed(FigureStats {
                detections_kept: 3,
                matches: 3,
                panels: 3,
                conflicts: 1,
            })
        );

        let labels: Vec<&str> = figure.panels.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["A", "C", "B"]);
        assert_eq!(figure.panels[0].caption, "Foo");
        assert_eq!(figure.panels[0].confidence, 0.9);
        assert!(figure.panels[2].bbox.is_none());
        assert_eq!(figure.conflicting_panels[0].detection_index, 1);
    }

    #[tokio::test]
    async fn test_failed_match_is_omitted() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path());

        let flow = flow(
            dir.path(),
            vec![detection(0.0, 0.1, 0.9), detection(0.2, 0.4, 0.8)],
            &[(20, "B")],
        );

        let mut figure = Figure::new("Figure 1", "").with_image("fig1.png");
        let outcome = flow.run(&mut figure, &ctx()).await.unwrap();

        let FigureOutcome::Processed(stats) = outcome else {
            panic!("expected processed outcome");
        };
        assert_eq!(stats.detections_kept, 2);
        assert_eq!(stats.matches, 1);
        assert_eq!(figure.panels.len(), 1);
        assert_eq!(figure.panels[0].label, "B");
    }
}
