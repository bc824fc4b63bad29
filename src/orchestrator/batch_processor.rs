//! 批量图处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责一份稿件中所有图的处理和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：校验配置、写运行日志头、构建服务
//! 2. **加载输入**：稿件结构 JSON + 检测结果
//! 3. **并发控制**：使用 Semaphore 限制同时处理的图数量
//! 4. **失败隔离**：单张图失败时保留其原有子图
//! 5. **全局统计**：汇总所有图的处理结果与 token 用量
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单张图的细节，委托给 `FigureFlow`
//! - **并发安全**：通过 Semaphore 和 tokio::spawn 实现并发

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::{load_manuscript_structure, save_manuscript_structure, Figure, TokenUsage};
use crate::services::{
    CaptionMatcher, DetectionSource, JsonDetectionSource, LlmCaptionMatcher, LlmService,
    PanelReconciler,
};
use crate::utils::logging::{
    append_log_line, init_log_file, log_figures_loaded, log_startup, print_final_stats, RunStats,
};
use crate::workflow::{FigureCtx, FigureFlow, FigureOutcome, FlowSettings};

/// 应用主结构
pub struct App {
    config: Config,
    flow: Arc<FigureFlow>,
    llm_service: Option<Arc<LlmService>>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate()?;

        let detection_source = JsonDetectionSource::from_file(&config.detections_file).await?;
        let llm_service = Arc::new(LlmService::new(&config));
        let caption_matcher = LlmCaptionMatcher::new(llm_service.clone());

        let mut app = Self::with_services(
            config,
            Arc::new(detection_source),
            Arc::new(caption_matcher),
        )?;
        app.llm_service = Some(llm_service);
        Ok(app)
    }

    /// 使用给定的检测来源和图注匹配服务构建应用
    pub fn with_services(
        config: Config,
        detection_source: Arc<dyn DetectionSource>,
        caption_matcher: Arc<dyn CaptionMatcher>,
    ) -> Result<Self> {
        // 初始化日志文件
        init_log_file(&config.output_log_file)?;

        log_startup(config.max_concurrent_figures, config.max_concurrent_panels);

        let flow = FigureFlow::new(
            detection_source,
            caption_matcher,
            PanelReconciler::new(config.reconcile_options()),
            FlowSettings::from_config(&config),
        );

        Ok(Self {
            config,
            flow: Arc::new(flow),
            llm_service: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 截至目前累计的 token 用量
    pub fn usage(&self) -> TokenUsage {
        self.llm_service
            .as_ref()
            .map(|service| service.usage())
            .unwrap_or_default()
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<RunStats> {
        info!("\n📁 正在加载稿件结构...");
        let mut structure = load_manuscript_structure(&self.config.input_structure).await?;

        log_figures_loaded(&structure.manuscript_id, structure.figures.len());
        if structure.figures.is_empty() {
            warn!("⚠️ 稿件中没有图，直接写回");
        }

        let figures = std::mem::take(&mut structure.figures);
        let (figures, stats) = self
            .process_all_figures(&structure.manuscript_id, figures)
            .await?;
        structure.figures = figures;

        save_manuscript_structure(&structure, &self.config.output_file)
            .await
            .with_context(|| format!("写入结果失败: {}", self.config.output_file.display()))?;

        // 输出最终统计
        print_final_stats(
            &stats,
            &self.usage(),
            &self.config.output_file,
            &self.config.output_log_file,
        );

        Ok(stats)
    }

    /// 并发处理所有图，结果按原顺序返回
    async fn process_all_figures(
        &self,
        manuscript_id: &str,
        figures: Vec<Figure>,
    ) -> Result<(Vec<Figure>, RunStats)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_figures));
        let mut handles = Vec::with_capacity(figures.len());

        for (idx, figure) in figures.into_iter().enumerate() {
            let ctx = FigureCtx::new(
                manuscript_id.to_string(),
                idx + 1,
                figure.figure_label.clone(),
            );
            let permit = semaphore.clone().acquire_owned().await?;
            let flow = self.flow.clone();
            let original = figure.clone();
            let task_ctx = ctx.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let mut figure = figure;
                let result = flow.run(&mut figure, &task_ctx).await;
                (figure, result)
            });
            handles.push((ctx, original, handle));
        }

        let mut stats = RunStats {
            total: handles.len(),
            ..Default::default()
        };
        let mut results = Vec::with_capacity(handles.len());

        for (ctx, original, handle) in handles {
            let (figure, line) = match handle.await {
                Ok((figure, Ok(FigureOutcome::Processed(figure_stats)))) => {
                    stats.processed += 1;
                    stats.panels += figure_stats.panels;
                    stats.conflicts += figure_stats.conflicts;
                    let line = format!(
                        "{}: {} 个检测, {} 个子图, {} 个冲突",
                        ctx.figure_label,
                        figure_stats.detections_kept,
                        figure_stats.panels,
                        figure_stats.conflicts
                    );
                    (figure, line)
                }
                Ok((figure, Ok(FigureOutcome::Skipped { reason }))) => {
                    stats.skipped += 1;
                    let line = format!("{}: 跳过 ({})", ctx.figure_label, reason);
                    (figure, line)
                }
                Ok((_, Err(e))) => {
                    error!("{} ❌ 处理过程中发生错误: {:#}", ctx, e);
                    stats.failed += 1;
                    let line = format!("{}: 失败 ({:#})", ctx.figure_label, e);
                    (original, line)
                }
                Err(e) => {
                    error!("{} 任务执行失败: {}", ctx, e);
                    stats.failed += 1;
                    let line = format!("{}: 失败 ({})", ctx.figure_label, e);
                    (original, line)
                }
            };

            if let Err(e) = append_log_line(&self.config.output_log_file, &line) {
                warn!("⚠️ 写入运行日志失败: {}", e);
            }
            results.push(figure);
        }

        Ok((results, stats))
    }
}
