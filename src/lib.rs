//! # Panel Curation
//!
//! 科研稿件图像整理流水线中的"子图"阶段：
//! 检测图中的子图区域，让视觉模型为每个区域猜测标签与图注，
//! 再与文字抽取阶段得到的子图列表对账
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有解码后的图像，只暴露裁剪能力
//! - `FigureImage` / `PanelImage`
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `DetectionSource` - 检测结果来源
//! - `CaptionMatcher` / `LlmService` - 视觉模型匹配能力
//! - `PanelReconciler` / `label_allocator` - 对账（纯函数）
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一张图"的完整处理流程
//! - `FigureCtx` - 上下文封装（manuscript_id + figure_index）
//! - `FigureFlow` - 流程编排（detect → crop → match → reconcile）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量图处理器，管理并发和输出
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{Figure, ManuscriptStructure, Panel, PanelMatch};
pub use orchestrator::App;
pub use services::{reconcile, PanelReconciler, Reconciliation};
pub use workflow::{FigureCtx, FigureFlow, FigureOutcome};
