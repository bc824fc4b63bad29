//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量图处理器
//! - 管理应用生命周期（初始化、运行）
//! - 加载稿件结构与检测结果
//! - 控制并发数量（Semaphore）
//! - 按原顺序写回结果
//! - 输出全局统计信息（含 token 用量）
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<Figure>)
//!     ↓
//! workflow::FigureFlow (处理单个 Figure)
//!     ↓
//! services (能力层：detection / caption matcher / reconciler / llm)
//!     ↓
//! infrastructure (基础设施：FigureImage)
//! ```
//!
//! ## 设计原则
//!
//! 1. **向下依赖**：编排层 → workflow → services → infrastructure
//! 2. **无业务逻辑**：只做调度和统计，不做具体业务判断

pub mod batch_processor;

// 重新导出主要类型
pub use batch_processor::App;
