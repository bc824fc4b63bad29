pub mod figure_ctx;
pub mod figure_flow;

pub use figure_ctx::FigureCtx;
pub use figure_flow::{filter_detections, FigureFlow, FigureOutcome, FigureStats, FlowSettings};
