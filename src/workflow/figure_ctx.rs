//! 图处理上下文
//!
//! 封装"我正在处理哪份稿件的第几张图"这一信息

use std::fmt::Display;

/// 图处理上下文
#[derive(Debug, Clone)]
pub struct FigureCtx {
    /// 稿件ID
    pub manuscript_id: String,

    /// 图在稿件中的索引（从1开始，仅用于日志显示）
    pub figure_index: usize,

    /// 图标签，例如 "Figure 1"
    pub figure_label: String,
}

impl FigureCtx {
    pub fn new(manuscript_id: String, figure_index: usize, figure_label: String) -> Self {
        Self {
            manuscript_id,
            figure_index,
            figure_label,
        }
    }
}

impl Display for FigureCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[稿件 {} 图#{} {}]",
            self.manuscript_id, self.figure_index, self.figure_label
        )
    }
}
