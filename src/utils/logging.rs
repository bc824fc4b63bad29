/// 日志工具模块
///
/// 提供日志初始化、运行日志文件和格式化输出的辅助函数
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::{AppError, AppResult};
use crate::models::TokenUsage;

/// 初始化 tracing 日志
///
/// `RUST_LOG` 存在时优先生效；重复调用不会报错
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 启动时的日志级别：环境变量 `LOG_LEVEL`，缺省为 `info`
///
/// 日志在加载配置之前初始化，配置校验产生的警告才能被输出
pub fn startup_level() -> String {
    std::env::var("LOG_LEVEL")
        .ok()
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// 初始化运行日志文件（覆盖旧文件）
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &Path) -> AppResult<()> {
    let log_header = format!(
        "{}\n子图整理日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );

    if let Some(parent) = log_file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::file_write_failed(&parent.display().to_string(), e))?;
    }

    fs::write(log_file_path, log_header)
        .map_err(|e| AppError::file_write_failed(&log_file_path.display().to_string(), e))?;
    Ok(())
}

/// 追加一行到运行日志文件
pub fn append_log_line(log_file_path: &Path, line: &str) -> AppResult<()> {
    let path = log_file_path.display().to_string();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .map_err(|e| AppError::file_write_failed(&path, e))?;
    writeln!(file, "{}", line).map_err(|e| AppError::file_write_failed(&path, e))?;
    Ok(())
}

/// 记录程序启动信息
///
/// # 参数
/// - `max_concurrent_figures`: 同时处理的图数量
/// - `max_concurrent_panels`: 单张图内的并发请求数量
pub fn log_startup(max_concurrent_figures: usize, max_concurrent_panels: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 子图检测与对账");
    info!(
        "📊 最大并发: {} 张图 / 每图 {} 个子图",
        max_concurrent_figures, max_concurrent_panels
    );
    info!("{}", "=".repeat(60));
}

/// 记录图加载信息
pub fn log_figures_loaded(manuscript_id: &str, total: usize) {
    info!("✓ 稿件 {} 共 {} 张待处理的图", manuscript_id, total);
}

/// 全部图的处理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub panels: usize,
    pub conflicts: usize,
}

/// 打印最终统计信息
///
/// # 参数
/// - `stats`: 图处理统计
/// - `usage`: 累计 token 用量
/// - `output_file`: 输出文件路径
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(
    stats: &RunStats,
    usage: &TokenUsage,
    output_file: &Path,
    log_file_path: &Path,
) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 已处理: {}/{}", stats.processed, stats.total);
    info!("⏭️ 跳过: {}", stats.skipped);
    info!("❌ 失败: {}", stats.failed);
    info!("🧩 子图: {}，冲突: {}", stats.panels, stats.conflicts);
    info!(
        "💰 Token 用量: prompt {} / completion {} / total {}",
        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
    );
    info!("{}", "=".repeat(60));
    info!("\n结果已保存至: {}", output_file.display());
    info!("日志已保存至: {}", log_file_path.display());
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("abc", 5), "abc");
        assert_eq!(truncate_text("图注很长很长", 2), "图注...");
    }

    #[test]
    fn test_startup_level_from_env() {
        std::env::set_var("LOG_LEVEL", "debug");
        assert_eq!(startup_level(), "debug");

        std::env::set_var("LOG_LEVEL", "  ");
        assert_eq!(startup_level(), "info");

        std::env::remove_var("LOG_LEVEL");
        assert_eq!(startup_level(), "info");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init("debug");
        init("info");
    }

    #[test]
    fn test_log_file_header_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run.txt");

        init_log_file(&path).unwrap();
        append_log_line(&path, "Figure 1: 3 个子图").unwrap();
        append_log_line(&path, "Figure 2: 跳过").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(&"=".repeat(60)));
        assert!(content.contains("子图整理日志"));
        assert!(content.ends_with("Figure 1: 3 个子图\nFigure 2: 跳过\n"));
    }
}
