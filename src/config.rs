use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult, ConfigError, FileError};
use crate::services::reconciler::{ConflictPolicy, ReconcileOptions};

/// 支持视觉输入的模型
const VISION_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4o-2024-08-06",
    "gpt-4o-mini-2024-07-18",
    "gpt-5",
];

/// 程序配置文件
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 输入输出 ---
    /// 稿件结构 JSON
    pub input_structure: PathBuf,
    /// 检测结果 JSON（图标签 -> 检测列表）
    pub detections_file: PathBuf,
    /// 图像文件的根目录（`img_files` 相对于该目录）
    pub image_root: PathBuf,
    /// 输出的稿件结构 JSON
    pub output_file: PathBuf,
    /// 运行日志文件
    pub output_log_file: PathBuf,

    // --- 并发 ---
    /// 同时处理的图数量
    pub max_concurrent_figures: usize,
    /// 单张图内同时进行的子图匹配请求数量
    pub max_concurrent_panels: usize,

    // --- 检测与对账 ---
    /// 检测置信度下限
    pub confidence_threshold: f64,
    /// 每张图最多保留的检测数量
    pub max_detections: usize,
    /// 图像最长边（像素）
    pub max_image_size: u32,
    /// 冲突落败者是否提升为新子图
    pub promote_conflict_losers: bool,

    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
    pub llm_top_p: f32,
    pub llm_max_tokens: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_structure: PathBuf::from("data/structure.json"),
            detections_file: PathBuf::from("data/detections.json"),
            image_root: PathBuf::from("data"),
            output_file: PathBuf::from("output/structure_panels.json"),
            output_log_file: PathBuf::from("output.txt"),
            max_concurrent_figures: 4,
            max_concurrent_panels: 8,
            confidence_threshold: 0.25,
            max_detections: 30,
            max_image_size: 2048,
            promote_conflict_losers: false,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            llm_temperature: 0.1,
            llm_top_p: 1.0,
            llm_max_tokens: 512,
        }
    }
}

impl Config {
    /// 加载配置：`PANEL_CURATION_CONFIG` 指向的 TOML 文件（可选），再用环境变量覆盖
    pub fn load() -> AppResult<Self> {
        let base = match std::env::var("PANEL_CURATION_CONFIG") {
            Ok(path) => Self::from_toml_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        let config = base.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件读取，缺省字段使用默认值
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        toml::from_str(&content).map_err(|e| {
            AppError::File(FileError::TomlParseFailed {
                path: path.display().to_string(),
                source: Box::new(e),
            })
        })
    }

    /// 用已设置的环境变量覆盖当前配置；值无法解析时报错
    pub fn with_env_overrides(mut self) -> AppResult<Self> {
        if let Some(v) = env_var("INPUT_STRUCTURE") {
            self.input_structure = PathBuf::from(v);
        }
        if let Some(v) = env_var("DETECTIONS_FILE") {
            self.detections_file = PathBuf::from(v);
        }
        if let Some(v) = env_var("IMAGE_ROOT") {
            self.image_root = PathBuf::from(v);
        }
        if let Some(v) = env_var("OUTPUT_FILE") {
            self.output_file = PathBuf::from(v);
        }
        if let Some(v) = env_var("OUTPUT_LOG_FILE") {
            self.output_log_file = PathBuf::from(v);
        }
        if let Some(v) = env_var("LLM_API_KEY").or_else(|| env_var("OPENAI_API_KEY")) {
            self.llm_api_key = v;
        }
        if let Some(v) = env_var("LLM_API_BASE_URL") {
            self.llm_api_base_url = v;
        }
        if let Some(v) = env_var("LLM_MODEL_NAME") {
            self.llm_model_name = v;
        }
        override_parsed(&mut self.max_concurrent_figures, "MAX_CONCURRENT_FIGURES", "usize")?;
        override_parsed(&mut self.max_concurrent_panels, "MAX_CONCURRENT_PANELS", "usize")?;
        override_parsed(&mut self.confidence_threshold, "CONFIDENCE_THRESHOLD", "f64")?;
        override_parsed(&mut self.max_detections, "MAX_DETECTIONS", "usize")?;
        override_parsed(&mut self.max_image_size, "MAX_IMAGE_SIZE", "u32")?;
        override_parsed(&mut self.promote_conflict_losers, "PROMOTE_CONFLICT_LOSERS", "bool")?;
        override_parsed(&mut self.llm_temperature, "LLM_TEMPERATURE", "f32")?;
        override_parsed(&mut self.llm_top_p, "LLM_TOP_P", "f32")?;
        override_parsed(&mut self.llm_max_tokens, "LLM_MAX_TOKENS", "u32")?;
        Ok(self)
    }

    /// 校验配置取值
    pub fn validate(&self) -> AppResult<()> {
        if self.max_concurrent_figures == 0 {
            return Err(AppError::invalid_config("max_concurrent_figures", "必须大于 0"));
        }
        if self.max_concurrent_panels == 0 {
            return Err(AppError::invalid_config("max_concurrent_panels", "必须大于 0"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(AppError::invalid_config(
                "confidence_threshold",
                format!("必须在 [0, 1] 之间，实际为 {}", self.confidence_threshold),
            ));
        }
        if self.max_image_size == 0 {
            return Err(AppError::invalid_config("max_image_size", "必须大于 0"));
        }
        if self.llm_model_name.trim().is_empty() {
            return Err(AppError::invalid_config("llm_model_name", "不能为空"));
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(AppError::invalid_config(
                "llm_temperature",
                format!("必须在 [0, 2] 之间，实际为 {}", self.llm_temperature),
            ));
        }
        if !(0.0..=1.0).contains(&self.llm_top_p) {
            return Err(AppError::invalid_config(
                "llm_top_p",
                format!("必须在 [0, 1] 之间，实际为 {}", self.llm_top_p),
            ));
        }
        if !VISION_MODELS.contains(&self.llm_model_name.as_str()) {
            tracing::warn!(
                "模型 {} 不在已验证的视觉模型列表中: {:?}",
                self.llm_model_name,
                VISION_MODELS
            );
        }
        Ok(())
    }

    /// 对账选项
    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            conflict_policy: if self.promote_conflict_losers {
                ConflictPolicy::PromoteToNewPanel
            } else {
                ConflictPolicy::RecordOnly
            },
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn override_parsed<T: std::str::FromStr>(
    target: &mut T,
    var_name: &str,
    expected_type: &str,
) -> AppResult<()> {
    if let Some(value) = env_var(var_name) {
        *target = value.parse().map_err(|_| {
            AppError::Config(ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value: value.clone(),
                expected_type: expected_type.to_string(),
            })
        })?;
    }
    Ok(())
}
