//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LUXORE__*` 覆盖（双下划线表示嵌套，如 `LUXORE__GEMINI__TEXT_MODEL=...`）。
//! API Key 不建议写入文件：未配置时依次读取 `GEMINI_API_KEY`、`API_KEY`。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub gemini: GeminiSection,
    #[serde(default)]
    pub attachments: AttachmentsSection,
    #[serde(default)]
    pub conversation: ConversationSection,
}

/// [app] 段：助手名、对话场景、问候语覆盖
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 场景标签：general / studies-mathematics / ... / studies-financialmarkets
    #[serde(default = "default_context")]
    pub context: String,
    /// 覆盖场景自带的问候语
    pub greeting: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            context: default_context(),
            greeting: None,
        }
    }
}

fn default_app_name() -> String {
    "Luxoré".to_string()
}

fn default_context() -> String {
    "general".to_string()
}

/// [gemini] 段：端点、模型、超时
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for GeminiSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            request_timeout_secs: default_request_timeout(),
            api_key: None,
        }
    }
}

impl GeminiSection {
    /// 配置文件优先，其次 GEMINI_API_KEY，最后 API_KEY
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .or_else(|| std::env::var("API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_text_model() -> String {
    "gemini-2.5-flash-preview-04-17".to_string()
}

fn default_image_model() -> String {
    "imagen-3.0-generate-002".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// [attachments] 段：参考图片数量与单张大小上限
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentsSection {
    #[serde(default = "default_max_count")]
    pub max_count: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for AttachmentsSection {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_max_count() -> usize {
    3
}

fn default_max_bytes() -> usize {
    4 * 1024 * 1024
}

/// [conversation] 段：确认流程的行为开关
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConversationSection {
    /// true 时视频计划确认与图像确认一致：任何非肯定回复都会取消并提示
    #[serde(default)]
    pub unify_video_plan_cancellation: bool,
}

/// 从 config 目录加载配置，环境变量 LUXORE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LUXORE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LUXORE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
