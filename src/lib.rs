//! Luxoré - 终端里的 Gemini 对话客户端
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 对话核心（参考图片暂存、确认标记识别、流式聚合、控制器状态机）
//! - **core**: 错误分类、状态投影、会话监管、主控循环
//! - **llm**: AI 网关抽象与实现（Gemini REST / 脚本化 Mock）
//! - **observability**: tracing 初始化
//! - **ui**: Ratatui TUI 界面

pub mod config;
pub mod conversation;
pub mod core;
pub mod llm;
pub mod observability;
pub mod ui;
