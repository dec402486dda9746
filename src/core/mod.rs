//! 核心编排层：错误分类、状态投影、会话监管、主控循环

pub mod error;
pub mod orchestrator;
pub mod session_supervisor;
pub mod state;

pub use error::{ChatError, ServiceError, ValidationError};
pub use orchestrator::{create_chat, create_gateway_from_config, Command};
pub use session_supervisor::SessionSupervisor;
pub use state::{ChatPhase, StagedAttachment, UiState};
