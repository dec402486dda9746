//! 网关层：AI 服务抽象与实现（Gemini REST / 脚本化 Mock）

pub mod gemini;
pub mod mock;
pub mod sse;
pub mod traits;

pub use gemini::{extract_citations, requires_search, GeminiGateway};
pub use mock::{ScriptedGateway, ScriptedReply};
pub use traits::{
    AiGateway, ConversationSession, Part, ResponseChunk, ResponseStream, SessionTurn, TurnRequest,
};
