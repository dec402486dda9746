//! 对话核心：消息、参考图片暂存、确认标记识别、流式聚合、对话控制器

pub mod aggregator;
pub mod attachments;
pub mod context;
pub mod controller;
pub mod intent;
pub mod message;

pub use aggregator::{AggregateOutcome, AggregatedTurn, StreamAggregator};
pub use attachments::{
    AttachmentEvent, AttachmentManager, AttachmentSource, ImageFile, ReferenceImage,
};
pub use context::{ChatContext, Greetings, Subject};
pub use controller::{ControllerOptions, ConversationController, TurnOutcome};
pub use intent::{ConfirmationKind, IntentMatch, ParsedIntent, PendingConfirmation};
pub use message::{ChatMessage, ChatRole, GroundingCitation};
