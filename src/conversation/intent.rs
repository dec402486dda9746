//! 确认标记识别
//!
//! 模型在需要用户批准副作用操作时，会以固定句式结束回复：
//!
//! ```text
//! Confirmar generación de imagen: <描述>. ¿Sí o no?
//! Confirmar generación de imagen combinada: <描述>. ¿Sí o no?
//! Confirmar generación del plan de video: <描述>. ¿Sí o no?
//! ```
//!
//! 三个模式大小写不敏感、描述可跨行，且锚定在文本末尾（问号后只允许空白）。解析器报告所有命中，
//! 不做取舍；取舍由 PendingConfirmation::from_matches 按固定优先级完成。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// 确认类型；PRECEDENCE 决定同时命中多个时采用哪一个
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationKind {
    Image,
    MultiImage,
    VideoPlan,
}

impl ConfirmationKind {
    /// 优先级：Image > MultiImage > VideoPlan
    pub const PRECEDENCE: [ConfirmationKind; 3] = [
        ConfirmationKind::Image,
        ConfirmationKind::MultiImage,
        ConfirmationKind::VideoPlan,
    ];

    /// 标记句中的固定动作标签
    pub fn action_label(self) -> &'static str {
        match self {
            ConfirmationKind::Image => "Confirmar generación de imagen",
            ConfirmationKind::MultiImage => "Confirmar generación de imagen combinada",
            ConfirmationKind::VideoPlan => "Confirmar generación del plan de video",
        }
    }

    /// UI 横幅中的名词
    pub fn noun(self) -> &'static str {
        match self {
            ConfirmationKind::Image => "la imagen",
            ConfirmationKind::MultiImage => "la imagen combinada",
            ConfirmationKind::VideoPlan => "el plan de video",
        }
    }

    fn regex(self) -> &'static Regex {
        static IMAGE: OnceLock<Regex> = OnceLock::new();
        static MULTI_IMAGE: OnceLock<Regex> = OnceLock::new();
        static VIDEO_PLAN: OnceLock<Regex> = OnceLock::new();
        let cell = match self {
            ConfirmationKind::Image => &IMAGE,
            ConfirmationKind::MultiImage => &MULTI_IMAGE,
            ConfirmationKind::VideoPlan => &VIDEO_PLAN,
        };
        cell.get_or_init(|| {
            let pattern = format!(
                r"(?is){}: (.*?)\. ¿Sí o no\?\s*\z",
                regex::escape(self.action_label())
            );
            Regex::new(&pattern).unwrap()
        })
    }
}

/// 一次命中
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IntentMatch {
    pub kind: ConfirmationKind,
    pub description: String,
}

/// 解析结果：命中列表（按 PRECEDENCE 顺序），为空即“无确认请求”（不是错误）
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParsedIntent {
    pub matches: Vec<IntentMatch>,
}

impl ParsedIntent {
    pub fn is_none(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn get(&self, kind: ConfirmationKind) -> Option<&str> {
        self.matches
            .iter()
            .find(|m| m.kind == kind)
            .map(|m| m.description.as_str())
    }
}

/// 扫描定稿后的模型输出；描述去除首尾空白，空描述不算命中
pub fn parse(final_text: &str) -> ParsedIntent {
    let matches = ConfirmationKind::PRECEDENCE
        .iter()
        .filter_map(|&kind| {
            let caps = kind.regex().captures(final_text)?;
            let description = caps.get(1)?.as_str().trim();
            if description.is_empty() {
                None
            } else {
                Some(IntentMatch {
                    kind,
                    description: description.to_string(),
                })
            }
        })
        .collect();
    ParsedIntent { matches }
}

/// 待确认状态：同一时刻至多一个
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "description", rename_all = "snake_case")]
pub enum PendingConfirmation {
    #[default]
    None,
    AwaitingImage(String),
    AwaitingMultiImage(String),
    AwaitingVideoPlan(String),
}

impl PendingConfirmation {
    pub fn awaiting(kind: ConfirmationKind, description: impl Into<String>) -> Self {
        let description = description.into();
        match kind {
            ConfirmationKind::Image => PendingConfirmation::AwaitingImage(description),
            ConfirmationKind::MultiImage => PendingConfirmation::AwaitingMultiImage(description),
            ConfirmationKind::VideoPlan => PendingConfirmation::AwaitingVideoPlan(description),
        }
    }

    /// 按 PRECEDENCE 取第一个命中的类型
    pub fn from_matches(parsed: &ParsedIntent) -> Self {
        ConfirmationKind::PRECEDENCE
            .iter()
            .find_map(|&kind| parsed.get(kind).map(|d| Self::awaiting(kind, d)))
            .unwrap_or_default()
    }

    pub fn kind(&self) -> Option<ConfirmationKind> {
        match self {
            PendingConfirmation::None => None,
            PendingConfirmation::AwaitingImage(_) => Some(ConfirmationKind::Image),
            PendingConfirmation::AwaitingMultiImage(_) => Some(ConfirmationKind::MultiImage),
            PendingConfirmation::AwaitingVideoPlan(_) => Some(ConfirmationKind::VideoPlan),
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            PendingConfirmation::None => None,
            PendingConfirmation::AwaitingImage(d)
            | PendingConfirmation::AwaitingMultiImage(d)
            | PendingConfirmation::AwaitingVideoPlan(d) => Some(d),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, PendingConfirmation::None)
    }

    /// 取出当前值并复位为 None
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

/// 用户回复归一化：去首尾空白并转小写
pub fn normalize(reply: &str) -> String {
    reply.trim().to_lowercase()
}

/// 肯定回复：sí / si / yes
pub fn is_affirmative(reply: &str) -> bool {
    matches!(normalize(reply).as_str(), "sí" | "si" | "yes")
}

/// 明确否定：仅 no
pub fn is_negative(reply: &str) -> bool {
    normalize(reply) == "no"
}
