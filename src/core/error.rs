//! 错误类型
//!
//! - ValidationError：本地校验失败（附件超限、空消息、空提示词），在任何网络调用前同步返回，不进入对话记录
//! - ServiceError：远端服务失败（传输、配额、计费、空结果），在 Controller 边界转为带 is_error 标记的消息

use thiserror::Error;

/// 配额耗尽时展示给用户的固定提示
pub const QUOTA_EXCEEDED_MESSAGE: &str = "Se ha excedido tu cuota actual de la API de Gemini. Por favor, revisa tu plan y detalles de facturación en Google Cloud. Para más información: https://ai.google.dev/gemini-api/docs/rate-limits";

/// 图像生成需要计费账户时的固定提示
pub const BILLING_REQUIRED_MESSAGE: &str = "La generación de imágenes requiere una cuenta con facturación activa en Google Cloud. Revisa la configuración de facturación de tu proyecto e inténtalo de nuevo.";

/// 本地校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("El mensaje está vacío")]
    EmptyMessage,

    #[error("Ya has alcanzado el máximo de {max} imágenes de referencia.")]
    TooManyAttachments { max: usize },

    #[error("La imagen \"{name}\" es demasiado grande ({size} bytes, máx {max} bytes).")]
    TooLarge { name: String, size: usize, max: usize },

    #[error("El archivo \"{name}\" no es una imagen ({mime}).")]
    UnsupportedMedia { name: String, mime: String },

    #[error("Data URL inválida: {0}")]
    InvalidDataUrl(String),

    #[error("No se pudo leer \"{name}\": {reason}")]
    Io { name: String, reason: String },

    #[error("El prompt para generar la imagen no puede estar vacío.")]
    EmptyPrompt,

    #[error("Índice de imagen de referencia fuera de rango: {0}")]
    NoSuchAttachment(usize),

    #[error("El mensaje {0} no contiene una imagen generada.")]
    NoSuchImage(usize),
}

/// 远端服务错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Gemini no está configurado: {0}")]
    NotConfigured(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("got status: {status} {message}")]
    Status { status: u16, message: String },

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Billing required: {0}")]
    BillingRequired(String),

    #[error("No se pudo generar la imagen. {0}")]
    EmptyResult(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// 按 HTTP 状态与响应体中的常见子串归类：429 / RESOURCE_EXHAUSTED 为配额，billed users / billing 为计费
    pub fn classify(status: u16, body: &str) -> Self {
        let upper = body.to_uppercase();
        if status == 429 || upper.contains("RESOURCE_EXHAUSTED") || upper.contains("QUOTA") {
            return ServiceError::QuotaExceeded(body.to_string());
        }
        if upper.contains("BILLED USERS") || upper.contains("BILLING") {
            return ServiceError::BillingRequired(body.to_string());
        }
        ServiceError::Status {
            status,
            message: body.to_string(),
        }
    }

    /// 从 SDK/传输层给出的自由文本中识别配额错误（需同时包含 429 与 RESOURCE_EXHAUSTED）
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let upper = message.to_uppercase();
        if upper.contains("429") && upper.contains("RESOURCE_EXHAUSTED") {
            ServiceError::QuotaExceeded(message)
        } else if upper.contains("BILLED USERS") {
            ServiceError::BillingRequired(message)
        } else {
            ServiceError::Transport(message)
        }
    }

    pub fn is_quota_or_billing(&self) -> bool {
        matches!(
            self,
            ServiceError::QuotaExceeded(_) | ServiceError::BillingRequired(_)
        )
    }

    /// 面向用户的文本：配额/计费给出可操作的固定提示，其余包装为 Gemini API 错误
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::QuotaExceeded(_) => QUOTA_EXCEEDED_MESSAGE.to_string(),
            ServiceError::BillingRequired(_) => BILLING_REQUIRED_MESSAGE.to_string(),
            ServiceError::EmptyResult(_) => self.to_string(),
            other => format!("Error de la API de Gemini: {}", other),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => ServiceError::classify(status.as_u16(), &e.to_string()),
            None => ServiceError::from_message(e.to_string()),
        }
    }
}

/// 一轮对话可能返回的错误（校验错误同步返回给提交方；服务错误一般已写入对话记录）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}
