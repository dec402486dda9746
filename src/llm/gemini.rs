//! Gemini REST 网关
//!
//! - 文本：`models/{text_model}:streamGenerateContent?alt=sse`，SSE 每个事件是一个 GenerateContentResponse
//! - 图像：`models/{image_model}:predict`（Imagen），返回 base64 JPEG
//!
//! 会话历史保存在 ConversationSession 中；只有一轮流完整结束才把 user/model 两条写入历史。

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::GeminiSection;
use crate::conversation::{ChatRole, GroundingCitation};
use crate::core::{ChatError, ServiceError, ValidationError};
use crate::llm::{
    AiGateway, ConversationSession, Part, ResponseChunk, ResponseStream, SessionTurn, TurnRequest,
};

/// 始终启用搜索的场景标签
const SEARCH_CONTEXT_TAG: &str = "studies-financialmarkets";
/// 错误响应体最多保留的字符数
const MAX_ERROR_BODY_CHARS: usize = 800;

static SEARCH_TRIGGER_RE: OnceLock<Regex> = OnceLock::new();

/// 是否为本轮启用 Google Search：金融场景始终启用，其它场景看是否询问时事
pub fn requires_search(text: &str, context_tag: Option<&str>) -> bool {
    if context_tag == Some(SEARCH_CONTEXT_TAG) {
        return true;
    }
    let re = SEARCH_TRIGGER_RE.get_or_init(|| {
        Regex::new(r"(?i)noticias de hoy|últimas noticias|qué pasó con|eventos recientes en").unwrap()
    });
    re.is_match(text)
}

// ---- 请求体 ----

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<WireContent>,
    system_instruction: WireContent,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WirePart {
    Text { text: String },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: WireBlob,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool {
    google_search: serde_json::Value,
}

impl WireContent {
    fn from_turn(turn: &SessionTurn) -> Self {
        let role = match turn.role {
            ChatRole::User => "user",
            ChatRole::Model => "model",
        };
        Self {
            role: Some(role),
            parts: turn.parts.iter().map(WirePart::from).collect(),
        }
    }
}

impl From<&Part> for WirePart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(text) => WirePart::Text { text: text.clone() },
            Part::InlineData { mime_type, data } => WirePart::Inline {
                inline_data: WireBlob {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                },
            },
        }
    }
}

// ---- 响应体 ----

/// streamGenerateContent 的单个事件
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CandidatePart {
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroundingChunk {
    pub web: Option<WebSource>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebSource {
    pub uri: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiError {
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
    pub status: Option<String>,
}

impl ApiError {
    fn into_service_error(self) -> ServiceError {
        let body = match &self.status {
            Some(status) => format!("{} ({})", self.message, status),
            None => self.message.clone(),
        };
        ServiceError::classify(self.code.unwrap_or(500), &body)
    }
}

impl GenerateContentResponse {
    /// 首个候选的全部文本片段拼接
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// 从单个响应事件中读取检索引用；没有 groundingChunks 时返回 None
pub fn extract_citations(response: &GenerateContentResponse) -> Option<Vec<GroundingCitation>> {
    let metadata = response.candidates.first()?.grounding_metadata.as_ref()?;
    if metadata.grounding_chunks.is_empty() {
        return None;
    }
    Some(
        metadata
            .grounding_chunks
            .iter()
            .map(|chunk| GroundingCitation {
                title: chunk.web.as_ref().and_then(|w| w.title.clone()),
                uri: chunk.web.as_ref().and_then(|w| w.uri.clone()),
            })
            .collect(),
    )
}

/// 解析一个 SSE data 负载为增量块
fn parse_event(data: &str) -> Result<ResponseChunk, ServiceError> {
    let response: GenerateContentResponse =
        serde_json::from_str(data).map_err(|e| ServiceError::Malformed(format!("{}: {}", e, data)))?;
    if let Some(err) = response.error {
        return Err(err.into_service_error());
    }
    Ok(ResponseChunk {
        text_delta: response.text(),
        citations: extract_citations(&response),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictRequest {
    instances: Vec<PredictInstance>,
    parameters: PredictParameters,
}

#[derive(Debug, Serialize)]
struct PredictInstance {
    prompt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
    sample_count: u32,
    output_mime_type: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct PredictResponse {
    predictions: Option<Vec<Prediction>>,
    error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    rai_filtered_reason: Option<String>,
}

/// Gemini 网关：持有 HTTP 客户端、端点与模型名
pub struct GeminiGateway {
    http: Client,
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
    /// 生图请求的整体超时；流式请求只限制连接时间，正文长度不设上限
    request_timeout: Duration,
}

impl GeminiGateway {
    pub fn new(section: &GeminiSection) -> Result<Self, ServiceError> {
        let api_key = section.resolve_api_key().ok_or_else(|| {
            ServiceError::NotConfigured("GEMINI_API_KEY / API_KEY no está definido".to_string())
        })?;
        let request_timeout = Duration::from_secs(section.request_timeout_secs);
        let http = Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            base_url: section.base_url.trim_end_matches('/').to_string(),
            text_model: section.text_model.clone(),
            image_model: section.image_model.clone(),
            request_timeout,
        })
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ServiceError> {
        let mut req = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body);
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let body: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
        Err(ServiceError::classify(status, &body))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ServiceError>> + Send>>;

/// unfold 的状态：原始字节流 + SSE 缓冲 + 待吐出的事件 + 本轮累计文本
struct TurnStreamState {
    body: ByteStream,
    decoder: crate::llm::sse::SseDecoder,
    pending: VecDeque<String>,
    accumulated: String,
    session: ConversationSession,
    user_turn: SessionTurn,
    exhausted: bool,
    failed: bool,
    committed: bool,
}

impl TurnStreamState {
    fn new(body: ByteStream, session: ConversationSession, user_turn: SessionTurn) -> Self {
        Self {
            body,
            decoder: crate::llm::sse::SseDecoder::new(),
            pending: VecDeque::new(),
            accumulated: String::new(),
            session,
            user_turn,
            exhausted: false,
            failed: false,
            committed: false,
        }
    }

    fn into_stream(self) -> ResponseStream {
        Box::pin(stream::unfold(self, |st| st.next_item()))
    }

    async fn next_item(mut self) -> Option<(Result<ResponseChunk, ServiceError>, Self)> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(data) = self.pending.pop_front() {
                return match parse_event(&data) {
                    Ok(chunk) => {
                        self.accumulated.push_str(&chunk.text_delta);
                        Some((Ok(chunk), self))
                    }
                    Err(e) => {
                        self.failed = true;
                        Some((Err(e), self))
                    }
                };
            }
            if self.exhausted {
                if !self.committed {
                    self.committed = true;
                    let model_turn = SessionTurn {
                        role: ChatRole::Model,
                        parts: vec![Part::Text(std::mem::take(&mut self.accumulated))],
                    };
                    self.session
                        .record_exchange(self.user_turn.clone(), model_turn)
                        .await;
                    tracing::debug!(session = %self.session.id, "turn recorded in session history");
                }
                return None;
            }
            match self.body.next().await {
                Some(Ok(bytes)) => {
                    let events = self.decoder.feed(&bytes);
                    self.pending.extend(events);
                }
                Some(Err(e)) => {
                    self.failed = true;
                    return Some((Err(e), self));
                }
                None => {
                    self.exhausted = true;
                    if let Some(rest) = self.decoder.finish() {
                        self.pending.push_back(rest);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl AiGateway for GeminiGateway {
    async fn open_session(&self, system_prompt: &str) -> Result<ConversationSession, ServiceError> {
        let session = ConversationSession::new(system_prompt);
        tracing::info!(session = %session.id, model = %self.text_model, "Gemini session opened");
        Ok(session)
    }

    async fn send_turn(
        &self,
        session: &ConversationSession,
        request: TurnRequest,
    ) -> Result<ResponseStream, ServiceError> {
        let user_turn = SessionTurn {
            role: ChatRole::User,
            parts: request.content_parts(),
        };
        let mut contents: Vec<WireContent> = session
            .history()
            .await
            .iter()
            .map(WireContent::from_turn)
            .collect();
        contents.push(WireContent::from_turn(&user_turn));

        let search = requires_search(request.text_for_search(), request.context_tag.as_deref());
        let tools = if search {
            vec![WireTool {
                google_search: serde_json::json!({}),
            }]
        } else {
            Vec::new()
        };

        let body = GenerateContentRequest {
            contents,
            system_instruction: WireContent {
                role: None,
                parts: vec![WirePart::Text {
                    text: session.system_prompt.to_string(),
                }],
            },
            tools,
        };

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.text_model
        );
        tracing::info!(
            session = %session.id,
            parts = user_turn.parts.len(),
            search,
            "sending turn to Gemini"
        );
        let resp = self.post_json(&url, &body, None).await?;

        let body: ByteStream = Box::pin(
            resp.bytes_stream()
                .map(|r| r.map(|b| b.to_vec()).map_err(ServiceError::from)),
        );
        Ok(TurnStreamState::new(body, session.clone(), user_turn).into_stream())
    }

    async fn synthesize_image(&self, prompt: &str) -> Result<String, ChatError> {
        if prompt.trim().is_empty() {
            tracing::error!("Image generation failed: prompt is empty");
            return Err(ValidationError::EmptyPrompt.into());
        }
        tracing::info!(model = %self.image_model, "generating image");

        let url = format!("{}/models/{}:predict", self.base_url, self.image_model);
        let body = PredictRequest {
            instances: vec![PredictInstance {
                prompt: prompt.to_string(),
            }],
            parameters: PredictParameters {
                sample_count: 1,
                output_mime_type: "image/jpeg",
            },
        };
        let resp = self
            .post_json(&url, &body, Some(self.request_timeout))
            .await?;
        let parsed: PredictResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(err.into_service_error().into());
        }
        let predictions = parsed.predictions.unwrap_or_default();
        if let Some(bytes) = predictions
            .iter()
            .find_map(|p| p.bytes_base64_encoded.clone())
            .filter(|b| !b.is_empty())
        {
            return Ok(bytes);
        }

        let reason = match predictions.iter().find_map(|p| p.rai_filtered_reason.clone()) {
            Some(filtered) => format!("Error en la imagen generada: {}", filtered),
            None if predictions.is_empty() => "La API no generó ninguna imagen. Esto podría deberse a filtros de contenido internos de la API o a un prompt que no pudo ser procesado.".to_string(),
            None => "La API no devolvió datos de imagen válidos.".to_string(),
        };
        tracing::error!(%reason, "image generation returned no data");
        Err(ServiceError::EmptyResult(reason).into())
    }
}
