//! 流式聚合
//!
//! 按到达顺序拼接增量文本，每个片段之后把累计文本回调给调用方（用于实时刷新正在生成的消息）。
//! 引用只采样一次：第一个带非空引用的片段被捕获，之后的引用数据全部忽略。流结束时若已捕获引用，
//! 在文本末尾追加来源列表。

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::conversation::GroundingCitation;
use crate::core::ServiceError;
use crate::llm::{ResponseChunk, ResponseStream};

pub const SOURCES_HEADER: &str = "\n\nFuentes (Google Search):";

/// 流正常结束后的定稿结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatedTurn {
    /// 拼接文本 + 来源列表
    pub text: String,
    pub citations: Option<Vec<GroundingCitation>>,
    pub chunk_count: usize,
}

/// 聚合的三种结局
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AggregateOutcome {
    Completed(AggregatedTurn),
    /// 流中途出错：保留已收到的部分文本，不重试
    Failed { partial: String, error: ServiceError },
    /// 会话被替换，流在下一个挂起点被丢弃
    Cancelled { partial: String },
}

#[derive(Debug, Default)]
pub struct StreamAggregator {
    accumulated: String,
    citations: Option<Vec<GroundingCitation>>,
    chunk_count: usize,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 应用一个片段，返回当前累计文本
    pub fn push(&mut self, chunk: ResponseChunk) -> &str {
        self.chunk_count += 1;
        self.accumulated.push_str(&chunk.text_delta);
        if self.citations.is_none() {
            if let Some(citations) = chunk.citations.filter(|c| !c.is_empty()) {
                tracing::debug!(count = citations.len(), "captured grounding citations");
                self.citations = Some(citations);
            }
        }
        &self.accumulated
    }

    pub fn text(&self) -> &str {
        &self.accumulated
    }

    pub fn citations(&self) -> Option<&[GroundingCitation]> {
        self.citations.as_deref()
    }

    /// 定稿：有引用时追加来源列表
    pub fn finish(self) -> AggregatedTurn {
        let mut text = self.accumulated;
        if let Some(citations) = &self.citations {
            text.push_str(&citation_footer(citations));
        }
        AggregatedTurn {
            text,
            citations: self.citations,
            chunk_count: self.chunk_count,
        }
    }

    /// 消费整条流；每个片段后以累计文本调用 on_text。cancel 触发时立即停止并丢弃流。
    pub async fn run<F>(
        mut self,
        mut stream: ResponseStream,
        cancel: &CancellationToken,
        mut on_text: F,
    ) -> AggregateOutcome
    where
        F: FnMut(&str),
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(chunks = self.chunk_count, "stream cancelled");
                    return AggregateOutcome::Cancelled { partial: self.accumulated };
                }
                item = stream.next() => item,
            };
            match next {
                Some(Ok(chunk)) => {
                    let text = self.push(chunk);
                    on_text(text);
                }
                Some(Err(error)) => {
                    tracing::warn!(chunks = self.chunk_count, "stream failed: {}", error);
                    return AggregateOutcome::Failed {
                        partial: self.accumulated,
                        error,
                    };
                }
                None => return AggregateOutcome::Completed(self.finish()),
            }
        }
    }
}

/// 来源列表；编号取引用在数组中的位置，没有 URI 的条目跳过
pub fn citation_footer(citations: &[GroundingCitation]) -> String {
    let mut footer = String::from(SOURCES_HEADER);
    for (i, citation) in citations.iter().enumerate() {
        let Some(uri) = citation.uri.as_deref().filter(|u| !u.is_empty()) else {
            continue;
        };
        let label = citation
            .title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(uri);
        footer.push_str(&format!("\n{}. [{}]({})", i + 1, label, uri));
    }
    footer
}

/// 流失败后的消息文本：错误说明在前，已收到的部分文本在后
pub fn failure_text(partial: &str, error: &ServiceError) -> String {
    let annotation = format!("Error al contactar con Luxoré: {}", error.user_message());
    if partial.is_empty() {
        annotation
    } else {
        format!("{}\n\n{}", annotation, partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn boxed(items: Vec<Result<ResponseChunk, ServiceError>>) -> ResponseStream {
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn test_live_text_is_prefix_concatenation() {
        let items = ["Hola", ", ", "mundo", "!"]
            .into_iter()
            .map(|s| Ok(ResponseChunk::text(s)))
            .collect();
        let mut seen = Vec::new();
        let outcome = StreamAggregator::new()
            .run(boxed(items), &CancellationToken::new(), |t| seen.push(t.to_string()))
            .await;
        assert_eq!(seen, vec!["Hola", "Hola, ", "Hola, mundo", "Hola, mundo!"]);
        match outcome {
            AggregateOutcome::Completed(turn) => {
                assert_eq!(turn.text, "Hola, mundo!");
                assert_eq!(turn.chunk_count, 4);
                assert!(turn.citations.is_none());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_citations_captured_once() {
        let a = GroundingCitation::new("A", "https://a.example");
        let b = GroundingCitation::new("B", "https://b.example");
        let items = vec![
            Ok(ResponseChunk::text("uno ")),
            Ok(ResponseChunk::text("dos ").with_citations(vec![a.clone()])),
            Ok(ResponseChunk::text("tres").with_citations(vec![b])),
        ];
        let outcome = StreamAggregator::new()
            .run(boxed(items), &CancellationToken::new(), |_| {})
            .await;
        let AggregateOutcome::Completed(turn) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(turn.citations, Some(vec![a]));
        assert_eq!(
            turn.text,
            "uno dos tres\n\nFuentes (Google Search):\n1. [A](https://a.example)"
        );
    }

    #[test]
    fn test_empty_citation_list_not_captured() {
        let mut agg = StreamAggregator::new();
        agg.push(ResponseChunk::text("x").with_citations(vec![]));
        assert!(agg.citations().is_none());
        agg.push(ResponseChunk::text("y").with_citations(vec![GroundingCitation::new("T", "u")]));
        assert_eq!(agg.citations().map(|c| c.len()), Some(1));
    }

    #[test]
    fn test_footer_skips_missing_uri_and_falls_back_to_uri_label() {
        let citations = vec![
            GroundingCitation { title: Some("Sin enlace".into()), uri: None },
            GroundingCitation { title: None, uri: Some("https://b.example".into()) },
        ];
        assert_eq!(
            citation_footer(&citations),
            "\n\nFuentes (Google Search):\n2. [https://b.example](https://b.example)"
        );
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_text() {
        let items = vec![
            Ok(ResponseChunk::text("parcial")),
            Err(ServiceError::Transport("connection reset".into())),
            Ok(ResponseChunk::text("nunca")),
        ];
        let outcome = StreamAggregator::new()
            .run(boxed(items), &CancellationToken::new(), |_| {})
            .await;
        match outcome {
            AggregateOutcome::Failed { partial, error } => {
                assert_eq!(partial, "parcial");
                let text = failure_text(&partial, &error);
                assert!(text.starts_with("Error al contactar con Luxoré: "));
                assert!(text.ends_with("\n\nparcial"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_pending_stream() {
        let items = stream::iter(vec![Ok(ResponseChunk::text("antes"))]).chain(stream::pending());
        let token = CancellationToken::new();
        let trigger = token.clone();
        let outcome = StreamAggregator::new()
            .run(Box::pin(items), &token, move |_| trigger.cancel())
            .await;
        assert_eq!(
            outcome,
            AggregateOutcome::Cancelled {
                partial: "antes".into()
            }
        );
    }
}
