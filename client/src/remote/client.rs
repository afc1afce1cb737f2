//! Streaming client for the chat service.
//!
//! The service speaks a run-log protocol: the turn is POSTed once and the
//! response body is a server-sent-event stream where every `data` event
//! carries a batch of patch operations against the run document and an
//! `end` event closes the run. Which transport delivers the events is not
//! part of the assembly contract; this client is one vehicle for it.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::chat::message::ChatTurn;
use crate::chat::patch::PatchOp;

use super::error::TransportError;

/// One turn request: the question, the replayed history, and side-band
/// configuration used for tagging and telemetry only.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub question: String,
    pub chat_history: Vec<ChatTurn>,
    /// Model variant the service should route to.
    pub model: String,
    /// Correlation id for the whole conversation.
    pub conversation_id: String,
    /// Run-log steps the stream should include beyond the top-level run.
    pub include_names: Vec<String>,
}

/// Patch batches from one open stream, in arrival order.
pub type PatchStream = BoxStream<'static, Result<Vec<PatchOp>, TransportError>>;

/// Transport seam between the session controller and the wire. Tests drive
/// the controller with scripted streams through this trait.
#[async_trait]
pub trait TurnTransport {
    async fn open_stream(&self, request: TurnRequest) -> Result<PatchStream, TransportError>;
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Serialize)]
struct StreamLogBody<'a> {
    input: TurnInput<'a>,
    config: TurnConfig<'a>,
    include_names: &'a [String],
}

#[derive(Serialize)]
struct TurnInput<'a> {
    question: &'a str,
    chat_history: &'a [ChatTurn],
}

#[derive(Serialize)]
struct TurnConfig<'a> {
    configurable: Configurable<'a>,
    tags: Vec<String>,
    metadata: RequestMetadata<'a>,
}

#[derive(Serialize)]
struct Configurable<'a> {
    llm: &'a str,
}

#[derive(Serialize)]
struct RequestMetadata<'a> {
    conversation_id: &'a str,
    llm: &'a str,
}

/// One `data` event: a batch of patch operations.
#[derive(Deserialize)]
struct RunLogEvent {
    ops: Vec<PatchOp>,
}

// ============================================================================
// CLIENT
// ============================================================================

/// HTTP client for the chat service and its side channels.
#[derive(Debug, Clone)]
pub struct ChatServiceClient {
    pub(super) http: reqwest::Client,
    pub(super) base_url: String,
}

impl ChatServiceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("docpilot/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TurnTransport for ChatServiceClient {
    async fn open_stream(&self, request: TurnRequest) -> Result<PatchStream, TransportError> {
        let url = format!("{}/chat/stream_log", self.base_url);
        let body = StreamLogBody {
            input: TurnInput {
                question: &request.question,
                chat_history: &request.chat_history,
            },
            config: TurnConfig {
                configurable: Configurable {
                    llm: &request.model,
                },
                tags: vec![format!("model:{}", request.model)],
                metadata: RequestMetadata {
                    conversation_id: &request.conversation_id,
                    llm: &request.model,
                },
            },
            include_names: &request.include_names,
        };

        tracing::debug!(url = %url, model = %request.model, "Opening turn stream");
        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut buffer = String::new();
            let mut event_name = String::new();
            let mut data_lines: Vec<String> = Vec::new();

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);

                    if let Some(rest) = line.strip_prefix("event:") {
                        event_name = rest.trim().to_string();
                        continue;
                    }
                    if let Some(rest) = line.strip_prefix("data:") {
                        data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
                        continue;
                    }
                    if !line.is_empty() {
                        continue;
                    }

                    // Blank line: dispatch the accumulated event.
                    let data = data_lines.join("\n");
                    data_lines.clear();
                    let name = std::mem::take(&mut event_name);
                    match name.as_str() {
                        "" | "data" => {
                            if !data.is_empty() {
                                let event: RunLogEvent = serde_json::from_str(&data)?;
                                yield event.ops;
                            }
                        }
                        "end" => break 'read,
                        "error" => Err(TransportError::Stream(data))?,
                        other => {
                            tracing::trace!(event = %other, "Ignoring stream event");
                        }
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}
