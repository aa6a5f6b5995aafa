//! Upstream completion client.
//!
//! Wraps a single HTTP(S) connection per call to an OpenAI-compatible
//! chat-completions endpoint. Two call shapes:
//! 1. Buffered: the full model output is collected before returning
//! 2. Streaming: incremental chunks are forwarded through a channel as
//!    [`StreamEvent`]s, terminated by exactly one `Done` or `Error`

use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::UpstreamError;

/// Nucleus sampling threshold, fixed for every call.
pub const TOP_P: f64 = 0.9;

/// Default system prompt for buffered calls, which typically back
/// structured-extraction call sites.
pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are a professional knowledge extraction \
assistant. Follow the requested output format exactly and do not add any extra explanation \
or commentary.";

/// Default system prompt for streaming calls, which back interactive chat.
pub const EXPLAINER_SYSTEM_PROMPT: &str = "You are a knowledge expert who introduces \
concepts and ideas in clear, concise language.";

/// A single completion request.
///
/// `max_tokens = None` means "let the model decide length": the field is
/// omitted from the serialized payload entirely, never sent as null or zero.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// User message, already trimmed and non-empty.
    pub message: String,

    /// System prompt override. `None` selects the mode default.
    pub system_prompt: Option<String>,

    /// Output token cap, absent = unbounded.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: f64,

    /// Per-call timeout in seconds (applied on the buffered path).
    pub timeout_secs: u64,
}

impl CompletionRequest {
    /// Request shaped for the buffered path: low temperature for focused,
    /// format-compliant output, 60 second timeout, unbounded length.
    pub fn buffered(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            system_prompt: None,
            max_tokens: None,
            temperature: 0.3,
            timeout_secs: 60,
        }
    }

    /// Request shaped for the streaming path: moderate temperature for
    /// natural conversational output.
    pub fn streaming(message: impl Into<String>, system_prompt: Option<String>) -> Self {
        Self {
            message: message.into(),
            system_prompt,
            max_tokens: None,
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

/// Outcome of a buffered completion call (after retries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionResult {
    /// The model produced output.
    Success { text: String },
    /// All attempts failed; `message` is ready for the client.
    Failure { message: String },
}

/// One event in a streamed completion.
///
/// A stream is a finite sequence of `Content` events closed by exactly one
/// `Done` or `Error`; nothing follows the terminal event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental chunk of model output.
    Content { text: String },
    /// Graceful end of the upstream stream.
    Done,
    /// The stream failed mid-flight; no retry, partial output stands.
    Error { message: String },
}

// ─── Wire Types ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionPayload {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    top_p: f64,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

// ─── Client ────────────────────────────────────────────────────────────────

/// Client for the completion API. Cheap to clone; the inner reqwest client
/// is reference-counted.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl UpstreamClient {
    /// Build a client from configuration. Returns `None` when no API key is
    /// configured; the server still runs, chat endpoints report the gap.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        info!(
            model = config.model,
            base_url = config.base_url,
            "Upstream client initialized"
        );
        Some(Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn payload(&self, request: &CompletionRequest, stream: bool) -> ChatCompletionPayload {
        let default_prompt = if stream {
            EXPLAINER_SYSTEM_PROMPT
        } else {
            EXTRACTION_SYSTEM_PROMPT
        };
        let system_prompt = request
            .system_prompt
            .clone()
            .unwrap_or_else(|| default_prompt.to_string());

        ChatCompletionPayload {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.message.clone(),
                },
            ],
            temperature: request.temperature,
            top_p: TOP_P,
            stream,
            max_tokens: request.max_tokens,
        }
    }

    /// Run a buffered completion: one upstream connection, full output
    /// collected before returning. Failures propagate with the original
    /// error text; retry policy lives in [`super::retry`].
    pub async fn complete_buffered(
        &self,
        request: &CompletionRequest,
    ) -> Result<String, UpstreamError> {
        let payload = self.payload(request, false);

        debug!(
            message_chars = request.message.len(),
            max_tokens = ?request.max_tokens,
            "Sending buffered completion request"
        );

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(request.timeout_secs))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout(request.timeout_secs)
                } else {
                    UpstreamError::Transport(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| UpstreamError::Malformed("response contained no choices".to_string()))?;

        info!(response_chars = text.len(), "Buffered completion succeeded");
        Ok(text)
    }

    /// Run a streaming completion, forwarding chunks to the returned
    /// receiver as they arrive.
    ///
    /// The producer task opens one upstream connection and maps the SSE body
    /// one-to-one: each non-empty content delta becomes `Content`, graceful
    /// exhaustion becomes `Done`, any mid-stream failure becomes `Error` and
    /// ends the sequence. If the receiver is dropped (client disconnected)
    /// the task stops and the upstream connection is released.
    pub fn complete_streaming(&self, request: CompletionRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(32);

        let payload = self.payload(&request, true);
        let http = self.http.clone();
        let url = self.endpoint();
        let api_key = self.api_key.clone();

        tokio::spawn(async move {
            info!(
                message_chars = request.message.len(),
                "Starting streaming completion"
            );

            let response = match http
                .post(url)
                .bearer_auth(api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("Streaming request failed to connect: {e}");
                    let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let err = UpstreamError::Status {
                    status: status.as_u16(),
                    body,
                };
                warn!("Streaming request rejected: {err}");
                let _ = tx
                    .send(StreamEvent::Error {
                        message: err.to_string(),
                    })
                    .await;
                return;
            }

            let mut events = response.bytes_stream().eventsource();
            let mut chunks = 0usize;

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Streaming read failed after {chunks} chunks: {e}");
                        let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                        return;
                    }
                };

                if event.data.trim() == "[DONE]" {
                    break;
                }

                let chunk: ChatCompletionChunk = match serde_json::from_str(&event.data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("Malformed streaming chunk: {e}");
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: format!("malformed upstream chunk: {e}"),
                            })
                            .await;
                        return;
                    }
                };

                let Some(text) = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .filter(|t| !t.is_empty())
                else {
                    continue;
                };

                chunks += 1;
                if tx.send(StreamEvent::Content { text }).await.is_err() {
                    // Receiver dropped, stop streaming.
                    debug!("Stream receiver dropped after {chunks} chunks");
                    return;
                }
            }

            info!(chunks, "Streaming completion finished");
            let _ = tx.send(StreamEvent::Done).await;
        });

        rx
    }
}
