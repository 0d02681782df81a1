//! HTTP client for an application-completion API that streams answers as
//! Server-Sent Events.
//!
//! Each SSE `data:` payload is a JSON object:
//!
//! ```text
//! {"code": "", "message": "", "output": {"text": "He", "finish_reason": "null"}}
//! ```
//!
//! A non-empty `code` other than `Success` is an API error. `finish_reason`
//! values other than empty or `"null"` end the answer.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use chime_core::{GenerateRequest, GenerationChunk, GenerationError, GenerationStream, Generator};

use crate::sse::parse_sse_lines;

/// Longest error body echoed into a [`GenerationError::Api`] message.
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for [`CompletionClient`].
#[derive(Clone, Debug)]
pub struct CompletionConfig {
    /// Application id, substituted for `{app_id}` in `api_url`.
    pub app_id: String,
    /// Bearer token.
    pub api_key: String,
    /// Endpoint template.
    pub api_url: String,
    /// Whole-request timeout, including the streamed body.
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    session_id: &'a str,
    user_id: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionEvent {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    output: CompletionOutput,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionOutput {
    #[serde(default)]
    text: String,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl CompletionOutput {
    fn is_finished(&self) -> bool {
        self.finish_reason
            .as_deref()
            .is_some_and(|r| !r.is_empty() && r != "null")
    }
}

/// Streaming [`Generator`] over HTTP.
pub struct CompletionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl CompletionClient {
    /// Build a client; fails only if the HTTP client cannot be constructed.
    pub fn new(config: CompletionConfig) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.api_url.replace("{app_id}", &config.app_id),
            api_key: config.api_key,
        })
    }

    /// Resolved endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Generator for CompletionClient {
    #[instrument(skip_all, fields(conversation_id = %request.conversation_id))]
    async fn stream_generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerationStream, GenerationError> {
        let body = CompletionBody {
            session_id: request.conversation_id.as_str(),
            user_id: &request.actor_id,
            prompt: &request.prompt,
            stream: true,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "completion request rejected");
            return Err(GenerationError::Api {
                code: status.as_u16().to_string(),
                message: truncate(&text, MAX_ERROR_BODY),
            });
        }

        let mut lines = Box::pin(parse_sse_lines(response.bytes_stream()));
        let stream = async_stream::stream! {
            while let Some(line) = lines.next().await {
                let data = match line {
                    Ok(data) => data,
                    Err(e) => {
                        yield Err(GenerationError::Transport(e.to_string()));
                        return;
                    }
                };
                let event: CompletionEvent = match serde_json::from_str(&data) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "skipping unparseable completion event");
                        continue;
                    }
                };
                if !event.code.is_empty() && event.code != "Success" {
                    yield Err(GenerationError::Api {
                        code: event.code,
                        message: event.message,
                    });
                    return;
                }
                let finished = event.output.is_finished();
                if !event.output.text.is_empty() {
                    yield Ok(GenerationChunk::Delta(event.output.text));
                }
                if finished {
                    debug!("completion finished");
                    break;
                }
            }
            yield Ok(GenerationChunk::Done);
        };

        Ok(Box::pin(stream))
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
