// Ollama API client

mod error;
mod ndjson;

pub use error::{ApiError, FailureKind};

use anyhow::{Context, Result};
use futures::stream::{Stream, StreamExt, TryStreamExt};
use futures::TryFutureExt;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

use crate::models::Message;
use crate::relay::{ChatBackend, ChatChunk, ChunkStream};
use ndjson::LineDecoder;

pub type ChatResponseStream = Pin<Box<dyn Stream<Item = Result<ChatResponse, ApiError>> + Send>>;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    client: Client,
    check_timeout: Duration,
}

/// Bound for the startup checks, far below the chat request timeout.
const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
}

impl ChatRequest {
    /// A single-turn streaming request: one user message, nothing else.
    pub fn user_prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::user(prompt)],
            stream: true,
        }
    }
}

/// One line of the `/api/chat` NDJSON body.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn content(&self) -> &str {
        self.message.as_ref().map_or("", |m| m.content.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TagsResponse {
    pub models: Vec<ModelInfo>,
}

impl OllamaClient {
    pub fn new(base_url: String, request_timeout: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(request_timeout))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            base_url,
            client,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
        })
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_check_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Open a streaming chat and decode the body line by line.
    ///
    /// The stream ends after the `done: true` line or after the first error.
    pub async fn chat_stream(&self, request: ChatRequest) -> Result<ChatResponseStream, ApiError> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|source| ApiError::Connect {
                url: self.base_url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }

        let stream = futures::stream::unfold(
            (response.bytes_stream(), LineDecoder::default(), false),
            |(mut byte_stream, mut decoder, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    if let Some(line) = decoder.next_line() {
                        let item = decode_line(&line);
                        let finished = item.as_ref().map_or(true, |r| r.done);
                        return Some((item, (byte_stream, decoder, finished)));
                    }

                    match byte_stream.next().await {
                        Some(Ok(bytes)) => decoder.push(&bytes),
                        Some(Err(e)) => {
                            return Some((Err(ApiError::Stream(e)), (byte_stream, decoder, true)));
                        }
                        None => {
                            // Last object may arrive without a trailing newline
                            let line = decoder.finish()?;
                            return Some((decode_line(&line), (byte_stream, decoder, true)));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(self.check_timeout)
            .send()
            .await
            .context("Failed to send tags request")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Failed to list models: {status}");
        }

        let result = response
            .json::<TagsResponse>()
            .await
            .context("Failed to parse tags response")?;

        Ok(result.models)
    }

    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(self.check_timeout)
            .send()
            .await
            .is_ok_and(|response| response.status().is_success())
    }
}

/// Ollama names untagged models `<name>:latest`.
pub fn has_model(models: &[ModelInfo], name: &str) -> bool {
    models.iter().any(|m| {
        m.name == name || (!name.contains(':') && m.name.strip_suffix(":latest") == Some(name))
    })
}

/// `from_slice` rejects invalid UTF-8 as a decode error instead of patching it.
fn decode_line(line: &[u8]) -> Result<ChatResponse, ApiError> {
    let response: ChatResponse =
        serde_json::from_slice(line).map_err(|source| ApiError::Decode {
            line: String::from_utf8_lossy(line).into_owned(),
            source,
        })?;
    match response.error {
        Some(message) => Err(ApiError::Server(message)),
        None => Ok(response),
    }
}

async fn error_for_status(response: Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.trim().is_empty() => status.canonical_reason().unwrap_or("").to_string(),
        Err(_) => body.trim().to_string(),
    };

    if status == StatusCode::NOT_FOUND {
        ApiError::ModelNotFound(message)
    } else {
        ApiError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

/// [`ChatBackend`] over a running Ollama server with a fixed model.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: OllamaClient,
    model: String,
}

impl OllamaBackend {
    pub const fn new(client: OllamaClient, model: String) -> Self {
        Self { client, model }
    }
}

impl ChatBackend for OllamaBackend {
    fn stream_chat(&self, prompt: &str) -> ChunkStream {
        let client = self.client.clone();
        let request = ChatRequest::user_prompt(self.model.clone(), prompt);

        async move { client.chat_stream(request).await }
            .try_flatten_stream()
            .try_filter_map(|response| async move {
                if response.done {
                    tracing::debug!(
                        model = %response.model,
                        reason = response.done_reason.as_deref().unwrap_or("unknown"),
                        "chat stream done"
                    );
                    // The closing line usually carries only statistics
                    if response.content().is_empty() {
                        return Ok(None);
                    }
                }
                Ok::<_, ApiError>(Some(ChatChunk::new(response.content())))
            })
            .boxed()
    }
}
