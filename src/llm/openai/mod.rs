
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{LanguageModel, TokenStream};
use crate::config::LlmConfig;
use crate::{ChatError, Result};

const DONE_MARKER: &str = "[DONE]";
const CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Client for OpenAI-compatible `/chat/completions` endpoints
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl OpenAiChatClient {
    /// Build a client for `model` using the endpoint settings in `config`
    #[inline]
    pub fn new(config: &LlmConfig, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;

        let api_key = config.api_key();
        if api_key.is_none() {
            warn!(
                "Environment variable {} is not set, requests will be sent without a key",
                config.api_key_env
            );
        }

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            temperature: config.temperature,
            timeout: config.timeout(),
        })
    }

    #[inline]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            stream,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if !stream {
            builder = builder.timeout(self.timeout);
        }

        debug!(
            "Sending {} request to {} with model {}",
            if stream { "streaming" } else { "completion" },
            self.endpoint,
            self.model
        );

        let response = builder
            .send()
            .await
            .map_err(|e| ChatError::Network(format!("request to {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        Err(ChatError::Llm(format!("API returned {status}: {message}")))
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self.send(prompt, false).await?;
        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Llm(format!("failed to parse completion: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatError::Llm("completion contained no choices".to_string()))
    }

    async fn stream(&self, prompt: &str) -> Result<TokenStream> {
        let response = self.send(prompt, true).await?;

        let tokens = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                let done = matches!(event, Ok(event) if event.data.trim() == DONE_MARKER);
                futures::future::ready(!done)
            })
            .filter_map(|event| async move {
                match event {
                    Ok(event) => parse_stream_chunk(&event.data),
                    Err(e) => Some(Err(ChatError::Network(format!("SSE stream error: {e}")))),
                }
            });

        Ok(Box::pin(tokens))
    }
}

fn parse_stream_chunk(data: &str) -> Option<Result<String>> {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(StreamChunk {
            error: Some(error), ..
        }) => Some(Err(ChatError::Llm(error.message))),
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(Ok),
        Err(e) => Some(Err(ChatError::Llm(format!(
            "failed to parse stream chunk: {e}"
        )))),
    }
}
