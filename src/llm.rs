use crate::error::{Error, Result};
use crate::http::HttpClient;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{debug, warn};

/// LLM provider — determines API format and endpoint.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    #[default]
    OpenRouter,
    /// Any OpenAI-compatible API (together.ai, local ollama, etc.)
    #[serde(rename = "openai")]
    OpenAi,
}

impl Provider {
    fn default_base_url(&self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::OpenAi => "http://localhost:11434/v1",
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

/// Capability seam for text generation: one prompt in, full response text out.
///
/// The endpoint resolver and answer formatter only see this trait, so the
/// plain and streaming clients are interchangeable.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
    fn model(&self) -> &str;
}

// -- Anthropic format --

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Msg<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<AnthropicDelta>,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    text: Option<String>,
}

// -- OpenAI-compatible format --

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Msg<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

// -- Shared --

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

/// Shared request plumbing for both client flavors.
#[derive(Clone)]
struct LlmEndpoint {
    provider: Provider,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
    http: HttpClient,
}

impl LlmEndpoint {
    fn new(
        provider: Provider,
        api_key: String,
        model: String,
        max_tokens: u32,
        base_url: Option<String>,
    ) -> Result<Self> {
        let http = HttpClient::new("coinsage/0.1.0")?;
        let base_url = base_url.unwrap_or_else(|| provider.default_base_url().into());
        Ok(Self {
            provider,
            api_key,
            model,
            max_tokens,
            base_url,
            http,
        })
    }

    fn request_body(&self, prompt: &str, stream: bool) -> Result<String> {
        let body = match self.provider {
            Provider::Anthropic => serde_json::to_string(&AnthropicRequest {
                model: &self.model,
                max_tokens: self.max_tokens,
                messages: vec![Msg {
                    role: "user",
                    content: prompt,
                }],
                stream,
            }),
            Provider::OpenRouter | Provider::OpenAi => serde_json::to_string(&OpenAiRequest {
                model: &self.model,
                max_tokens: self.max_tokens,
                messages: vec![Msg {
                    role: "user",
                    content: prompt,
                }],
                stream,
            }),
        };
        body.map_err(|e| Error::parse(format!("serialize request: {e}")))
    }

    fn url(&self) -> String {
        match self.provider {
            Provider::Anthropic => format!("{}/messages", self.base_url),
            Provider::OpenRouter | Provider::OpenAi => {
                format!("{}/chat/completions", self.base_url)
            }
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        match self.provider {
            Provider::Anthropic => vec![
                ("x-api-key", self.api_key.clone()),
                ("anthropic-version", "2023-06-01".to_string()),
            ],
            Provider::OpenRouter | Provider::OpenAi => {
                vec![("Authorization", format!("Bearer {}", self.api_key))]
            }
        }
    }
}

/// One-shot completion client.
pub struct LlmClient {
    endpoint: LlmEndpoint,
}

impl LlmClient {
    pub fn new(
        provider: Provider,
        api_key: String,
        model: String,
        max_tokens: u32,
        base_url: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            endpoint: LlmEndpoint::new(provider, api_key, model, max_tokens, base_url)?,
        })
    }

    /// Build from config, reading the API key from the specified env var.
    pub fn from_config(
        provider: Provider,
        model: String,
        max_tokens: u32,
        api_key_env: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let env_var = api_key_env.unwrap_or_else(|| provider.default_api_key_env().into());
        let api_key = std::env::var(&env_var).unwrap_or_default();
        Self::new(provider, api_key, model, max_tokens, base_url)
    }
}

#[async_trait]
impl TextModel for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let ep = &self.endpoint;
        debug!(provider = ?ep.provider, model = %ep.model, "sending LLM request");

        let body = ep.request_body(prompt, false)?;
        let headers = ep.headers();
        let header_refs: Vec<(&str, &str)> =
            headers.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let response_text = ep
            .http
            .post_json_raw(&ep.url(), &body, &header_refs)
            .await
            .map_err(|e| {
                warn!("LLM API error: {e}");
                e
            })?;

        match ep.provider {
            Provider::Anthropic => parse_anthropic_text(&response_text),
            Provider::OpenRouter | Provider::OpenAi => parse_openai_text(&response_text),
        }
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }
}

/// Streaming completion client: consumes SSE chunks, optionally echoing each
/// delta to stdout, and returns the accumulated full text.
pub struct StreamingLlmClient {
    endpoint: LlmEndpoint,
    echo: bool,
}

impl StreamingLlmClient {
    pub fn new(
        provider: Provider,
        api_key: String,
        model: String,
        max_tokens: u32,
        base_url: Option<String>,
        echo: bool,
    ) -> Result<Self> {
        Ok(Self {
            endpoint: LlmEndpoint::new(provider, api_key, model, max_tokens, base_url)?,
            echo,
        })
    }

    pub fn from_config(
        provider: Provider,
        model: String,
        max_tokens: u32,
        api_key_env: Option<String>,
        base_url: Option<String>,
        echo: bool,
    ) -> Result<Self> {
        let env_var = api_key_env.unwrap_or_else(|| provider.default_api_key_env().into());
        let api_key = std::env::var(&env_var).unwrap_or_default();
        Self::new(provider, api_key, model, max_tokens, base_url, echo)
    }
}

#[async_trait]
impl TextModel for StreamingLlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let ep = &self.endpoint;
        debug!(provider = ?ep.provider, model = %ep.model, "sending streaming LLM request");

        let body = ep.request_body(prompt, true)?;
        let headers = ep.headers();
        let header_refs: Vec<(&str, &str)> =
            headers.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let resp = ep
            .http
            .post_json_streaming(&ep.url(), &body, &header_refs)
            .await
            .map_err(|e| {
                warn!("LLM API error: {e}");
                e
            })?;

        let mut byte_stream = resp.bytes_stream();
        let mut sse = SseDataBuffer::default();
        let mut accumulated = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| Error::http(e.to_string()))?;
            for payload in sse.push(&chunk) {
                if payload.trim() == "[DONE]" {
                    continue;
                }
                if let Some(delta) = extract_stream_delta(&ep.provider, &payload) {
                    if self.echo {
                        print!("{delta}");
                        let _ = std::io::stdout().flush();
                    }
                    accumulated.push_str(&delta);
                }
            }
        }
        if self.echo && !accumulated.is_empty() {
            println!();
        }

        Ok(accumulated)
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }
}

fn parse_anthropic_text(response_text: &str) -> Result<String> {
    let resp: AnthropicResponse = serde_json::from_str(response_text)
        .map_err(|e| Error::parse(format!("parse Anthropic response: {e}")))?;
    Ok(resp
        .content
        .into_iter()
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("\n"))
}

fn parse_openai_text(response_text: &str) -> Result<String> {
    let resp: OpenAiResponse = serde_json::from_str(response_text)
        .map_err(|e| Error::parse(format!("parse LLM response: {e}")))?;
    resp.choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| Error::parse("empty response from LLM"))
}

/// Pull the text delta out of one SSE `data:` payload, if it carries any.
fn extract_stream_delta(provider: &Provider, payload: &str) -> Option<String> {
    match provider {
        Provider::Anthropic => {
            let event: AnthropicStreamEvent = serde_json::from_str(payload).ok()?;
            if event.kind != "content_block_delta" {
                return None;
            }
            event.delta.and_then(|d| d.text)
        }
        Provider::OpenRouter | Provider::OpenAi => {
            let chunk: OpenAiStreamChunk = serde_json::from_str(payload).ok()?;
            chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
        }
    }
}

/// Reassembles SSE `data:` payloads from arbitrarily split byte chunks.
#[derive(Default)]
struct SseDataBuffer {
    buf: String,
}

impl SseDataBuffer {
    /// Feed one network chunk; returns the `data:` payloads of every line
    /// completed by it. Partial trailing lines stay buffered.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.strip_prefix(' ').unwrap_or(data);
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}
