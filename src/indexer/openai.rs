/// OpenAI-compatible chat summarizer.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::summaries::{LlmError, Summarizer};

const SYSTEM_PROMPT: &str = "You summarize source code for a code search index. \
Reply with two or three plain sentences describing what the symbol does and how it is used. \
Do not repeat the code.";

/// Connection settings for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    /// Symbol text beyond this many characters is cut before sending.
    pub max_input_chars: usize,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("max_input_chars", &self.max_input_chars)
            .finish()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ApiMessage<'a>; 2],
    max_tokens: u32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Summarizes symbols with one chat completion per symbol.
#[derive(Debug, Clone)]
pub struct OpenAiSummarizer {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiSummarizer {
    #[must_use]
    pub fn new(mut config: OpenAiConfig) -> Self {
        while config.base_url.ends_with('/') {
            config.base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn user_prompt(&self, symbol_text: &str, context: &str) -> String {
        let code: String = symbol_text.chars().take(self.config.max_input_chars).collect();
        format!("{context}\n\n```\n{code}\n```")
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, symbol_text: &str, context: &str) -> Result<String, LlmError> {
        let prompt = self.user_prompt(symbol_text, context);
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ApiMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ApiMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if status.is_server_error() {
            return Err(LlmError::Unavailable(format!("status {status}: {text}")));
        }
        if !status.is_success() {
            return Err(LlmError::Other(format!("request failed (status {status}): {text}")));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::Other(format!("invalid response: {e}")))?;
        let summary = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyResponse)?;
        debug!(context, chars = summary.len(), "summarized symbol");
        Ok(summary)
    }
}
