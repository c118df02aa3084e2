use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LlmSettings;

/// Errors raised while talking to an OpenAI-compatible chat-completions endpoint
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM servers are currently busy. Please try again in a few moments.")]
    ServerBusy,

    #[error("Network connection failed: {message}")]
    NetworkError { message: String },

    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse response: {message}")]
    ParseError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl LlmError {
    pub fn is_server_busy(&self) -> bool {
        matches!(self, LlmError::ServerBusy)
    }

    pub fn is_network_error(&self) -> bool {
        matches!(self, LlmError::NetworkError { .. })
    }

    /// Worth another try with back-off
    pub fn is_retryable(&self) -> bool {
        self.is_server_busy() || self.is_network_error()
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            LlmError::ServerBusy => {
                "🚫 LLM servers are currently busy. Please try again in a few moments.".to_string()
            }
            LlmError::NetworkError { .. } => {
                "🌐 Network connection failed. Please check your internet connection and try again."
                    .to_string()
            }
            LlmError::Timeout { seconds } => {
                format!(
                    "⏰ Request timed out after {} seconds. The server might be overloaded.",
                    seconds
                )
            }
            LlmError::ApiError { status, .. } => match *status {
                429 => {
                    "🚫 Rate limit exceeded. Please wait a moment before trying again.".to_string()
                }
                503 => "🚫 Service temporarily unavailable. Please try again later.".to_string(),
                502 | 504 => {
                    "🚫 Server gateway error. Please try again in a few moments.".to_string()
                }
                _ => format!("❌ API error ({}). Please try again later.", status),
            },
            LlmError::ParseError { .. } => {
                "⚠️ Failed to parse server response. Please try again.".to_string()
            }
            LlmError::ConfigError { message } => {
                format!("⚙️ Configuration error: {}", message)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Chat-completions client bound to one model and temperature
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    settings: LlmSettings,
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.settings.model)
            .finish()
    }
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        settings.validate().map_err(|e| LlmError::ConfigError {
            message: e.to_string(),
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout))
            .user_agent(concat!("customs_agents/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LlmError::ConfigError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, settings })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Send messages, retrying busy/network failures with exponential back-off
    pub async fn send_messages(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let mut attempts = 0;
        let max_attempts = 3;
        let mut backoff = Duration::from_millis(500);

        loop {
            match self.send_messages_raw(messages.clone()).await {
                Ok(content) => return Ok(content),
                Err(e) if e.is_retryable() && attempts < max_attempts - 1 => {
                    attempts += 1;
                    tracing::warn!(
                        "LLM request attempt {} failed: {}, retrying in {:?}",
                        attempts,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send chat messages once and return the raw assistant content string.
    /// The response is requested as a JSON object to encourage strict JSON outputs.
    pub async fn send_messages_raw(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages,
            response_format: ResponseFormat { format_type: "json_object".to_string() },
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.settings.base_url))
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::handle_error_response(status, response).await);
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| LlmError::ParseError {
            message: format!("Failed to parse API response: {}", e),
        })?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::ParseError {
                message: "No choices in API response".to_string(),
            })
    }

    fn map_reqwest_error(&self, error: reqwest::Error) -> LlmError {
        if error.is_timeout() {
            return LlmError::Timeout {
                seconds: self.settings.timeout,
            };
        }

        if error.is_connect() {
            return LlmError::NetworkError {
                message: "Failed to connect to server".to_string(),
            };
        }

        if error.is_request() {
            return LlmError::NetworkError {
                message: "Request failed".to_string(),
            };
        }

        let error_msg = error.to_string().to_lowercase();
        if error_msg.contains("dns") {
            return LlmError::NetworkError {
                message: "DNS resolution failed".to_string(),
            };
        }

        LlmError::NetworkError {
            message: format!("Request error: {}", error),
        }
    }

    async fn handle_error_response(status: StatusCode, response: reqwest::Response) -> LlmError {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        match status {
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::BAD_GATEWAY
            | StatusCode::GATEWAY_TIMEOUT => LlmError::ServerBusy,
            _ => LlmError::ApiError {
                status: status.as_u16(),
                message: error_text,
            },
        }
    }
}

#[cfg(test)]
pub(crate) fn completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": content } }
        ]
    })
}
