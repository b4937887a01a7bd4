//! Language-model provider layer
//!
//! The [`ModelClient`] contract consumed by the agent, the retrying
//! [`Backoff`] executor and the validating [`Gateway`] that combines them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod backoff;
pub mod gateway;
pub mod openai;

pub use backoff::{
    classify_message, classify_status, Backoff, Classify, ErrorClass, RetryError, RetryPolicy,
};
pub use gateway::{Gateway, GatewayError};
pub use openai::OpenAiCompatClient;

/// Model transport errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("REQUEST FAILED: {0}")]
    Request(#[from] reqwest::Error),

    #[error("MALFORMED JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API ERROR {status}: {message}")]
    Api { status: u16, message: String },

    #[error("UNAUTHORIZED: {0}")]
    Unauthorized(String),

    #[error("NO API KEY")]
    NoApiKey,

    #[error("INVALID RESPONSE")]
    InvalidResponse,

    #[error("RATE LIMITED")]
    RateLimited,

    #[error("NETWORK ERROR: {0}")]
    Network(String),

    #[error("TIMEOUT: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl Classify for ProviderError {
    fn classify(&self) -> ErrorClass {
        match self {
            Self::Api { status, .. } => classify_status(*status),
            Self::Unauthorized(_) | Self::NoApiKey => ErrorClass::Fatal,
            Self::RateLimited | Self::Network(_) | Self::Timeout(_) => ErrorClass::Retryable,
            Self::Request(e) => {
                if e.is_timeout() || e.is_connect() {
                    ErrorClass::Retryable
                } else if let Some(status) = e.status() {
                    classify_status(status.as_u16())
                } else {
                    classify_message(&e.to_string())
                }
            }
            Self::Json(_) | Self::InvalidResponse => ErrorClass::Retryable,
            Self::Other(message) => classify_message(message),
        }
    }
}

/// Token accounting reported by the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Chat request; unset fields fall back to the client's defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Model reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
            model: None,
        }
    }
}

/// Callback receiving streamed content deltas
pub type ChunkHandler<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Language-model client
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Streaming variant; the default delivers the whole reply as one chunk
    async fn stream_chat(
        &self,
        request: ChatRequest,
        on_chunk: ChunkHandler<'_>,
    ) -> Result<ChatResponse> {
        let response = self.chat(request).await?;
        on_chunk(&response.content);
        Ok(response)
    }

    fn default_model(&self) -> String;

    fn is_configured(&self) -> bool {
        true
    }
}
