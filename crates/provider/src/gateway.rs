//! Language-model gateway
//!
//! Validates requests, then dispatches them to a [`ModelClient`] under the
//! [`Backoff`] executor.

use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::backoff::{Backoff, RetryError, RetryPolicy};
use crate::{ChatRequest, ChatResponse, ChunkHandler, ModelClient, ProviderError};

/// Gateway failures
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("INVALID MODEL REQUEST: {0}")]
    InvalidRequest(String),

    #[error("MODEL CALL FAILED AFTER {attempts} ATTEMPT(S): {source}")]
    Exhausted {
        attempts: u32,
        source: ProviderError,
    },

    #[error("MODEL CALL REJECTED: {source}")]
    Fatal {
        attempts: u32,
        source: ProviderError,
    },

    #[error("MODEL CALL CANCELLED")]
    Cancelled,
}

impl GatewayError {
    /// Attempts made before giving up (0 for rejected requests)
    pub fn attempts(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) | Self::Cancelled => 0,
            Self::Exhausted { attempts, .. } | Self::Fatal { attempts, .. } => *attempts,
        }
    }
}

impl From<RetryError<ProviderError>> for GatewayError {
    fn from(err: RetryError<ProviderError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => Self::Exhausted {
                attempts,
                source: last,
            },
            RetryError::Fatal { attempts, last } => Self::Fatal {
                attempts,
                source: last,
            },
            RetryError::Cancelled { .. } => Self::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Retrying front door to a model client
#[derive(Clone)]
pub struct Gateway {
    client: Arc<dyn ModelClient>,
    backoff: Backoff,
}

impl Gateway {
    pub fn new(client: Arc<dyn ModelClient>, policy: RetryPolicy) -> Self {
        Self {
            client,
            backoff: Backoff::new(policy),
        }
    }

    pub fn client(&self) -> &Arc<dyn ModelClient> {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.backoff.policy()
    }

    /// Reject requests no transport could serve
    pub fn validate(request: &ChatRequest) -> Result<()> {
        if request.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "message list is empty".to_string(),
            ));
        }
        for (index, message) in request.messages.iter().enumerate() {
            if message.role.trim().is_empty() {
                return Err(GatewayError::InvalidRequest(format!(
                    "message {} has no role",
                    index
                )));
            }
            if message.content.is_empty() {
                return Err(GatewayError::InvalidRequest(format!(
                    "message {} ({}) has no content",
                    index, message.role
                )));
            }
        }
        Ok(())
    }

    pub async fn chat(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        Self::validate(&request)?;
        trace!("◆ MODEL CALL WITH {} MESSAGE(S)", request.messages.len());

        let response = self
            .backoff
            .run_cancellable(cancel, |attempt| {
                let client = Arc::clone(&self.client);
                let request = request.clone();
                async move {
                    debug!("◆ MODEL ATTEMPT {}", attempt + 1);
                    client.chat(request).await
                }
            })
            .await?;

        Ok(response)
    }

    /// Streaming call; a retried attempt replays its chunks from the start
    pub async fn stream_chat(
        &self,
        request: ChatRequest,
        on_chunk: ChunkHandler<'_>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        Self::validate(&request)?;
        trace!(
            "◆ STREAMING MODEL CALL WITH {} MESSAGE(S)",
            request.messages.len()
        );

        let response = self
            .backoff
            .run_cancellable(cancel, |attempt| {
                let client = Arc::clone(&self.client);
                let request = request.clone();
                async move {
                    debug!("◆ STREAMING ATTEMPT {}", attempt + 1);
                    client.stream_chat(request, on_chunk).await
                }
            })
            .await?;

        Ok(response)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("model", &self.client.default_model())
            .field("policy", self.backoff.policy())
            .finish()
    }
}
