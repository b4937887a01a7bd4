//! Operator confirmation before a tool runs
//!
//! Anything other than an explicit approval counts as a denial: a closed
//! channel, a dropped responder and an expired timeout all deny.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationRequest {
    pub execution_id: String,
    pub tool: String,
    pub params: Value,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve)
    }
}

#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> Decision;
}

/// Approves everything
pub struct AutoApprove;

#[async_trait]
impl ConfirmationHandler for AutoApprove {
    async fn confirm(&self, _request: &ConfirmationRequest) -> Decision {
        Decision::Approve
    }
}

/// Denies everything
pub struct AutoDeny;

#[async_trait]
impl ConfirmationHandler for AutoDeny {
    async fn confirm(&self, _request: &ConfirmationRequest) -> Decision {
        Decision::Deny
    }
}

/// A request waiting for an operator's answer
#[derive(Debug)]
pub struct PendingConfirmation {
    pub request: ConfirmationRequest,
    responder: oneshot::Sender<Decision>,
}

impl PendingConfirmation {
    pub fn respond(self, decision: Decision) {
        // the waiting side may already have timed out
        let _ = self.responder.send(decision);
    }

    pub fn approve(self) {
        self.respond(Decision::Approve);
    }

    pub fn deny(self) {
        self.respond(Decision::Deny);
    }
}

/// Hands requests to another task and waits for its answer
pub struct ChannelConfirmation {
    sender: mpsc::Sender<PendingConfirmation>,
    timeout: Duration,
}

impl ChannelConfirmation {
    pub fn new(timeout: Duration) -> (Self, mpsc::Receiver<PendingConfirmation>) {
        let (sender, receiver) = mpsc::channel(16);
        (Self { sender, timeout }, receiver)
    }
}

#[async_trait]
impl ConfirmationHandler for ChannelConfirmation {
    async fn confirm(&self, request: &ConfirmationRequest) -> Decision {
        let (responder, answer) = oneshot::channel();
        let pending = PendingConfirmation {
            request: request.clone(),
            responder,
        };

        let exchange = async {
            if self.sender.send(pending).await.is_err() {
                warn!("◆ NO CONFIRMATION RECEIVER, DENYING {}", request.tool);
                return Decision::Deny;
            }
            match answer.await {
                Ok(decision) => {
                    debug!("◆ OPERATOR DECISION FOR {}: {:?}", request.tool, decision);
                    decision
                }
                Err(_) => {
                    warn!("◆ CONFIRMATION DROPPED, DENYING {}", request.tool);
                    Decision::Deny
                }
            }
        };

        // the timeout covers a full queue as well as a silent operator
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(decision) => decision,
            Err(_) => {
                warn!(
                    "◆ CONFIRMATION TIMED OUT AFTER {} MS, DENYING {}",
                    self.timeout.as_millis(),
                    request.tool
                );
                Decision::Deny
            }
        }
    }
}
