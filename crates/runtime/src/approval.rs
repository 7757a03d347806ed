//! Human-in-the-loop approval for destructive actions.
//!
//! The gate is an explicit request/response boundary: the loop hands over the
//! pending action and suspends until a decision arrives. No UI lives here;
//! [`ChannelGate`] forwards requests to whatever layer owns the operator,
//! and [`PolicyGate`] is the non-interactive stand-in.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A pending action presented to the operator.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub tool_name: String,
    /// Resolved arguments, shown so the operator sees exactly what will run.
    pub arguments: Value,
    /// Why the action was escalated (the permission engine's reason).
    pub reason: String,
}

/// Decides whether an escalated action may proceed.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Present the pending action and wait for a decision. `false` means the
    /// action is refused; the run itself continues either way.
    async fn review(&self, request: ApprovalRequest) -> bool;
}

/// An approval request in flight, as seen by the operator-facing layer.
pub struct PendingApproval {
    pub request: ApprovalRequest,
    /// Send the decision here. Dropping the sender counts as refusal.
    pub respond: oneshot::Sender<bool>,
}

/// Forwards approval requests over a channel and suspends on the reply.
///
/// The receiving side is owned by the embedding application (a TUI, a web
/// handler, a test). The gate never polls: it awaits the oneshot reply.
pub struct ChannelGate {
    tx: mpsc::Sender<PendingApproval>,
}

impl ChannelGate {
    /// Create the gate plus the receiver the operator-facing layer drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PendingApproval>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ApprovalGate for ChannelGate {
    async fn review(&self, request: ApprovalRequest) -> bool {
        let (respond, decision) = oneshot::channel();
        let tool = request.tool_name.clone();
        if self
            .tx
            .send(PendingApproval { request, respond })
            .await
            .is_err()
        {
            warn!(tool = %tool, "approval channel closed; refusing");
            return false;
        }
        match decision.await {
            Ok(approved) => {
                debug!(tool = %tool, approved, "approval decision received");
                approved
            }
            Err(_) => {
                warn!(tool = %tool, "approval responder dropped; refusing");
                false
            }
        }
    }
}

/// Non-interactive gate: approves everything not on a hard-deny list.
pub struct PolicyGate {
    hard_deny: HashSet<String>,
}

impl PolicyGate {
    pub fn new(hard_deny: impl IntoIterator<Item = String>) -> Self {
        Self {
            hard_deny: hard_deny.into_iter().collect(),
        }
    }

    /// Approve everything.
    pub fn allow_all() -> Self {
        Self::new(std::iter::empty())
    }
}

#[async_trait]
impl ApprovalGate for PolicyGate {
    async fn review(&self, request: ApprovalRequest) -> bool {
        let approved = !self.hard_deny.contains(&request.tool_name);
        debug!(tool = %request.tool_name, approved, "policy gate decision");
        approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tool: &str) -> ApprovalRequest {
        ApprovalRequest {
            tool_name: tool.to_string(),
            arguments: serde_json::json!({}),
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_channel_gate_approves() {
        let (gate, mut rx) = ChannelGate::new(4);

        let handle = tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            assert_eq!(pending.request.tool_name, "shell_execute");
            pending.respond.send(true).unwrap();
        });

        assert!(gate.review(request("shell_execute")).await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_gate_refuses() {
        let (gate, mut rx) = ChannelGate::new(4);

        let handle = tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            pending.respond.send(false).unwrap();
        });

        assert!(!gate.review(request("shell_execute")).await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_responder_counts_as_refusal() {
        let (gate, mut rx) = ChannelGate::new(4);

        let handle = tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            drop(pending.respond);
        });

        assert!(!gate.review(request("file_write")).await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_channel_counts_as_refusal() {
        let (gate, rx) = ChannelGate::new(4);
        drop(rx);
        assert!(!gate.review(request("file_write")).await);
    }

    #[tokio::test]
    async fn test_policy_gate() {
        let gate = PolicyGate::new(["shell_execute".to_string()]);
        assert!(!gate.review(request("shell_execute")).await);
        assert!(gate.review(request("file_write")).await);

        let open = PolicyGate::allow_all();
        assert!(open.review(request("shell_execute")).await);
    }
}
