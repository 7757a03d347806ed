//! The agent loop: one user request driven to completion through bounded
//! provider turns and permission-checked tool execution.
//!
//! Flow: Init → Turn → Dispatch → [Execute | AwaitApproval] → Turn → … →
//! Done | Aborted. Failures that originate from a single tool call are
//! absorbed into that call's outcome so the model can adapt; only failures
//! that make the loop itself unable to proceed end the run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::approval::{ApprovalGate, ApprovalRequest};
use crate::catalog::ToolCatalog;
use crate::config::{ExecutionMode, RunConfig};
use crate::message::Transcript;
use crate::permission::PermissionEngine;
use crate::prompt::build_system_prompt;
use crate::provider::{Provider, ProviderError, TokenUsage};
use crate::session::{RunHeader, RunSummary, SessionSink, SinkError};
use crate::tool::{ToolCall, ToolContext, ToolDescriptor, ToolOutcome};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The model finished with a text-only turn.
    Completed,
    /// The run ended early; partial completion, reported distinctly.
    Aborted(AbortReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    TurnBudgetExhausted,
    Cancelled,
    ProviderFailure,
}

/// Everything a finished run hands back. The transcript and any side effects
/// already applied are retained even on abort.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub transcript: Transcript,
    pub turns_used: usize,
    pub usage: TokenUsage,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("remote-augmented mode requires at least one remote tool")]
    NoRemoteTools,
}

enum TurnCall {
    Turn(crate::provider::ProviderTurn),
    Cancelled,
    Failed(ProviderError),
}

enum Dispatch {
    Outcome(ToolOutcome),
    Cancelled,
}

/// Drives one run at a time. Multiple runners may share the catalog,
/// permission engine, gate, and sink; transcripts are never shared.
pub struct AgentRunner {
    provider: Arc<dyn Provider>,
    catalog: Arc<ToolCatalog>,
    permissions: Arc<PermissionEngine>,
    gate: Arc<dyn ApprovalGate>,
    sink: Arc<dyn SessionSink>,
    config: RunConfig,
    cancel: CancellationToken,
    provider_timeout: Duration,
    tool_timeout: Duration,
    retry_backoff: Duration,
}

impl AgentRunner {
    pub fn new(
        provider: Arc<dyn Provider>,
        catalog: Arc<ToolCatalog>,
        permissions: Arc<PermissionEngine>,
        gate: Arc<dyn ApprovalGate>,
        sink: Arc<dyn SessionSink>,
        config: RunConfig,
    ) -> Self {
        Self {
            provider,
            catalog,
            permissions,
            gate,
            sink,
            config,
            cancel: CancellationToken::new(),
            provider_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(300),
            retry_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Token that cancels this run at its next suspension point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one run for a single user request.
    pub async fn run(&self, prompt: impl Into<String>) -> Result<RunOutcome, RunError> {
        // Remote capability is a precondition of this mode, checked before
        // anything is recorded: the run never starts.
        if self.config.mode == ExecutionMode::RemoteAugmented && !self.catalog.has_remote() {
            return Err(RunError::NoRemoteTools);
        }

        let run_id = Uuid::new_v4();
        self.sink
            .record_start(&RunHeader {
                run_id,
                started_at: Utc::now(),
                provider: self.config.provider.clone(),
                model: self.config.model.clone(),
                mode: self.config.mode,
                max_turns: self.config.max_turns,
            })
            .await?;

        info!(%run_id, provider = self.provider.name(), model = %self.config.model, "run started");

        let mut transcript = Transcript::new();
        transcript.push_system(build_system_prompt(&self.config, self.permissions.root()));
        transcript.push_user(prompt);

        let tools = self.catalog.descriptors(self.config.mode);
        debug!(count = tools.len(), "tool descriptors selected");

        let mut turns_used = 0;
        let mut usage = TokenUsage::default();

        let (status, provider_failure) = loop {
            if turns_used == self.config.max_turns {
                warn!(%run_id, turns = turns_used, "turn budget exhausted");
                break (
                    RunStatus::Aborted(AbortReason::TurnBudgetExhausted),
                    None,
                );
            }
            turns_used += 1;

            let turn = match self.call_provider(&transcript, &tools).await {
                TurnCall::Turn(turn) => turn,
                TurnCall::Cancelled => {
                    break (RunStatus::Aborted(AbortReason::Cancelled), None)
                }
                TurnCall::Failed(error) => {
                    break (
                        RunStatus::Aborted(AbortReason::ProviderFailure),
                        Some(error),
                    )
                }
            };

            debug!(
                %run_id,
                turn = turns_used,
                tool_calls = turn.tool_calls.len(),
                stop_reason = ?turn.stop_reason,
                "provider turn received"
            );

            usage.add(turn.usage);
            let text = if turn.text.is_empty() {
                None
            } else {
                Some(turn.text)
            };
            transcript.push_assistant(text, turn.tool_calls.clone());

            // Zero tool calls is the sole success-terminal condition.
            if turn.tool_calls.is_empty() {
                info!(%run_id, turns = turns_used, "run complete");
                break (RunStatus::Completed, None);
            }

            // Sequential, in provider order: this turn's results are fully
            // assembled before the next turn is issued.
            let mut cancelled = false;
            for call in &turn.tool_calls {
                match self.dispatch(call).await {
                    Dispatch::Outcome(outcome) => transcript.push_tool(outcome),
                    Dispatch::Cancelled => {
                        cancelled = true;
                        break;
                    }
                }
            }
            if cancelled {
                break (RunStatus::Aborted(AbortReason::Cancelled), None);
            }
        };

        let summary = RunSummary {
            run_id,
            finished_at: Utc::now(),
            status: status.clone(),
            turns_used,
            message_count: transcript.len(),
        };
        if let Err(e) = self.sink.record_end(&summary).await {
            warn!(%run_id, error = %e, "failed to record run end");
        }

        if let Some(error) = provider_failure {
            return Err(RunError::Provider(error));
        }

        Ok(RunOutcome {
            status,
            transcript,
            turns_used,
            usage,
        })
    }

    /// One provider call with per-call timeout, cancellation, and a single
    /// retry after backoff for transient failures.
    async fn call_provider(&self, transcript: &Transcript, tools: &[ToolDescriptor]) -> TurnCall {
        let mut attempted_retry = false;
        loop {
            let call = self
                .provider
                .converse(transcript.messages(), tools, &self.config.sampling);
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return TurnCall::Cancelled,
                r = tokio::time::timeout(self.provider_timeout, call) => r,
            };

            let error = match result {
                Ok(Ok(turn)) => return TurnCall::Turn(turn),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Transport(format!(
                    "provider call timed out after {:?}",
                    self.provider_timeout
                )),
            };

            if !attempted_retry && error.is_transient() {
                attempted_retry = true;
                warn!(error = %error, backoff = ?self.retry_backoff, "transient provider failure; retrying once");
                tokio::select! {
                    _ = self.cancel.cancelled() => return TurnCall::Cancelled,
                    _ = tokio::time::sleep(self.retry_backoff) => {}
                }
                continue;
            }

            warn!(error = %error, "provider failure; aborting run");
            return TurnCall::Failed(error);
        }
    }

    /// Resolve, permission-check, approve, and execute one tool call.
    /// Everything short of cancellation collapses into a [`ToolOutcome`].
    async fn dispatch(&self, call: &ToolCall) -> Dispatch {
        let Some((tool, origin)) = self.catalog.resolve(&call.name) else {
            debug!(tool = %call.name, "unresolved tool name");
            return Dispatch::Outcome(ToolOutcome::error(
                call.id.clone(),
                format!("unknown tool: {}", call.name),
            ));
        };

        let context = ToolContext {
            root: self.permissions.root().to_path_buf(),
        };
        let access = tool.access(&call.arguments, &context);
        let verdict = self.permissions.evaluate(&access, &call.name);

        if !verdict.allowed {
            info!(tool = %call.name, reason = %verdict.reason, "permission denied");
            return Dispatch::Outcome(ToolOutcome::error(
                call.id.clone(),
                format!("permission denied: {}", verdict.reason),
            ));
        }

        if verdict.requires_approval && !self.config.auto_approve {
            info!(tool = %call.name, "awaiting operator approval");
            let request = ApprovalRequest {
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
                reason: verdict.reason.clone(),
            };
            let approved = tokio::select! {
                _ = self.cancel.cancelled() => return Dispatch::Cancelled,
                decision = self.gate.review(request) => decision,
            };
            if !approved {
                info!(tool = %call.name, "operator refused the action");
                return Dispatch::Outcome(ToolOutcome::error(
                    call.id.clone(),
                    format!("approval denied: operator refused '{}'", call.name),
                ));
            }
        }

        debug!(tool = %call.name, origin = ?origin, "executing tool");
        match tokio::time::timeout(
            self.tool_timeout,
            tool.execute(call.arguments.clone(), &context),
        )
        .await
        {
            Ok(Ok(mut outcome)) => {
                outcome.call_id = call.id.clone();
                Dispatch::Outcome(outcome)
            }
            Ok(Err(e)) => {
                warn!(tool = %call.name, error = %e, "tool failed");
                Dispatch::Outcome(ToolOutcome::error(
                    call.id.clone(),
                    format!("tool error: {e}"),
                ))
            }
            Err(_) => {
                warn!(tool = %call.name, timeout = ?self.tool_timeout, "tool timed out");
                Dispatch::Outcome(ToolOutcome::error(
                    call.id.clone(),
                    format!("tool '{}' timed out after {:?}", call.name, self.tool_timeout),
                ))
            }
        }
    }
}
