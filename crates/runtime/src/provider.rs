//! The conversational backend interface the agent loop drives.
//!
//! This trait lives in the runtime crate (not in `crates/llm`) because it is
//! defined by the consumer (the agent loop), not the provider.
//! Implementations live in `crates/llm`; all per-backend shaping (system
//! message hoisting, tool formats, argument decoding) stays inside each
//! adapter so the loop never branches on provider identity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SamplingOptions;
use crate::message::Message;
use crate::tool::{ToolCall, ToolDescriptor};

/// One complete provider response.
#[derive(Debug, Clone)]
pub struct ProviderTurn {
    /// Assistant text; an empty string, never absent, on tool-call-only turns.
    pub text: String,
    /// Requested tool calls with decoded arguments, in provider order.
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Normal end of response
    EndTurn,
    /// Model wants to use tools
    ToolUse,
    /// Hit max tokens limit
    MaxTokens,
    /// Stopped by stop sequence
    StopSequence,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A conversational backend normalized to one request/response shape.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send the full conversation and tool descriptors, get one turn back.
    /// Must not mutate the caller's message sequence.
    async fn converse(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        sampling: &SamplingOptions,
    ) -> Result<ProviderTurn, ProviderError>;

    /// Provider name for logging/debugging (e.g., "anthropic", "openai")
    fn name(&self) -> &str;
}

/// Provider failures, classified so the loop can apply different recovery.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network-level failure or elapsed per-call timeout.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("API error: {status} — {message}")]
    Api { status: u16, message: String },
    #[error("authentication failed")]
    Auth,
    /// The backend answered but the response (or a tool call's arguments)
    /// could not be decoded.
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether a single retry with backoff is worth attempting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_) | ProviderError::RateLimited { .. }
        )
    }
}

/// Mock provider for testing the agent loop without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns pre-queued turns (or errors) in FIFO order and records how
    /// many messages each request carried, so tests can assert that no
    /// message is duplicated across retries.
    pub struct MockProvider {
        responses: Mutex<VecDeque<Result<ProviderTurn, ProviderError>>>,
        request_sizes: Mutex<Vec<usize>>,
    }

    impl MockProvider {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                request_sizes: Mutex::new(Vec::new()),
            }
        }

        pub fn queue_turn(&self, turn: ProviderTurn) {
            self.responses.lock().unwrap().push_back(Ok(turn));
        }

        pub fn queue_text(&self, text: &str) {
            self.queue_turn(ProviderTurn {
                text: text.to_string(),
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                usage: TokenUsage::default(),
            });
        }

        pub fn queue_tool_call(&self, id: &str, name: &str, arguments: serde_json::Value) {
            self.queue_turn(ProviderTurn {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                }],
                stop_reason: StopReason::ToolUse,
                usage: TokenUsage::default(),
            });
        }

        pub fn queue_error(&self, error: ProviderError) {
            self.responses.lock().unwrap().push_back(Err(error));
        }

        /// Number of converse calls served so far.
        pub fn calls(&self) -> usize {
            self.request_sizes.lock().unwrap().len()
        }

        /// Message count of each request, in call order.
        pub fn request_sizes(&self) -> Vec<usize> {
            self.request_sizes.lock().unwrap().clone()
        }
    }

    impl Default for MockProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        async fn converse(
            &self,
            messages: &[Message],
            _tools: &[ToolDescriptor],
            _sampling: &SamplingOptions,
        ) -> Result<ProviderTurn, ProviderError> {
            self.request_sizes.lock().unwrap().push(messages.len());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(ProviderTurn {
                        text: String::new(),
                        tool_calls: vec![],
                        stop_reason: StopReason::EndTurn,
                        usage: TokenUsage::default(),
                    })
                })
        }

        fn name(&self) -> &str {
            "mock"
        }
    }
}
