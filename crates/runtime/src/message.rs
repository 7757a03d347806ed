use serde::{Deserialize, Serialize};

use crate::tool::{ToolCall, ToolOutcome};

/// A message in the conversation history. One of the four roles; the tool
/// variant carries its correlation id inside the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// System instructions, seeded once at run start
    System(String),
    /// User's text input
    User(String),
    /// Assistant's response (may contain text and/or tool calls)
    Assistant(AssistantMessage),
    /// Result of a tool execution
    Tool(ToolOutcome),
}

/// Content from the assistant that can contain mixed text and tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Text blocks in the response, omitted when the turn was tool-calls-only
    pub text: Option<String>,
    /// Tool calls requested by the assistant
    pub tool_calls: Vec<ToolCall>,
}

/// Append-only ordered message sequence forming the conversation for one run.
///
/// Created empty at run start, seeded with one system and one user message,
/// grown by one assistant message and zero-or-more tool messages per turn,
/// and handed to the session sink when the run ends. Nothing is ever removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_system(&mut self, text: impl Into<String>) {
        self.messages.push(Message::System(text.into()));
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::User(text.into()));
    }

    pub fn push_assistant(&mut self, text: Option<String>, tool_calls: Vec<ToolCall>) {
        self.messages
            .push(Message::Assistant(AssistantMessage { text, tool_calls }));
    }

    pub fn push_tool(&mut self, outcome: ToolOutcome) {
        self.messages.push(Message::Tool(outcome));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
