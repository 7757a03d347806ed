//! Anthropic Messages API adapter.
//!
//! System messages are hoisted into the dedicated `system` request field;
//! tool calls arrive as `tool_use` content blocks with structured input, and
//! tool results go back as `tool_result` blocks on a user message.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use marshal_runtime::config::SamplingOptions;
use marshal_runtime::message::Message;
use marshal_runtime::provider::{Provider, ProviderError, ProviderTurn, StopReason, TokenUsage};
use marshal_runtime::tool::{ToolCall, ToolDescriptor};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url,
        }
    }

    pub fn with_defaults(api_key: String) -> Self {
        Self::new(
            api_key,
            DEFAULT_MODEL.to_string(),
            "https://api.anthropic.com".to_string(),
        )
    }

    fn build_request_body(
        model: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
        sampling: &SamplingOptions,
    ) -> Value {
        // System messages are hoisted into the dedicated field.
        let system: Vec<&str> = messages
            .iter()
            .filter_map(|m| match m {
                Message::System(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();

        let api_messages: Vec<Value> = messages
            .iter()
            .filter_map(|m| match m {
                Message::System(_) => None,
                Message::User(text) => Some(json!({
                    "role": "user",
                    "content": text,
                })),
                Message::Assistant(content) => {
                    let mut blocks: Vec<Value> = Vec::new();
                    if let Some(text) = &content.text {
                        blocks.push(json!({"type": "text", "text": text}));
                    }
                    for tc in &content.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                    Some(json!({
                        "role": "assistant",
                        "content": blocks,
                    }))
                }
                Message::Tool(outcome) => Some(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": outcome.call_id,
                        "content": outcome.content,
                        "is_error": outcome.is_error,
                    }],
                })),
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": api_messages,
            "temperature": sampling.temperature,
            "max_tokens": sampling.max_tokens,
        });

        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if !tools.is_empty() {
            let api_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!(api_tools);
        }

        body
    }

    fn parse_response(resp: &Value) -> Result<ProviderTurn, ProviderError> {
        let blocks = resp["content"]
            .as_array()
            .ok_or_else(|| ProviderError::Decode("missing content array".into()))?;

        let mut text_parts: Vec<&str> = Vec::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(t) = block["text"].as_str() {
                        text_parts.push(t);
                    }
                }
                Some("tool_use") => {
                    let id = block["id"]
                        .as_str()
                        .ok_or_else(|| ProviderError::Decode("tool_use block missing id".into()))?;
                    let name = block["name"].as_str().ok_or_else(|| {
                        ProviderError::Decode("tool_use block missing name".into())
                    })?;
                    tool_calls.push(ToolCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        arguments: block["input"].clone(),
                    });
                }
                _ => {}
            }
        }

        let stop_reason = match resp["stop_reason"].as_str() {
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        };

        Ok(ProviderTurn {
            text: text_parts.join(""),
            tool_calls,
            stop_reason,
            usage: TokenUsage {
                input_tokens: resp["usage"]["input_tokens"].as_u64().unwrap_or(0),
                output_tokens: resp["usage"]["output_tokens"].as_u64().unwrap_or(0),
            },
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn converse(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        sampling: &SamplingOptions,
    ) -> Result<ProviderTurn, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_request_body(&self.model, messages, tools, sampling);

        debug!(model = %self.model, url = %url, "Anthropic request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 401 {
            return Err(ProviderError::Auth);
        }
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(30);
            return Err(ProviderError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if status != 200 {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message });
        }

        let resp: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Self::parse_response(&resp)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
