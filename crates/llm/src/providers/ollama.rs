//! Ollama `/api/chat` adapter.
//!
//! System messages lead the list like OpenAI, but tool call arguments arrive
//! as structured objects and carry no ids; the adapter synthesizes stable
//! per-turn ids so results can be correlated.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use marshal_runtime::config::SamplingOptions;
use marshal_runtime::message::Message;
use marshal_runtime::provider::{Provider, ProviderError, ProviderTurn, StopReason, TokenUsage};
use marshal_runtime::tool::{ToolCall, ToolDescriptor};

pub const DEFAULT_MODEL: &str = "llama3.1";

pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            model,
        }
    }

    fn build_request_body(
        model: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
        sampling: &SamplingOptions,
    ) -> Value {
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in messages {
            match msg {
                Message::System(text) => {
                    api_messages.push(json!({"role": "system", "content": text}));
                }
                Message::User(text) => {
                    api_messages.push(json!({"role": "user", "content": text}));
                }
                Message::Assistant(content) => {
                    let mut entry = json!({
                        "role": "assistant",
                        "content": content.text.clone().unwrap_or_default(),
                    });
                    if !content.tool_calls.is_empty() {
                        let calls: Vec<Value> = content
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "function": {
                                        "name": tc.name,
                                        "arguments": tc.arguments,
                                    },
                                })
                            })
                            .collect();
                        entry["tool_calls"] = json!(calls);
                    }
                    api_messages.push(entry);
                }
                Message::Tool(outcome) => {
                    api_messages.push(json!({
                        "role": "tool",
                        "content": outcome.content,
                    }));
                }
            }
        }

        let mut body = json!({
            "model": model,
            "messages": api_messages,
            "stream": false,
            "options": {
                "temperature": sampling.temperature,
                "num_predict": sampling.max_tokens,
            },
        });

        if !tools.is_empty() {
            let api_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        },
                    })
                })
                .collect();
            body["tools"] = json!(api_tools);
        }

        body
    }

    fn parse_response(resp: &Value) -> Result<ProviderTurn, ProviderError> {
        let message = resp
            .get("message")
            .ok_or_else(|| ProviderError::Decode("missing message".into()))?;

        let text = message["content"].as_str().unwrap_or("").to_string();

        let mut tool_calls: Vec<ToolCall> = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for (index, call) in calls.iter().enumerate() {
                let name = call["function"]["name"]
                    .as_str()
                    .ok_or_else(|| ProviderError::Decode("tool call missing name".into()))?;
                let arguments = call["function"]
                    .get("arguments")
                    .cloned()
                    .unwrap_or(Value::Null);
                if !arguments.is_object() {
                    return Err(ProviderError::Decode(format!(
                        "tool call '{name}' arguments are not an object"
                    )));
                }
                // Ollama sends no call ids; synthesize stable per-turn ones.
                tool_calls.push(ToolCall {
                    id: format!("call_{index}"),
                    name: name.to_string(),
                    arguments,
                });
            }
        }

        let stop_reason = if !tool_calls.is_empty() {
            StopReason::ToolUse
        } else {
            match resp["done_reason"].as_str() {
                Some("length") => StopReason::MaxTokens,
                _ => StopReason::EndTurn,
            }
        };

        Ok(ProviderTurn {
            text,
            tool_calls,
            stop_reason,
            usage: TokenUsage {
                input_tokens: resp["prompt_eval_count"].as_u64().unwrap_or(0),
                output_tokens: resp["eval_count"].as_u64().unwrap_or(0),
            },
        })
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn converse(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        sampling: &SamplingOptions,
    ) -> Result<ProviderTurn, ProviderError> {
        let url = format!("{}/api/chat", self.url);
        let body = Self::build_request_body(&self.model, messages, tools, sampling);

        debug!(model = %self.model, url = %url, "Ollama request");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
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
        "ollama"
    }
}
