//! OpenAI Chat Completions adapter.
//!
//! System messages become the leading list entry; tool calls come back with
//! JSON-encoded argument strings, which are decoded strictly: an undecodable
//! string surfaces [`ProviderError::Decode`], never an empty argument map.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use marshal_runtime::config::SamplingOptions;
use marshal_runtime::message::Message;
use marshal_runtime::provider::{Provider, ProviderError, ProviderTurn, StopReason, TokenUsage};
use marshal_runtime::tool::{ToolCall, ToolDescriptor};

pub const DEFAULT_MODEL: &str = "gpt-4o";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url,
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
                        "content": content.text.clone(),
                    });
                    if !content.tool_calls.is_empty() {
                        let calls: Vec<Value> = content
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": tc.arguments.to_string(),
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
                        "tool_call_id": outcome.call_id,
                        "content": outcome.content,
                    }));
                }
            }
        }

        let mut body = json!({
            "model": model,
            "messages": api_messages,
            "temperature": sampling.temperature,
            "max_tokens": sampling.max_tokens,
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
        let message = resp["choices"][0]
            .get("message")
            .ok_or_else(|| ProviderError::Decode("missing choices[0].message".into()))?;

        let text = message["content"].as_str().unwrap_or("").to_string();

        let mut tool_calls: Vec<ToolCall> = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let id = call["id"]
                    .as_str()
                    .ok_or_else(|| ProviderError::Decode("tool call missing id".into()))?;
                let name = call["function"]["name"]
                    .as_str()
                    .ok_or_else(|| ProviderError::Decode("tool call missing name".into()))?;
                let raw_arguments = call["function"]["arguments"].as_str().ok_or_else(|| {
                    ProviderError::Decode(format!("tool call '{id}' has no arguments string"))
                })?;
                // Strict decode: a broken argument string must surface as a
                // decode error, never as an empty argument map.
                let arguments: Value = serde_json::from_str(raw_arguments).map_err(|e| {
                    ProviderError::Decode(format!(
                        "tool call '{id}' has undecodable arguments: {e}"
                    ))
                })?;
                tool_calls.push(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                });
            }
        }

        let stop_reason = match resp["choices"][0]["finish_reason"].as_str() {
            Some("tool_calls") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            Some("content_filter") => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        };

        Ok(ProviderTurn {
            text,
            tool_calls,
            stop_reason,
            usage: TokenUsage {
                input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
                output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            },
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn converse(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        sampling: &SamplingOptions,
    ) -> Result<ProviderTurn, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = Self::build_request_body(&self.model, messages, tools, sampling);

        debug!(model = %self.model, url = %url, "OpenAI request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marshal_runtime::message::Transcript;
    use marshal_runtime::tool::ToolOutcome;

    #[test]
    fn test_system_is_first_list_entry() {
        let mut t = Transcript::new();
        t.push_system("You are helpful.");
        t.push_user("Hello");

        let body = OpenAiProvider::build_request_body(
            "gpt-4o",
            t.messages(),
            &[],
            &SamplingOptions::default(),
        );

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You are helpful.");
        assert_eq!(messages[1]["role"], "user");
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_assistant_tool_call_arguments_stringified() {
        let mut t = Transcript::new();
        t.push_user("run ls");
        t.push_assistant(
            None,
            vec![ToolCall {
                id: "call_1".to_string(),
                name: "shell_execute".to_string(),
                arguments: serde_json::json!({"command": "ls"}),
            }],
        );
        t.push_tool(ToolOutcome::success("call_1", "main.rs"));

        let body = OpenAiProvider::build_request_body(
            "gpt-4o",
            t.messages(),
            &[],
            &SamplingOptions::default(),
        );

        let messages = body["messages"].as_array().unwrap();
        let arguments = messages[1]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        // Arguments are a JSON-encoded string, not an object.
        assert_eq!(
            serde_json::from_str::<Value>(arguments).unwrap(),
            serde_json::json!({"command": "ls"})
        );
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_tools_use_function_wrapper() {
        let tools = vec![ToolDescriptor {
            name: "file_read".to_string(),
            description: "Read a file".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        let mut t = Transcript::new();
        t.push_user("hi");

        let body =
            OpenAiProvider::build_request_body("gpt-4o", t.messages(), &tools, &SamplingOptions::default());

        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "file_read");
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_parse_tool_call_with_encoded_arguments() {
        let resp = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {
                            "name": "file_read",
                            "arguments": "{\"path\": \"main.rs\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 7, "completion_tokens": 11}
        });

        let turn = OpenAiProvider::parse_response(&resp).unwrap();
        assert_eq!(turn.text, "");
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(
            turn.tool_calls[0].arguments,
            serde_json::json!({"path": "main.rs"})
        );
        assert_eq!(turn.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn test_undecodable_arguments_surface_decode_error() {
        let resp = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {
                            "name": "file_read",
                            "arguments": "{not valid json"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });

        let err = OpenAiProvider::parse_response(&resp).unwrap_err();
        match err {
            ProviderError::Decode(msg) => assert!(msg.contains("call_9")),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_plain_text_turn() {
        let resp = serde_json::json!({
            "choices": [{
                "message": {"content": "Hello there."},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4}
        });

        let turn = OpenAiProvider::parse_response(&resp).unwrap();
        assert_eq!(turn.text, "Hello there.");
        assert!(turn.tool_calls.is_empty());
        assert_eq!(turn.stop_reason, StopReason::EndTurn);
    }
}
