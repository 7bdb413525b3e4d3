//! Chat-model client abstraction.
//!
//! The model is a black box behind [`ChatModel`]: given a conversation and
//! the available tool schemas it returns either final text or structured
//! tool-call requests. [`OpenAiChatModel`] speaks the OpenAI-compatible
//! `chat/completions` wire format, which covers OpenAI itself as well as
//! Ollama's `/v1` endpoint.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    fn as_str(self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

/// One tool invocation requested by the model. `arguments` is the raw JSON
/// string exactly as the model produced it; validation happens later, so
/// a malformed payload can be reported back instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    /// Assistant message carrying tool-call requests (echoed back into the
    /// conversation so the model sees what it asked for).
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: String::new(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// What the model produced for one completion request.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Answer(String),
    ToolCalls(Vec<ToolCallRequest>),
}

/// A tool offered to the model.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelReply>;
}

// ============ OpenAI-compatible client ============

/// Client for OpenAI-compatible `chat/completions` endpoints. Sends a
/// bearer token when `OPENAI_API_KEY` is set (local Ollama ignores it).
pub struct OpenAiChatModel {
    url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAiChatModel {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        }
    }
}

fn message_to_json(message: &ChatMessage) -> Value {
    let mut out = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        out["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments }
                    })
                })
                .collect(),
        );
    }
    if let Some(ref id) = message.tool_call_id {
        out["tool_call_id"] = json!(id);
    }
    out
}

fn tool_to_json(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

/// Parse a chat-completions response body into a reply.
pub fn parse_chat_response(body: &Value) -> Result<ModelReply> {
    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| {
            Error::ServiceUnavailable("malformed chat response: missing choices[0].message".into())
        })?;

    if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
        if !calls.is_empty() {
            let mut requests = Vec::with_capacity(calls.len());
            for (i, call) in calls.iter().enumerate() {
                let function = call.get("function").ok_or_else(|| {
                    Error::ServiceUnavailable("malformed chat response: tool call without function".into())
                })?;
                requests.push(ToolCallRequest {
                    id: call
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("call_{}", i)),
                    name: function
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    arguments: function
                        .get("arguments")
                        .and_then(|v| v.as_str())
                        .unwrap_or("{}")
                        .to_string(),
                });
            }
            return Ok(ModelReply::ToolCalls(requests));
        }
    }

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Ok(ModelReply::Answer(content))
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelReply> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;

        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(message_to_json).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_to_json).collect());
        }

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
            }

            let mut request = client
                .post(format!("{}/chat/completions", self.url))
                .json(&body);
            if let Some(ref key) = self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await.map_err(|e| {
                            Error::ServiceUnavailable(format!("invalid chat response: {}", e))
                        })?;
                        return parse_chat_response(&json);
                    }

                    let text = response.text().await.unwrap_or_default();
                    let message = format!("chat endpoint error {}: {}", status, text);
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::ServiceUnavailable(message));
                        continue;
                    }
                    return Err(Error::ServiceUnavailable(message));
                }
                Err(e) => {
                    last_err = Some(Error::ServiceUnavailable(format!(
                        "chat endpoint unreachable at {}: {}",
                        self.url, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::ServiceUnavailable("chat completion failed".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        let body = json!({
            "choices": [ { "message": { "role": "assistant", "content": "The total is $87.12." } } ]
        });
        assert_eq!(
            parse_chat_response(&body).unwrap(),
            ModelReply::Answer("The total is $87.12.".to_string())
        );
    }

    #[test]
    fn test_parse_tool_calls() {
        let body = json!({
            "choices": [ { "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [ {
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "search_pdfs", "arguments": "{\"query\":\"march total\"}" }
                } ]
            } } ]
        });
        match parse_chat_response(&body).unwrap() {
            ModelReply::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[0].name, "search_pdfs");
                assert!(calls[0].arguments.contains("march total"));
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_tool_calls_is_answer() {
        let body = json!({
            "choices": [ { "message": { "content": "done", "tool_calls": [] } } ]
        });
        assert_eq!(
            parse_chat_response(&body).unwrap(),
            ModelReply::Answer("done".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_missing_choices() {
        assert!(parse_chat_response(&json!({ "error": "boom" })).is_err());
    }

    #[test]
    fn test_message_serialization() {
        let msg = ChatMessage::tool_result("call_1", "[]");
        let json = message_to_json(&msg);
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");

        let msg = ChatMessage::assistant_tool_calls(vec![ToolCallRequest {
            id: "call_2".to_string(),
            name: "search_pdfs".to_string(),
            arguments: "{}".to_string(),
        }]);
        let json = message_to_json(&msg);
        assert_eq!(json["tool_calls"][0]["function"]["name"], "search_pdfs");
        assert_eq!(json["tool_calls"][0]["type"], "function");
    }

    #[test]
    fn test_tool_spec_serialization() {
        let spec = ToolSpec {
            name: "search_pdfs".to_string(),
            description: "search".to_string(),
            parameters: json!({ "type": "object" }),
        };
        let json = tool_to_json(&spec);
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "search_pdfs");
    }
}
