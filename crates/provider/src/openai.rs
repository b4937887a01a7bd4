//! OpenAI-compatible chat completions client
//!
//! Works against OpenAI, OpenRouter, vLLM, Ollama and anything else that
//! speaks `/chat/completions`.

use crate::*;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, trace};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

/// OpenAI-compatible HTTP client
pub struct OpenAiCompatClient {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatClient {
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        let api_key = api_key.into();
        let api_base = api_base.unwrap_or_else(|| {
            if api_key.starts_with("sk-or-") {
                OPENROUTER_API_BASE.to_string()
            } else {
                DEFAULT_API_BASE.to_string()
            }
        });

        Self {
            client: Client::new(),
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            default_model: default_model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            temperature: 0.2,
            max_tokens: 2048,
        }
    }

    /// Defaults used when a request leaves them unset
    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": &m.role, "content": &m.content }))
            .collect();

        let mut body = json!({
            "model": request.model.clone().unwrap_or_else(|| self.default_model.clone()),
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "temperature": request.temperature.unwrap_or(self.temperature),
        });
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    fn parse_response(&self, json: Value) -> Result<ChatResponse> {
        let choice = json["choices"]
            .get(0)
            .ok_or(ProviderError::InvalidResponse)?;
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let usage = json["usage"].as_object().map(|usage| Usage {
            prompt_tokens: usage
                .get("prompt_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            completion_tokens: usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            total_tokens: usage
                .get("total_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
        });

        Ok(ChatResponse {
            content,
            usage,
            model: json["model"].as_str().map(str::to_string),
        })
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }

        let url = format!("{}/chat/completions", self.api_base);
        trace!("◆ POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| {
                if text.is_empty() {
                    status.to_string()
                } else {
                    text
                }
            });

        Err(match status.as_u16() {
            401 | 403 => ProviderError::Unauthorized(message),
            429 => ProviderError::RateLimited,
            code => ProviderError::Api {
                status: code,
                message,
            },
        })
    }
}

fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else if e.is_connect() {
        ProviderError::Network(e.to_string())
    } else {
        ProviderError::Request(e)
    }
}

/// Splits a byte stream into lines, decoding each only once it is complete
#[derive(Default)]
struct SseLines {
    pending: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8(raw)
                .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
            lines.push(line);
        }
        lines
    }
}

/// Content delta carried by one server-sent-event line, if any
fn parse_sse_line(line: &str) -> Option<std::result::Result<String, ()>> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(Err(()));
    }
    let value: Value = serde_json::from_str(data).ok()?;
    value["choices"][0]["delta"]["content"]
        .as_str()
        .map(|s| Ok(s.to_string()))
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_request(&request, false);
        let response = self.send(&body).await?;
        let json: Value = response.json().await?;

        debug!("◆ MODEL REPLIED ({})", json["model"].as_str().unwrap_or("?"));
        self.parse_response(json)
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        on_chunk: ChunkHandler<'_>,
    ) -> Result<ChatResponse> {
        let body = self.build_request(&request, true);
        let mut response = self.send(&body).await?;

        let mut lines = SseLines::default();
        let mut content = String::new();
        'read: while let Some(bytes) = response.chunk().await.map_err(map_send_error)? {
            for line in lines.push(&bytes) {
                match parse_sse_line(&line) {
                    Some(Ok(delta)) => {
                        on_chunk(&delta);
                        content.push_str(&delta);
                    }
                    Some(Err(())) => break 'read,
                    None => {}
                }
            }
        }

        Ok(ChatResponse {
            content,
            usage: None,
            model: request.model.or_else(|| Some(self.default_model.clone())),
        })
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults_to_openai() {
        let client = OpenAiCompatClient::new("sk-test", None, None);
        assert_eq!(client.api_base, "https://api.openai.com/v1");
        assert_eq!(client.default_model(), "gpt-4o-mini");
        assert!(client.is_configured());
    }

    #[test]
    fn test_new_detects_openrouter_key() {
        let client = OpenAiCompatClient::new("sk-or-abc", None, None);
        assert_eq!(client.api_base, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let client =
            OpenAiCompatClient::new("k", Some("http://localhost:8000/v1/".to_string()), None);
        assert_eq!(client.api_base(), "http://localhost:8000/v1");
    }

    #[test]
    fn test_sse_lines_keep_multibyte_split_across_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n";
        let bytes = line.as_bytes();
        let split = line.find('é').unwrap() + 1;

        let mut lines = SseLines::default();
        assert!(lines.push(&bytes[..split]).is_empty());
        let complete = lines.push(&bytes[split..]);

        assert_eq!(complete.len(), 1);
        assert_eq!(parse_sse_line(&complete[0]), Some(Ok("café".to_string())));
    }

    #[test]
    fn test_sse_lines_hold_partial_line() {
        let mut lines = SseLines::default();
        assert!(lines.push(b"data: [DO").is_empty());
        assert_eq!(lines.push(b"NE]\n\n"), vec!["data: [DONE]\n", "\n"]);
    }

    #[test]
    fn test_not_configured_without_key() {
        assert!(!OpenAiCompatClient::new("", None, None).is_configured());
    }

    #[test]
    fn test_build_request_uses_client_defaults() {
        let client = OpenAiCompatClient::new("k", None, Some("m-default".to_string()))
            .with_sampling(0.5, 128);
        let body = client.build_request(&ChatRequest::new(vec![Message::user("hi")]), false);

        assert_eq!(body["model"], "m-default");
        assert_eq!(body["max_tokens"], 128);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_build_request_overrides() {
        let client = OpenAiCompatClient::new("k", None, None);
        let request = ChatRequest::new(vec![Message::system("s"), Message::user("u")])
            .with_model("other")
            .with_max_tokens(7)
            .with_temperature(0.0);
        let body = client.build_request(&request, true);

        assert_eq!(body["model"], "other");
        assert_eq!(body["max_tokens"], 7);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_parse_response() {
        let client = OpenAiCompatClient::new("k", None, None);
        let response = client
            .parse_response(json!({
                "model": "gpt-x",
                "choices": [{ "message": { "role": "assistant", "content": "hello" } }],
                "usage": { "prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5 }
            }))
            .unwrap();

        assert_eq!(response.content, "hello");
        assert_eq!(response.model.as_deref(), Some("gpt-x"));
        assert_eq!(
            response.usage,
            Some(Usage {
                prompt_tokens: 3,
                completion_tokens: 2,
                total_tokens: 5
            })
        );
    }

    #[test]
    fn test_parse_response_without_choices() {
        let client = OpenAiCompatClient::new("k", None, None);
        let result = client.parse_response(json!({ "choices": [] }));
        assert!(matches!(result, Err(ProviderError::InvalidResponse)));
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"He"}}]}"#),
            Some(Ok("He".to_string()))
        );
        assert_eq!(parse_sse_line("data: [DONE]"), Some(Err(())));
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
    }

    #[tokio::test]
    async fn test_chat_without_key_fails_fast() {
        let client = OpenAiCompatClient::new("", None, None);
        let result = client.chat(ChatRequest::new(vec![Message::user("hi")])).await;
        assert!(matches!(result, Err(ProviderError::NoApiKey)));
    }
}
