//! Chat-completion model client used by the summarizer and the backend agent.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ChatConfig;
use crate::types::SummarizerError;

/// One chat completion call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Request provider JSON mode. If the provider rejects it, the call is
    /// retried once without it.
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn json(model: &str, system: &str, user: &str) -> Self {
        Self {
            model: model.to_string(),
            system: system.to_string(),
            user: user.to_string(),
            temperature: 0.2,
            max_tokens: 2048,
            json_mode: true,
        }
    }
}

/// Chat completion provider.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, SummarizerError>;
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiChatModel {
    pub fn new(config: &ChatConfig) -> Result<Self, SummarizerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SummarizerError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
        })
    }

    async fn call(&self, request: &ChatRequest, json_mode: bool) -> Result<String, SummarizerError> {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user }
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let start = std::time::Instant::now();
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SummarizerError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SummarizerError::Model {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| SummarizerError::Parse(e.to_string()))?;

        if let Some(usage) = json.get("usage") {
            tracing::debug!(
                model = %request.model,
                prompt_tokens = usage.get("prompt_tokens").and_then(serde_json::Value::as_u64),
                completion_tokens = usage.get("completion_tokens").and_then(serde_json::Value::as_u64),
                latency_ms = start.elapsed().as_millis() as u64,
                "chat completion usage"
            );
        }

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SummarizerError::Parse("no content in response choices".to_string()))
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, request: &ChatRequest) -> Result<String, SummarizerError> {
        if request.json_mode {
            match self.call(request, true).await {
                Ok(text) => return Ok(text),
                // 4xx other than auth usually means the model rejects JSON
                // mode; retry once without it.
                Err(SummarizerError::Model { status, body })
                    if (400..500).contains(&status) && status != 401 && status != 403 =>
                {
                    tracing::warn!(status, body = %body, "JSON mode rejected, retrying without");
                }
                Err(e) => return Err(e),
            }
        }
        self.call(request, false).await
    }
}

/// Parse model output as JSON, falling back to the trailing `{…}` block when
/// the model wraps its answer in prose or code fences.
pub fn extract_json(text: &str) -> Result<Value, SummarizerError> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }

    // Walk candidate `{` positions in order; take the first balanced block
    // that parses, which keeps the outermost object when blocks nest.
    let opens: Vec<usize> = trimmed
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .map(|(i, _)| i)
        .collect();
    for &start in opens.iter() {
        if let Some(end) = matching_brace(trimmed, start) {
            if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(v);
            }
        }
    }
    Err(SummarizerError::Parse(format!(
        "no JSON object found in model output ({} chars)",
        trimmed.len()
    )))
}

fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_clean_json() {
        let v = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn extracts_trailing_block_from_prose() {
        let text = "Sure, here is the result:\n```json\n{\"candidates\": [{\"id\": \"m1\"}]}\n```";
        let v = extract_json(text).unwrap();
        assert_eq!(v["candidates"][0]["id"], "m1");
    }

    #[test]
    fn handles_braces_inside_strings() {
        let text = r#"note {not json} then {"reason": "uses { and } freely", "ok": true}"#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["ok"], true);
    }

    #[test]
    fn errors_when_no_object_present() {
        assert!(extract_json("no json here").is_err());
    }
}
