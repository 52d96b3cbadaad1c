use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::{CompletionError, TextCompletion};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// `.env`-aware environment lookup: runtime env first, then a `.env` file.
fn robust_env_var(key: &str) -> Option<String> {
    let _ = dotenvy::dotenv();
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => {
            debug!("loaded {} from environment (length: {})", key, value.len());
            Some(value)
        }
        _ => None,
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

/// `reqwest`-backed [`TextCompletion`] speaking the chat-completions shape.
#[derive(Clone)]
pub struct HttpCompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpCompletionClient {
    pub fn new(api_key: String) -> Self {
        // Bounded timeouts so a wedged service degrades to the fallback
        // evaluator instead of hanging the interview.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Build from `COMPLETION_API_KEY` / `COMPLETION_BASE_URL` /
    /// `COMPLETION_MODEL`; `None` when no key is configured.
    pub fn from_env() -> Option<Self> {
        let api_key = robust_env_var("COMPLETION_API_KEY")?;
        let mut client = Self::new(api_key);
        if let Some(base_url) = robust_env_var("COMPLETION_BASE_URL") {
            client.base_url = base_url;
        }
        if let Some(model) = robust_env_var("COMPLETION_MODEL") {
            client.model = model;
        }
        info!("completion client configured (model: {})", client.model);
        Some(client)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Pull the completion text out of whichever of the known response
    /// shapes the service used.
    fn extract_content(payload: &Value) -> Option<String> {
        if let Some(content) = payload
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
        {
            return Some(content.to_string());
        }
        if let Some(content) = payload.get("response").and_then(|r| r.as_str()) {
            return Some(content.to_string());
        }
        if let Some(content) = payload.get("content").and_then(|c| c.as_str()) {
            return Some(content.to_string());
        }
        None
    }
}

#[async_trait]
impl TextCompletion for HttpCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            max_tokens: 1024,
            temperature: 0.7,
            stream: false,
        };

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!("completion service returned {}", status);
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim_start().starts_with("<!DOCTYPE html>") || body.trim_start().starts_with("<html")
        {
            return Err(CompletionError::Empty);
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(payload) => Self::extract_content(&payload).ok_or(CompletionError::Empty),
            // Some gateways answer plain text; pass it through.
            Err(_) if !body.trim().is_empty() => Ok(body),
            Err(_) => Err(CompletionError::Empty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_content_probes_known_shapes() {
        let openai = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        });
        assert_eq!(HttpCompletionClient::extract_content(&openai).as_deref(), Some("hello"));

        let flat = serde_json::json!({"response": "hi"});
        assert_eq!(HttpCompletionClient::extract_content(&flat).as_deref(), Some("hi"));

        let bare = serde_json::json!({"content": "hey"});
        assert_eq!(HttpCompletionClient::extract_content(&bare).as_deref(), Some("hey"));

        let unknown = serde_json::json!({"data": 42});
        assert_eq!(HttpCompletionClient::extract_content(&unknown), None);
    }
}
