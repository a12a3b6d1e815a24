//! Text-generation backend shared by the move oracle and the generative validator.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{config::Config, error::BackendError};

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// One request/response exchange. Returns the raw text of the reply.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, BackendError>;
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatClient {
    pub fn new(config: &Config) -> Result<ChatClient, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(ChatClient {
            http,
            url: config.oracle_url.clone(),
            model: config.oracle_model.clone(),
            api_key: config.oracle_api_key.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for ChatClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
        };

        let mut request = self.http.post(&self.url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Transport(format!(
                "HTTP {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::Parse {
                reason: format!("unexpected response envelope: {e}"),
                received: text.chars().take(200).collect(),
            })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::Parse {
                reason: "response has no message content".into(),
                received: text.chars().take(200).collect(),
            })?;

        debug!("text backend replied with {} chars", content.len());
        Ok(content)
    }
}

/// Removes a surrounding markdown code fence (```` ```json ... ``` ````), nothing else.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // drop the language tag on the opening line
    match inner.find('\n') {
        Some(newline) if !inner[..newline].trim().contains(['{', '[']) => inner[newline + 1..].trim(),
        _ => inner.trim(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_only() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fence("Sure! {\"a\":1}"), "Sure! {\"a\":1}");
    }

    #[test]
    fn builds_client_from_config() {
        assert!(ChatClient::new(&Config::default()).is_ok());
    }
}
