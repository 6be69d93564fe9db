use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatRequest, Responder, ResponderError};
use crate::db::Database;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl OpenAiConfig {
    /// Reads responder configuration from the settings table, falling back to
    /// the public OpenAI endpoint. A missing API key is an error: there is no
    /// anonymous tier to degrade to.
    pub fn from_settings(db: &Database) -> Result<(Self, String), String> {
        let api_key = db
            .get_setting("openai_api_key")
            .ok()
            .flatten()
            .ok_or("OpenAI API key not configured")?;
        let base_url = db
            .get_setting("openai_base_url")
            .ok()
            .flatten()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = db
            .get_setting("chat_model")
            .ok()
            .flatten()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Ok((Self { api_key, base_url }, model))
    }
}

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
}

#[derive(Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetail,
}

#[derive(Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

/// `Responder` over an OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiResponder {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiResponder {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    async fn respond(&self, request: &ChatRequest) -> Result<String, ResponderError> {
        let messages: Vec<OpenAiMessage> = request
            .messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect();

        let body = OpenAiRequest {
            model: request.model.clone(),
            messages,
        };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Content-Type", "application/json")
            .json(&body);

        if !self.config.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAiErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            return Err(ResponderError::Api { status, message });
        }

        let data: OpenAiResponse = resp.json().await?;
        extract_reply(data)
    }
}

/// Only `choices[0]` is consulted. An empty `choices` array is surfaced as an
/// explicit error rather than an empty reply.
fn extract_reply(response: OpenAiResponse) -> Result<String, ResponderError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or(ResponderError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_choice_wins() {
        let data: OpenAiResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"How long have you had it?"}},
                           {"message":{"role":"assistant","content":"ignored"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_reply(data).unwrap(), "How long have you had it?");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let data: OpenAiResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            extract_reply(data),
            Err(ResponderError::EmptyResponse)
        ));

        // Some gateways omit the field entirely; treat that the same way.
        let data: OpenAiResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(matches!(
            extract_reply(data),
            Err(ResponderError::EmptyResponse)
        ));
    }

    #[test]
    fn config_falls_back_to_defaults() {
        let db = Database::open_in_memory().unwrap();
        assert!(OpenAiConfig::from_settings(&db).is_err());

        db.set_setting("openai_api_key", "sk-test").unwrap();
        let (config, model) = OpenAiConfig::from_settings(&db).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(model, DEFAULT_MODEL);

        db.set_setting("openai_base_url", "http://localhost:11434/v1")
            .unwrap();
        db.set_setting("chat_model", "llama3").unwrap();
        let (config, model) = OpenAiConfig::from_settings(&db).unwrap();
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(model, "llama3");
    }
}
