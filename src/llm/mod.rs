pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::models::Role;

/// Fixed persona and safety posture sent as the leading system message on
/// every responder call.
pub const SYSTEM_PROMPT: &str = "You are a virtual health assistant. You provide \
general health information in a calm, supportive tone. You are not a doctor: \
you never diagnose, prescribe, or replace professional medical advice, and you \
remind users to consult a healthcare provider for anything serious, urgent, or \
personal. If symptoms sound like an emergency, tell the user to seek immediate \
medical attention.";

/// One `{role, content}` pair as the responder sees it. Attachments and ids
/// never cross this boundary.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: content.to_string(),
        }
    }

    pub fn system(content: &str) -> Self {
        Self::new(Role::System, content)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("responder returned no choices")]
    EmptyResponse,
}

/// External service that maps a transcript to a single reply string. One
/// attempt, no partial results; retry policy belongs to the caller (and the
/// caller's policy is "don't").
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, request: &ChatRequest) -> Result<String, ResponderError>;
}
