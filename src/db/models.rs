use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct RoleParseError(String);

impl std::str::FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(RoleParseError(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
}

/// Metadata row for one uploaded file. `message_id` stays NULL until the
/// owning message has been persisted; the binary itself lives in the
/// attachment store under `file_path`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Attachment {
    pub id: String,
    pub message_id: Option<String>,
    pub file_name: String,
    pub file_path: String,
    pub content_type: String,
    pub size: i64,
}

/// One-time intake record collected before first use.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PatientDetails {
    pub user_id: String,
    pub full_name: String,
    pub phone_number: String,
    pub email: String,
    pub initial_symptoms: String,
    pub age: Option<i64>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
}
