use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::db::models::{Attachment, Message, Role};

/// One transcript row as the view sees it. `client_id` is the stable display
/// key assigned locally at append time; `server_id` arrives when the store
/// confirms the write and stays `None` for entries that never made it.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub client_id: String,
    pub server_id: Option<String>,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
}

impl TranscriptEntry {
    /// Entry for a store-confirmed message; the view key is the server id.
    pub fn from_stored(message: Message) -> Self {
        Self {
            client_id: message.id.clone(),
            server_id: Some(message.id),
            role: message.role,
            content: message.content,
            timestamp: message.created_at,
            attachments: message.attachments,
        }
    }

    /// Optimistic local entry, not yet acknowledged by the store.
    pub fn optimistic(role: Role, content: &str, attachments: Vec<Attachment>) -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            server_id: None,
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            attachments,
        }
    }
}

/// Reactive view of the current conversation's transcript. Rebuilt in full on
/// every conversation switch; mutated only by the send pipeline and the
/// initial load.
#[derive(Debug, Default)]
pub struct ChatState {
    pub messages: Vec<TranscriptEntry>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl ChatState {
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: messages.into_iter().map(TranscriptEntry::from_stored).collect(),
            is_loading: false,
            error: None,
        }
    }
}

/// State shared between the lifecycle manager and the send pipeline: which
/// conversation is current, and its transcript view. Locked briefly for each
/// mutation; the lock is never held across an await.
#[derive(Debug, Default)]
pub struct SessionState {
    pub current_conversation: Option<String>,
    pub chat: ChatState,
}

pub type SharedSession = Arc<Mutex<SessionState>>;

pub fn new_shared_session() -> SharedSession {
    Arc::new(Mutex::new(SessionState::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_messages_carry_their_server_id() {
        let state = ChatState::from_messages(vec![Message {
            id: "srv-1".to_string(),
            conversation_id: "c1".to_string(),
            role: Role::User,
            content: "hello".to_string(),
            created_at: Utc::now(),
            attachments: Vec::new(),
        }]);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].server_id.as_deref(), Some("srv-1"));
        assert_eq!(state.messages[0].client_id, "srv-1");
        assert!(!state.is_loading);
        assert!(state.error.is_none());
    }

    #[test]
    fn optimistic_entries_start_unconfirmed() {
        let entry = TranscriptEntry::optimistic(Role::User, "hi", Vec::new());
        assert!(entry.server_id.is_none());
        assert!(!entry.client_id.is_empty());
    }
}
