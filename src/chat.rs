use std::sync::Arc;

use crate::db::models::{Attachment, Role};
use crate::db::{Database, StoreError};
use crate::llm::{ChatMessage, ChatRequest, Responder, ResponderError, SYSTEM_PROMPT};
use crate::session::{SharedSession, TranscriptEntry};

/// Fixed user-facing messages; the underlying error goes to the log, not the
/// transcript view.
const RESPONDER_FAILURE_MESSAGE: &str =
    "The assistant could not respond. Please try again.";
const STORE_FAILURE_MESSAGE: &str =
    "Your message could not be saved. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no active conversation")]
    NoActiveConversation,
    #[error("a send is already in flight for this conversation")]
    Busy,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Responder(#[from] ResponderError),
}

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("message cannot be edited: {0}")]
    NotEditable(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The send pipeline: one coordinated unit of work per user turn, from
/// optimistic append through durable persistence and the responder round trip.
#[derive(Clone)]
pub struct ChatSession {
    db: Arc<Database>,
    responder: Arc<dyn Responder>,
    model: String,
    session: SharedSession,
}

impl ChatSession {
    pub fn new(
        db: Arc<Database>,
        responder: Arc<dyn Responder>,
        model: impl Into<String>,
        session: SharedSession,
    ) -> Self {
        Self {
            db,
            responder,
            model: model.into(),
            session,
        }
    }

    /// Sends one user turn.
    ///
    /// The optimistic append, the loading flag, and the `Busy` guard are all
    /// applied under one lock before the first await, so the caller observes
    /// the user's message synchronously. Every mutation after an await is
    /// applied only if the conversation this call started against is still
    /// current; otherwise the completion is discarded.
    pub async fn send(
        &self,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<(), SendError> {
        let attachment_ids: Vec<String> = attachments.iter().map(|a| a.id.clone()).collect();

        // Step 1: optimistic append, before any suspension point.
        let (conversation_id, client_id) = {
            let mut s = self.session.lock().unwrap();
            let conversation_id = s
                .current_conversation
                .clone()
                .ok_or(SendError::NoActiveConversation)?;
            if s.chat.is_loading {
                return Err(SendError::Busy);
            }
            let entry = TranscriptEntry::optimistic(Role::User, content, attachments);
            let client_id = entry.client_id.clone();
            s.chat.messages.push(entry);
            s.chat.is_loading = true;
            s.chat.error = None;
            (conversation_id, client_id)
        };

        // Step 2: durable persist of the user turn, then attachment
        // association under the store-assigned message id.
        let user_msg = self
            .db
            .append_message(&conversation_id, Role::User, content)
            .and_then(|msg| {
                self.db.link_attachments(&attachment_ids, &msg.id)?;
                Ok(msg)
            });
        let user_msg = match user_msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(conversation = %conversation_id, error = %e, "user turn not persisted");
                self.fail_if_current(&conversation_id, STORE_FAILURE_MESSAGE);
                return Err(e.into());
            }
        };
        // Reconcile the store-assigned id onto the optimistic entry.
        {
            let mut s = self.session.lock().unwrap();
            if s.current_conversation.as_deref() == Some(conversation_id.as_str()) {
                if let Some(entry) = s
                    .chat
                    .messages
                    .iter_mut()
                    .find(|m| m.client_id == client_id)
                {
                    entry.server_id = Some(user_msg.id.clone());
                }
            }
        }

        // Step 3: the full persisted transcript, roles and content only,
        // behind the fixed persona instruction.
        let transcript = match self.db.list_messages(&conversation_id) {
            Ok(t) => t,
            Err(e) => {
                self.fail_if_current(&conversation_id, STORE_FAILURE_MESSAGE);
                return Err(e.into());
            }
        };
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        messages.extend(
            transcript
                .iter()
                .map(|m| ChatMessage::new(m.role, &m.content)),
        );
        let request = ChatRequest {
            messages,
            model: self.model.clone(),
        };

        match self.responder.respond(&request).await {
            Ok(reply) => {
                // Step 4: persist durably, then surface in the view.
                match self.db.append_message(&conversation_id, Role::Assistant, &reply) {
                    Ok(assistant_msg) => {
                        let mut s = self.session.lock().unwrap();
                        if s.current_conversation.as_deref() == Some(conversation_id.as_str()) {
                            s.chat
                                .messages
                                .push(TranscriptEntry::from_stored(assistant_msg));
                            s.chat.is_loading = false;
                        } else {
                            tracing::debug!(
                                conversation = %conversation_id,
                                "conversation switched mid-send; reply persisted but not displayed"
                            );
                        }
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!(conversation = %conversation_id, error = %e, "assistant reply not persisted");
                        self.fail_if_current(&conversation_id, STORE_FAILURE_MESSAGE);
                        Err(e.into())
                    }
                }
            }
            Err(e) => {
                // Step 5: user turn stays, no assistant turn, no retry.
                tracing::warn!(conversation = %conversation_id, error = %e, "responder call failed");
                self.fail_if_current(&conversation_id, RESPONDER_FAILURE_MESSAGE);
                Err(e.into())
            }
        }
    }

    /// Replaces the content of a previously sent user message. Role, id, and
    /// position never change; only store-confirmed user entries are editable.
    pub fn edit_message(&self, client_id: &str, new_content: &str) -> Result<(), EditError> {
        let server_id = {
            let s = self.session.lock().unwrap();
            let entry = s
                .chat
                .messages
                .iter()
                .find(|m| m.client_id == client_id)
                .ok_or_else(|| EditError::NotFound(client_id.to_string()))?;
            if entry.role != Role::User {
                return Err(EditError::NotEditable("only user messages can be edited"));
            }
            entry
                .server_id
                .clone()
                .ok_or(EditError::NotEditable("message is not yet persisted"))?
        };

        self.db.update_message_content(&server_id, new_content)?;

        let mut s = self.session.lock().unwrap();
        if let Some(entry) = s
            .chat
            .messages
            .iter_mut()
            .find(|m| m.client_id == client_id)
        {
            entry.content = new_content.to_string();
        }
        Ok(())
    }

    fn fail_if_current(&self, conversation_id: &str, message: &str) {
        let mut s = self.session.lock().unwrap();
        if s.current_conversation.as_deref() == Some(conversation_id) {
            s.chat.error = Some(message.to_string());
            s.chat.is_loading = false;
        }
    }
}
