use std::sync::Arc;

use crate::auth::{AuthError, Identity};
use crate::chat::{ChatSession, SendError};
use crate::db::models::{Conversation, PatientDetails};
use crate::db::{Database, StoreError};
use crate::llm::Responder;
use crate::session::{new_shared_session, ChatState, SharedSession};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Consultation";

const INTAKE_CHECK_FAILURE_MESSAGE: &str =
    "Could not load your profile. Please try again later.";

/// Where the user is in the bootstrap/intake flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Bootstrapping,
    AwaitingIntake,
    Active,
    /// Intake check failed; user-visible message, no automatic retry.
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Owns the conversation list and the bootstrap/intake state machine; shares
/// the current-conversation view with the send pipeline.
pub struct ConversationManager {
    db: Arc<Database>,
    identity: Arc<dyn Identity>,
    chat: ChatSession,
    session: SharedSession,
    state: LifecycleState,
    conversations: Vec<Conversation>,
}

impl ConversationManager {
    pub fn new(
        db: Arc<Database>,
        identity: Arc<dyn Identity>,
        responder: Arc<dyn Responder>,
        model: impl Into<String>,
    ) -> Self {
        let session = new_shared_session();
        let chat = ChatSession::new(db.clone(), responder, model, session.clone());
        Self {
            db,
            identity,
            chat,
            session,
            state: LifecycleState::Bootstrapping,
            conversations: Vec::new(),
        }
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    /// Conversation list, most recent first.
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn current_conversation_id(&self) -> Option<String> {
        self.session.lock().unwrap().current_conversation.clone()
    }

    /// Handle to the send pipeline bound to this manager's session state.
    pub fn chat_session(&self) -> ChatSession {
        self.chat.clone()
    }

    /// Shared transcript view, for the presentation layer to observe.
    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    /// On mount: decide between the intake flow and resuming conversations.
    pub fn bootstrap(&mut self) -> Result<(), LifecycleError> {
        let user_id = self.identity.current_user_id()?;
        match self.db.has_patient_details(&user_id) {
            Ok(false) => {
                tracing::info!(user = %user_id, "no intake record; awaiting intake");
                self.state = LifecycleState::AwaitingIntake;
                Ok(())
            }
            Ok(true) => self.enter_active(&user_id),
            Err(e) => {
                tracing::error!(user = %user_id, error = %e, "intake check failed");
                self.state = LifecycleState::Error(INTAKE_CHECK_FAILURE_MESSAGE.to_string());
                Err(e.into())
            }
        }
    }

    /// Persists the intake record and opens the user's first conversation.
    /// Free-text symptoms become the conversation's first user turn.
    pub async fn submit_intake(
        &mut self,
        mut details: PatientDetails,
    ) -> Result<(), LifecycleError> {
        let user_id = self.identity.current_user_id()?;
        details.user_id = user_id.clone();
        self.db.save_patient_details(&details)?;

        let conv = self
            .db
            .create_conversation(&user_id, DEFAULT_CONVERSATION_TITLE)?;
        self.conversations.insert(0, conv.clone());
        self.set_current(&conv.id, ChatState::default());
        self.state = LifecycleState::Active;

        let symptoms = details.initial_symptoms.trim();
        if !symptoms.is_empty() {
            self.chat.send(symptoms, Vec::new()).await?;
        }
        Ok(())
    }

    pub fn create_conversation(&mut self) -> Result<Conversation, LifecycleError> {
        let user_id = self.identity.current_user_id()?;
        let conv = self
            .db
            .create_conversation(&user_id, DEFAULT_CONVERSATION_TITLE)?;
        tracing::info!(conversation = %conv.id, "conversation created");
        self.conversations.insert(0, conv.clone());
        self.set_current(&conv.id, ChatState::default());
        Ok(conv)
    }

    /// Makes `id` current and rebuilds the transcript view from the store.
    /// The previous conversation's view is discarded entirely.
    pub fn select_conversation(&mut self, id: &str) -> Result<(), LifecycleError> {
        self.identity.current_user_id()?;
        if !self.conversations.iter().any(|c| c.id == id) {
            return Err(StoreError::NotFound(format!("conversation {id}")).into());
        }
        let messages = self.db.list_messages(id)?;
        self.set_current(id, ChatState::from_messages(messages));
        Ok(())
    }

    /// Deletes a conversation. If it was current, the most recent remaining
    /// one takes its place; if none remain, a fresh conversation is created so
    /// the user always has an active one.
    pub fn delete_conversation(&mut self, id: &str) -> Result<(), LifecycleError> {
        self.identity.current_user_id()?;
        self.db.delete_conversation(id)?;
        self.conversations.retain(|c| c.id != id);
        tracing::info!(conversation = %id, "conversation deleted");

        let was_current = self.current_conversation_id().as_deref() == Some(id);
        if was_current {
            match self.conversations.first().map(|c| c.id.clone()) {
                Some(next) => self.select_conversation(&next)?,
                None => {
                    self.create_conversation()?;
                }
            }
        }
        Ok(())
    }

    /// Loads the conversation list and ensures a current conversation exists.
    fn enter_active(&mut self, user_id: &str) -> Result<(), LifecycleError> {
        self.conversations = self.db.list_conversations(user_id)?;
        if self.conversations.is_empty() {
            let conv = self
                .db
                .create_conversation(user_id, DEFAULT_CONVERSATION_TITLE)?;
            self.conversations.insert(0, conv);
        }
        let current = self.conversations[0].id.clone();
        let messages = self.db.list_messages(&current)?;
        self.set_current(&current, ChatState::from_messages(messages));
        self.state = LifecycleState::Active;
        tracing::info!(user = %user_id, conversation = %current, "session active");
        Ok(())
    }

    fn set_current(&mut self, id: &str, chat: ChatState) {
        let mut s = self.session.lock().unwrap();
        s.current_conversation = Some(id.to_string());
        s.chat = chat;
    }
}
