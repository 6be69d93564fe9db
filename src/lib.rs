//! Health assistant chat core.
//!
//! Keeps an in-memory transcript consistent with the durable conversation
//! store while a round trip to the assistant is outstanding: optimistic
//! append, persistence, responder invocation, attachment association, and
//! failure recovery. Presentation is expected to sit on top and drive these
//! types directly.

pub mod attachments;
pub mod auth;
pub mod chat;
pub mod db;
pub mod lifecycle;
pub mod llm;
pub mod session;

pub use attachments::{AttachmentPipeline, AttachmentStore, LocalAttachmentStore, UploadError, UploadedFile};
pub use auth::{AuthError, Identity, StaticIdentity};
pub use chat::{ChatSession, EditError, SendError};
pub use db::models::{Attachment, Conversation, Message, PatientDetails, Role};
pub use db::{Database, StoreError};
pub use lifecycle::{ConversationManager, LifecycleError, LifecycleState, DEFAULT_CONVERSATION_TITLE};
pub use llm::openai::{OpenAiConfig, OpenAiResponder};
pub use llm::{ChatMessage, ChatRequest, Responder, ResponderError, SYSTEM_PROMPT};
pub use session::{ChatState, SessionState, SharedSession, TranscriptEntry};
