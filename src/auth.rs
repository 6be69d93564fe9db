use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("session expired")]
    SessionExpired,
}

/// Seam over the identity provider. The core only ever needs the current
/// user's id; a failing accessor doubles as the "session ended" signal and
/// callers give up without attempting any local state repair.
pub trait Identity: Send + Sync {
    fn current_user_id(&self) -> Result<String, AuthError>;
}

/// Fixed identity for embedding and tests. `end_session` flips it into the
/// expired state.
pub struct StaticIdentity {
    user_id: String,
    ended: AtomicBool,
}

impl StaticIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ended: AtomicBool::new(false),
        }
    }

    pub fn end_session(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

impl Identity for StaticIdentity {
    fn current_user_id(&self) -> Result<String, AuthError> {
        if self.ended.load(Ordering::SeqCst) {
            return Err(AuthError::SessionExpired);
        }
        Ok(self.user_id.clone())
    }
}
