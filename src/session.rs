use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Authenticated user session as handed over by the login flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user_type: String,
    pub inspector_id: Option<i64>,
    pub user_name: Option<String>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub trait SessionProvider: Send + Sync {
    fn current_session(&self) -> Result<Option<Session>, SyncError>;
}

/// A fixed session, mostly for hosts that keep the session themselves.
impl SessionProvider for Session {
    fn current_session(&self) -> Result<Option<Session>, SyncError> {
        Ok(Some(self.clone()))
    }
}

/// Fetch the current session or fail the precondition check.
pub fn require_session<P: SessionProvider + ?Sized>(provider: &P) -> Result<Session, SyncError> {
    let session = provider.current_session()?.ok_or(SyncError::NoSession)?;
    if session.is_expired(Utc::now()) {
        return Err(SyncError::SessionExpired(session.expires_at));
    }
    Ok(session)
}
