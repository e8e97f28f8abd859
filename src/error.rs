use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// A blocking store task panicked or was cancelled.
    #[error("store worker: {0}")]
    Worker(#[from] tokio::task::JoinError),
    /// Remote answered with a non-success HTTP status.
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed catalog row: {0}")]
    MalformedRow(String),
    #[error("no active session")]
    NoSession,
    #[error("session expired at {0}")]
    SessionExpired(DateTime<Utc>),
    #[error("config: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(&'static str),
}

impl SyncError {
    /// True for errors that abort a run before any network or storage call.
    pub fn is_precondition(&self) -> bool {
        matches!(self, SyncError::NoSession | SyncError::SessionExpired(_))
    }
}
