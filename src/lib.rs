mod busy;
pub mod catalog;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod gateway;
pub mod http;
pub mod pending;
pub mod progress;
pub mod session;
pub mod sqlite;
pub mod status;
pub mod store;
pub mod uploader;

pub use catalog::{CatalogKind, CatalogRow};
pub use client::SyncClient;
pub use config::{Config, GatewayConfig};
pub use engine::CatalogSyncEngine;
pub use error::SyncError;
pub use gateway::RemoteGateway;
pub use http::HttpGateway;
pub use pending::{
    CommitPolicy, NewPendingRecord, PendingKind, PendingRecord, PendingState, SubmitResponse,
    Submission, VoucherLine,
};
pub use progress::{NoProgress, ProgressSink, StatusBoard};
pub use session::{Session, SessionProvider};
pub use sqlite::SqliteStore;
pub use status::{CatalogSyncReport, SyncResult, SyncStatus, UploadFailure, UploadReport};
pub use store::LocalStore;
pub use uploader::PendingRecordUploader;
