use async_trait::async_trait;

use crate::catalog::{CatalogKind, CatalogRow};
use crate::error::SyncError;
use crate::pending::{PendingKind, SubmitResponse, Submission};
use crate::session::Session;

/// Remote API as seen by the engines.
///
/// A transport error and a `success = false` answer are handled the same way by callers,
/// so implementations should not retry on their own.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Full contents of one catalog.
    async fn fetch_catalog(
        &self,
        kind: CatalogKind,
        session: &Session,
    ) -> Result<Vec<CatalogRow>, SyncError>;

    async fn submit(
        &self,
        submission: &Submission,
        session: &Session,
    ) -> Result<SubmitResponse, SyncError>;

    /// One call for many records of the same kind; the verdict covers all of them.
    async fn submit_batch(
        &self,
        kind: PendingKind,
        submissions: &[Submission],
        session: &Session,
    ) -> Result<SubmitResponse, SyncError>;
}
