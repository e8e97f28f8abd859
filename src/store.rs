use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::catalog::{CatalogKind, CatalogRow};
use crate::error::SyncError;
use crate::pending::{NewPendingRecord, PendingKind, PendingRecord, PendingState, VoucherLine};

/// On-device persistence used by both engines.
///
/// Every method is atomic on its own; nothing spans calls.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Rows of a catalog in the order they were fetched.
    async fn catalog_rows(&self, kind: CatalogKind) -> Result<Vec<CatalogRow>, SyncError>;

    async fn catalog_count(&self, kind: CatalogKind) -> Result<usize, SyncError>;

    /// Clear the catalog and insert `rows` in one transaction, returning the number of rows
    /// now stored. Rows sharing an id collapse to the last one.
    /// On error the previous generation is left in place.
    async fn replace_catalog(
        &self,
        kind: CatalogKind,
        rows: &[CatalogRow],
    ) -> Result<usize, SyncError>;

    async fn clear_catalog(&self, kind: CatalogKind) -> Result<usize, SyncError>;

    async fn mark_catalog_synced(
        &self,
        kind: CatalogKind,
        at: DateTime<Utc>,
    ) -> Result<(), SyncError>;

    async fn last_synced_at(&self, kind: CatalogKind) -> Result<Option<DateTime<Utc>>, SyncError>;

    async fn clear_catalog_sync_marks(&self) -> Result<(), SyncError>;

    /// Persist a captured record, returning its local id.
    async fn save_pending(&self, record: &NewPendingRecord) -> Result<i64, SyncError>;

    /// Persist a voucher header and its lines together.
    async fn save_voucher(
        &self,
        header: &NewPendingRecord,
        lines: &[VoucherLine],
    ) -> Result<i64, SyncError>;

    /// Upload backlog of a kind (pending or failed rows), in insertion order.
    async fn pending(&self, kind: PendingKind) -> Result<Vec<PendingRecord>, SyncError>;

    async fn count_pending(&self, kind: PendingKind) -> Result<usize, SyncError>;

    /// Returns false if no row has `local_id`.
    async fn set_pending_state(&self, local_id: i64, state: &PendingState) -> Result<bool, SyncError>;

    /// Move a backlog row (pending or failed) to `Submitting`.
    /// Returns false if the row is gone or not in the backlog, in which case it must not be sent.
    async fn claim_pending(&self, local_id: i64) -> Result<bool, SyncError>;

    /// Returns the number of rows removed.
    async fn delete_pending(&self, local_id: i64) -> Result<usize, SyncError>;

    async fn delete_many_pending(&self, local_ids: &[i64]) -> Result<usize, SyncError>;

    /// Put rows stuck in `Submitting` back into the backlog.
    async fn recover_in_flight(&self) -> Result<usize, SyncError>;

    async fn voucher_lines(&self, voucher_id: i64) -> Result<Vec<VoucherLine>, SyncError>;

    /// Vouchers already accepted by the server.
    async fn voucher_history(&self) -> Result<Vec<PendingRecord>, SyncError>;

    /// Backlog rows of a kind that satisfy `predicate`.
    async fn pending_where(
        &self,
        kind: PendingKind,
        predicate: &(dyn for<'r> Fn(&'r PendingRecord) -> bool + Send + Sync),
    ) -> Result<Vec<PendingRecord>, SyncError> {
        let rows = self.pending(kind).await?;
        Ok(rows.into_iter().filter(|r| predicate(r)).collect())
    }
}
