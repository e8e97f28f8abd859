//! Catalog refresh.
//!
//! Every catalog is fetched and replaced on its own. A failing catalog keeps its previous
//! rows and never stops the catalogs after it.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::Utc;
use tracing::{info, warn};

use crate::busy::RunGuard;
use crate::catalog::CatalogKind;
use crate::error::SyncError;
use crate::gateway::RemoteGateway;
use crate::progress::ProgressSink;
use crate::session::Session;
use crate::status::{CatalogSyncReport, SyncResult, SyncStatus};
use crate::store::LocalStore;

pub struct CatalogSyncEngine<S, G> {
    store: Arc<S>,
    gateway: Arc<G>,
    catalogs: Vec<CatalogKind>,
    running: AtomicBool,
}

impl<S: LocalStore, G: RemoteGateway> CatalogSyncEngine<S, G> {
    /// Engine over every known catalog, in declared order.
    pub fn new(store: Arc<S>, gateway: Arc<G>) -> Self {
        Self::with_catalogs(store, gateway, CatalogKind::ALL.to_vec())
    }

    pub fn with_catalogs(store: Arc<S>, gateway: Arc<G>, catalogs: Vec<CatalogKind>) -> Self {
        Self {
            store,
            gateway,
            catalogs,
            running: AtomicBool::new(false),
        }
    }

    pub fn catalogs(&self) -> &[CatalogKind] {
        &self.catalogs
    }

    /// Refresh every catalog. Returns `Ok(None)` if a run is already in progress.
    pub async fn sync_all_catalogs(
        &self,
        session: &Session,
        sink: &dyn ProgressSink,
    ) -> Result<Option<CatalogSyncReport>, SyncError> {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            info!("catalog sync already running");
            return Ok(None);
        };
        Ok(Some(self.run(session, sink).await))
    }

    /// Forget per-catalog sync marks, then refresh every catalog.
    pub async fn force_full_resync(
        &self,
        session: &Session,
        sink: &dyn ProgressSink,
    ) -> Result<Option<CatalogSyncReport>, SyncError> {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            info!("catalog sync already running");
            return Ok(None);
        };
        self.store.clear_catalog_sync_marks().await?;
        Ok(Some(self.run(session, sink).await))
    }

    #[tracing::instrument(skip_all, fields(catalogs = self.catalogs.len()))]
    async fn run(&self, session: &Session, sink: &dyn ProgressSink) -> CatalogSyncReport {
        let mut report = CatalogSyncReport::default();
        for &kind in &self.catalogs {
            let (status, result) = self.sync_one(kind, session, sink).await;
            report.statuses.push(status);
            report.results.push(result);
        }
        info!(
            succeeded = report.succeeded(),
            total = report.statuses.len(),
            records = report.total_records(),
            "catalog sync finished"
        );
        report
    }

    async fn sync_one(
        &self,
        kind: CatalogKind,
        session: &Session,
        sink: &dyn ProgressSink,
    ) -> (SyncStatus, SyncResult) {
        let name = kind.display_name();
        sink.report(&SyncStatus::starting(name));

        let rows = match self.gateway.fetch_catalog(kind, session).await {
            Ok(rows) => rows,
            Err(e) => return self.fail(kind, 0, &e, sink),
        };

        sink.report(&SyncStatus::saving(name, rows.len()));
        let saved = match self.store.replace_catalog(kind, &rows).await {
            Ok(n) => n,
            Err(e) => return self.fail(kind, 50, &e, sink),
        };

        if let Err(e) = self.store.mark_catalog_synced(kind, Utc::now()).await {
            warn!(catalog = name, error = %e, "failed to record catalog sync time");
        }

        info!(catalog = name, records = saved, "catalog synced");
        let status = SyncStatus::succeeded(name, saved);
        sink.report(&status);
        let result = SyncResult::from_status(&status, saved);
        (status, result)
    }

    fn fail(
        &self,
        kind: CatalogKind,
        progress: u8,
        error: &SyncError,
        sink: &dyn ProgressSink,
    ) -> (SyncStatus, SyncResult) {
        warn!(catalog = kind.display_name(), %error, "catalog sync failed");
        let status = SyncStatus::failed(kind.display_name(), progress, &error.to_string());
        sink.report(&status);
        let result = SyncResult::from_status(&status, 0);
        (status, result)
    }
}
