use std::sync::Arc;

use tracing::info;

use crate::catalog::CatalogKind;
use crate::config::Config;
use crate::engine::CatalogSyncEngine;
use crate::error::SyncError;
use crate::gateway::RemoteGateway;
use crate::http::HttpGateway;
use crate::pending::PendingKind;
use crate::progress::ProgressSink;
use crate::session::{SessionProvider, require_session};
use crate::sqlite::SqliteStore;
use crate::status::{CatalogSyncReport, UploadReport};
use crate::store::LocalStore;
use crate::uploader::PendingRecordUploader;

/// Entry point for the host: both engines over one store, gated on a live session.
pub struct SyncClient<S, G, P> {
    store: Arc<S>,
    sessions: Arc<P>,
    catalogs: CatalogSyncEngine<S, G>,
    uploader: PendingRecordUploader<S, G>,
}

impl SyncClient<SqliteStore, HttpGateway, SqliteStore> {
    /// Open the on-device database and the HTTP gateway described by `config`.
    /// The session is read from the same database.
    pub fn open(config: &Config) -> Result<Self, SyncError> {
        config.validate()?;
        let store = Arc::new(SqliteStore::open(&config.database_path)?);
        let gateway = Arc::new(HttpGateway::new(config.gateway.clone())?);
        info!(db = %config.database_path.display(), base_url = %config.gateway.base_url, "sync client opened");
        Ok(Self::new(Arc::clone(&store), gateway, store))
    }
}

impl<S: LocalStore, G: RemoteGateway, P: SessionProvider> SyncClient<S, G, P> {
    pub fn new(store: Arc<S>, gateway: Arc<G>, sessions: Arc<P>) -> Self {
        Self::with_catalogs(store, gateway, sessions, CatalogKind::ALL.to_vec())
    }

    pub fn with_catalogs(
        store: Arc<S>,
        gateway: Arc<G>,
        sessions: Arc<P>,
        catalogs: Vec<CatalogKind>,
    ) -> Self {
        Self {
            catalogs: CatalogSyncEngine::with_catalogs(
                Arc::clone(&store),
                Arc::clone(&gateway),
                catalogs,
            ),
            uploader: PendingRecordUploader::new(Arc::clone(&store), gateway),
            store,
            sessions,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn catalog_engine(&self) -> &CatalogSyncEngine<S, G> {
        &self.catalogs
    }

    pub fn uploader(&self) -> &PendingRecordUploader<S, G> {
        &self.uploader
    }

    /// Refresh all catalogs. `Ok(None)` means a refresh was already running.
    pub async fn sync_catalogs(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<Option<CatalogSyncReport>, SyncError> {
        let session = require_session(&*self.sessions)?;
        self.catalogs.sync_all_catalogs(&session, sink).await
    }

    pub async fn force_full_resync(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<Option<CatalogSyncReport>, SyncError> {
        let session = require_session(&*self.sessions)?;
        self.catalogs.force_full_resync(&session, sink).await
    }

    /// Backlog size of every record kind, in declared order.
    pub async fn pending_counts(&self) -> Result<Vec<(PendingKind, usize)>, SyncError> {
        let mut counts = Vec::with_capacity(PendingKind::ALL.len());
        for kind in PendingKind::ALL {
            counts.push((kind, self.uploader.load_pending_count(kind).await?));
        }
        Ok(counts)
    }

    pub async fn has_pending(&self) -> Result<bool, SyncError> {
        Ok(self.pending_counts().await?.iter().any(|(_, n)| *n > 0))
    }

    pub async fn upload_kind(&self, kind: PendingKind) -> Result<Option<UploadReport>, SyncError> {
        let session = require_session(&*self.sessions)?;
        self.uploader.send_pending(kind, &session).await
    }

    /// Upload the backlog of every kind, one report per kind.
    pub async fn upload_all_pending(&self) -> Result<Option<Vec<UploadReport>>, SyncError> {
        let session = require_session(&*self.sessions)?;
        self.uploader
            .send_every_kind(&PendingKind::ALL, &session)
            .await
    }
}
