//! Upload of records captured offline.
//!
//! Records go up one at a time in the order the store returns them. A record leaves the
//! backlog only after the server accepted that exact record; anything else keeps it queued
//! with the failure reason, and the loop moves on to the next one.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::{debug, info, warn};

use crate::busy::RunGuard;
use crate::error::SyncError;
use crate::gateway::RemoteGateway;
use crate::pending::{CommitPolicy, PendingKind, PendingRecord, PendingState, Submission};
use crate::session::Session;
use crate::status::{UploadFailure, UploadReport};
use crate::store::LocalStore;

const REJECTED_WITHOUT_MESSAGE: &str = "rejected by server";

/// What happened to one record.
enum Outcome {
    Accepted,
    /// Not in the backlog any more; nothing was sent.
    Gone,
    /// Kept in the backlog with this message.
    Failed(String),
}

pub struct PendingRecordUploader<S, G> {
    store: Arc<S>,
    gateway: Arc<G>,
    running: AtomicBool,
}

impl<S: LocalStore, G: RemoteGateway> PendingRecordUploader<S, G> {
    pub fn new(store: Arc<S>, gateway: Arc<G>) -> Self {
        Self {
            store,
            gateway,
            running: AtomicBool::new(false),
        }
    }

    /// Size of the backlog, used to decide whether to offer an upload at all.
    pub async fn load_pending_count(&self, kind: PendingKind) -> Result<usize, SyncError> {
        self.store.count_pending(kind).await
    }

    pub async fn load_pending(&self, kind: PendingKind) -> Result<Vec<PendingRecord>, SyncError> {
        self.store.pending(kind).await
    }

    /// Drain the stored backlog of `kind`. Returns `Ok(None)` if an upload is already running.
    pub async fn send_pending(
        &self,
        kind: PendingKind,
        session: &Session,
    ) -> Result<Option<UploadReport>, SyncError> {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            info!(kind = kind.slug(), "upload already running");
            return Ok(None);
        };
        self.requeue_in_flight().await?;
        Ok(Some(self.drain_kind(kind, session).await?))
    }

    /// Drain every kind in `kinds`, one report per kind, under a single run.
    /// A kind whose backlog cannot be read gets a report carrying the error; the rest still run.
    pub async fn send_every_kind(
        &self,
        kinds: &[PendingKind],
        session: &Session,
    ) -> Result<Option<Vec<UploadReport>>, SyncError> {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            info!("upload already running");
            return Ok(None);
        };
        self.requeue_in_flight().await?;
        let mut reports = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let report = match self.drain_kind(kind, session).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(kind = kind.slug(), error = %e, "could not read backlog");
                    UploadReport::unreadable(kind, e.to_string())
                }
            };
            reports.push(report);
        }
        Ok(Some(reports))
    }

    /// Submit `items` one by one. Items that already left the backlog are skipped.
    /// Returns `Ok(None)` if an upload is already running.
    pub async fn send_all(
        &self,
        kind: PendingKind,
        items: &[PendingRecord],
        session: &Session,
    ) -> Result<Option<UploadReport>, SyncError> {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            info!(kind = kind.slug(), "upload already running");
            return Ok(None);
        };
        check_kind(kind, items)?;
        if !items.is_empty() {
            self.requeue_in_flight().await?;
        }
        Ok(Some(self.send_items(kind, items, session).await?))
    }

    /// Submit `items` with a single batch call; they are committed or kept together.
    pub async fn send_all_batched(
        &self,
        kind: PendingKind,
        items: &[PendingRecord],
        session: &Session,
    ) -> Result<Option<UploadReport>, SyncError> {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            info!(kind = kind.slug(), "upload already running");
            return Ok(None);
        };
        check_kind(kind, items)?;
        let mut report = UploadReport::new(kind);
        if items.is_empty() {
            debug!(kind = kind.slug(), "nothing to send");
            return Ok(Some(report));
        }
        self.requeue_in_flight().await?;

        // Everything is read before any row is claimed, so a read error leaves no row in flight.
        let mut composed = Vec::with_capacity(items.len());
        for item in items.iter().filter(|i| i.state.is_retryable()) {
            composed.push((item, self.compose(item).await?));
        }

        let mut claimed = Vec::with_capacity(composed.len());
        let mut submissions = Vec::with_capacity(composed.len());
        for (item, submission) in composed {
            match self.store.claim_pending(item.local_id).await {
                Ok(true) => {
                    claimed.push(item);
                    submissions.push(submission);
                }
                Ok(false) => debug!(local_id = item.local_id, "not in backlog, skipped"),
                Err(e) => {
                    let message = e.to_string();
                    for item in &claimed {
                        self.mark_failed(item.local_id, &message).await;
                    }
                    return Err(e);
                }
            }
        }
        if claimed.is_empty() {
            debug!(kind = kind.slug(), "nothing to send");
            return Ok(Some(report));
        }
        report.attempted = claimed.len();

        let message = match self.gateway.submit_batch(kind, &submissions, session).await {
            Ok(res) if res.success => None,
            Ok(res) => Some(rejection_message(res.message)),
            Err(e) => Some(e.to_string()),
        };

        match message {
            None => {
                for item in claimed {
                    match self.commit(item).await {
                        Ok(()) => report.success_count += 1,
                        Err(e) => report.failures.push(self.local_failure(item, &e)),
                    }
                }
            }
            Some(message) => {
                warn!(kind = kind.slug(), %message, "batch upload failed");
                for item in claimed {
                    self.mark_failed(item.local_id, &message).await;
                    report.failures.push(UploadFailure {
                        local_id: item.local_id,
                        message: message.clone(),
                    });
                }
            }
        }
        Ok(Some(report))
    }

    async fn requeue_in_flight(&self) -> Result<(), SyncError> {
        let recovered = self.store.recover_in_flight().await?;
        if recovered > 0 {
            warn!(recovered, "requeued records left in flight by an interrupted run");
        }
        Ok(())
    }

    async fn drain_kind(&self, kind: PendingKind, session: &Session) -> Result<UploadReport, SyncError> {
        let items = self.store.pending(kind).await?;
        self.send_items(kind, &items, session).await
    }

    #[tracing::instrument(skip(self, items, session), fields(items = items.len()))]
    async fn send_items(
        &self,
        kind: PendingKind,
        items: &[PendingRecord],
        session: &Session,
    ) -> Result<UploadReport, SyncError> {
        check_kind(kind, items)?;
        let mut report = UploadReport::new(kind);
        if items.is_empty() {
            debug!("nothing to send");
            return Ok(report);
        }

        for item in items {
            match self.send_one(item, session).await {
                Outcome::Accepted => {
                    report.attempted += 1;
                    report.success_count += 1;
                }
                Outcome::Failed(message) => {
                    report.attempted += 1;
                    report.failures.push(UploadFailure {
                        local_id: item.local_id,
                        message,
                    });
                }
                Outcome::Gone => debug!(local_id = item.local_id, "not in backlog, skipped"),
            }
        }

        info!(
            sent = report.success_count,
            failed = report.failures.len(),
            "upload finished"
        );
        Ok(report)
    }

    /// Submit and commit a single record.
    async fn send_one(&self, item: &PendingRecord, session: &Session) -> Outcome {
        if !item.state.is_retryable() {
            return Outcome::Gone;
        }
        match self.store.claim_pending(item.local_id).await {
            Ok(true) => {}
            Ok(false) => return Outcome::Gone,
            Err(e) => {
                warn!(local_id = item.local_id, error = %e, "could not mark record in flight");
                return Outcome::Failed(e.to_string());
            }
        }

        // Detail lines are read per record, right before its own submission.
        let submission = match self.compose(item).await {
            Ok(s) => s,
            Err(e) => {
                let message = e.to_string();
                self.mark_failed(item.local_id, &message).await;
                return Outcome::Failed(message);
            }
        };

        let message = match self.gateway.submit(&submission, session).await {
            Ok(res) if res.success => {
                return match self.commit(item).await {
                    Ok(()) => Outcome::Accepted,
                    Err(e) => Outcome::Failed(self.local_failure(item, &e).message),
                };
            }
            Ok(res) => rejection_message(res.message),
            Err(e) => e.to_string(),
        };

        warn!(local_id = item.local_id, %message, "record not accepted");
        self.mark_failed(item.local_id, &message).await;
        Outcome::Failed(message)
    }

    async fn compose(&self, item: &PendingRecord) -> Result<Submission, SyncError> {
        let lines = if item.kind.has_detail_lines() {
            Some(self.store.voucher_lines(item.local_id).await?)
        } else {
            None
        };
        Ok(Submission::from_record(item, lines))
    }

    async fn commit(&self, item: &PendingRecord) -> Result<(), SyncError> {
        let cleared = match item.kind.commit_policy() {
            CommitPolicy::Delete => self.store.delete_pending(item.local_id).await? == 1,
            CommitPolicy::MarkSynced => {
                self.store
                    .set_pending_state(item.local_id, &PendingState::Synced)
                    .await?
            }
        };
        if !cleared {
            return Err(SyncError::State("record left the store while in flight"));
        }
        debug!(local_id = item.local_id, "record accepted");
        Ok(())
    }

    async fn mark_failed(&self, local_id: i64, message: &str) {
        let state = PendingState::Failed(message.to_string());
        if let Err(e) = self.store.set_pending_state(local_id, &state).await {
            warn!(local_id, error = %e, "could not record failure state");
        }
    }

    /// Accepted remotely, but the local row could not be cleared.
    fn local_failure(&self, item: &PendingRecord, error: &SyncError) -> UploadFailure {
        warn!(local_id = item.local_id, %error, "accepted record could not be cleared locally");
        UploadFailure {
            local_id: item.local_id,
            message: format!("sent, but not cleared locally: {error}"),
        }
    }
}

fn check_kind(kind: PendingKind, items: &[PendingRecord]) -> Result<(), SyncError> {
    if items.iter().any(|i| i.kind != kind) {
        return Err(SyncError::State("records of another kind in upload"));
    }
    Ok(())
}

fn rejection_message(message: String) -> String {
    if message.trim().is_empty() {
        REJECTED_WITHOUT_MESSAGE.to_string()
    } else {
        message
    }
}
