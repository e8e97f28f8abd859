//! Progress channel between the engines and whoever renders their state.
//!
//! Engines push [`SyncStatus`] values into a [`ProgressSink`]. A consumer keeps a
//! [`StatusBoard`], which holds one entry per catalog name and replaces it on every update.

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::debug;

use crate::status::SyncStatus;

pub trait ProgressSink: Send + Sync {
    fn report(&self, status: &SyncStatus);
}

/// Discards every update.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _status: &SyncStatus) {}
}

impl ProgressSink for UnboundedSender<SyncStatus> {
    fn report(&self, status: &SyncStatus) {
        // A dropped receiver only means nobody is watching anymore.
        if self.send(status.clone()).is_err() {
            debug!(catalog = %status.catalog_name, "progress receiver dropped");
        }
    }
}

impl<F> ProgressSink for F
where
    F: Fn(&SyncStatus) + Send + Sync,
{
    fn report(&self, status: &SyncStatus) {
        self(status)
    }
}

/// Displayed catalog statuses, at most one per catalog name, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    entries: Vec<SyncStatus>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new catalog or replace the whole entry of a known one.
    pub fn apply(&mut self, status: SyncStatus) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.catalog_name == status.catalog_name)
        {
            Some(existing) => *existing = status,
            None => self.entries.push(status),
        }
    }

    /// Apply everything currently queued on `rx` without waiting.
    /// Returns how many updates were applied.
    pub fn drain(&mut self, rx: &mut UnboundedReceiver<SyncStatus>) -> usize {
        let mut applied = 0;
        loop {
            match rx.try_recv() {
                Ok(status) => {
                    self.apply(status);
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    /// Apply updates until every sender is gone.
    pub async fn follow(&mut self, mut rx: UnboundedReceiver<SyncStatus>) {
        while let Some(status) = rx.recv().await {
            self.apply(status);
        }
    }

    pub fn get(&self, catalog_name: &str) -> Option<&SyncStatus> {
        self.entries.iter().find(|e| e.catalog_name == catalog_name)
    }

    pub fn entries(&self) -> &[SyncStatus] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all_completed(&self) -> bool {
        self.entries.iter().all(|e| e.is_completed)
    }

    pub fn error_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_error()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[test]
    fn updates_replace_instead_of_duplicating() {
        let mut board = StatusBoard::new();
        board.apply(SyncStatus::starting("Empresas"));
        board.apply(SyncStatus::starting("Campos"));
        board.apply(SyncStatus::succeeded("Empresas", 4));

        assert_eq!(board.len(), 2);
        assert_eq!(board.entries()[0].catalog_name, "Empresas");
        assert!(board.get("Empresas").is_some_and(SyncStatus::is_success));
        assert!(!board.all_completed());
    }

    #[test]
    fn replace_is_full_not_merge() {
        let mut board = StatusBoard::new();
        board.apply(SyncStatus::saving("Lotes", 10));
        board.apply(SyncStatus::failed("Lotes", 50, "disk full"));
        let entry = board.get("Lotes").expect("entry");
        assert_eq!(entry.status, "Error: disk full");
        assert!(entry.is_completed);
        assert_eq!(board.error_count(), 1);
    }

    #[tokio::test]
    async fn channel_sink_feeds_board() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.report(&SyncStatus::starting("Ciclos"));
        tx.report(&SyncStatus::succeeded("Ciclos", 1));

        let mut board = StatusBoard::new();
        assert_eq!(board.drain(&mut rx), 2);
        assert_eq!(board.len(), 1);

        drop(tx);
        board.follow(rx).await;
        assert!(board.all_completed());
    }

    #[test]
    fn closure_sink_receives_updates() {
        let seen = Mutex::new(Vec::new());
        let sink = |s: &SyncStatus| seen.lock().unwrap().push(s.progress);
        sink.report(&SyncStatus::starting("Familias"));
        sink.report(&SyncStatus::succeeded("Familias", 2));
        assert_eq!(*seen.lock().unwrap(), vec![0, 100]);
    }
}
