use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::catalog::{CatalogKind, CatalogRow};
use crate::error::SyncError;
use crate::pending::{NewPendingRecord, PendingKind, PendingRecord, PendingState, VoucherLine};
use crate::session::{Session, SessionProvider};
use crate::store::LocalStore;

pub const SCHEMA_VERSION: i32 = 2;

/// Upgrade steps applied on top of the base schema, in order. Each entry is the version it
/// brings the database to.
const MIGRATIONS: &[(i32, &str)] = &[(
    2,
    "CREATE INDEX IF NOT EXISTS idx_pending_records_state ON pending_records(state);",
)];

const SESSION_KEY: &str = "session";
const SCHEMA_VERSION_KEY: &str = "schema_version";
const CATALOG_MARK_PREFIX: &str = "catalog_synced:";

const PENDING_COLUMNS: &str = "local_id, kind, inspector_id, field_id, season_id, latitude, longitude, captured_at, payload, state, failure_reason";

/// SQLite-backed [`LocalStore`].
///
/// The connection sits behind a mutex so one store can be shared by both engines.
/// Async calls run their statements on the blocking pool; the lock is held for a single
/// statement or transaction.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection and make sure the schema exists.
    pub fn from_connection(conn: Connection) -> Result<Self, SyncError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create tables and indexes, then migrate to [`SCHEMA_VERSION`]. Safe to call multiple times.
    pub fn init_schema(&self) -> Result<(), SyncError> {
        {
            let conn = self.lock()?;
            // In-memory databases answer "memory"; either answer is fine.
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
            conn.pragma_update(None, "foreign_keys", true)?;
            debug!(journal_mode = %mode, "initializing local store schema");
            conn.execute_batch(
                r#"
CREATE TABLE IF NOT EXISTS catalog_rows (
catalog TEXT NOT NULL,
row_id TEXT NOT NULL,
position INTEGER NOT NULL,
data TEXT NOT NULL, -- JSON object as sent by the server
PRIMARY KEY(catalog, row_id)
);

CREATE INDEX IF NOT EXISTS idx_catalog_rows_position
ON catalog_rows(catalog, position);

CREATE TABLE IF NOT EXISTS pending_records (
local_id INTEGER PRIMARY KEY AUTOINCREMENT,
kind TEXT NOT NULL,
inspector_id INTEGER,
field_id INTEGER,
season_id INTEGER,
latitude REAL,
longitude REAL,
captured_at TEXT NOT NULL,
payload TEXT NOT NULL, -- JSON
state TEXT NOT NULL DEFAULT 'pending' CHECK(state IN ('pending','submitting','failed','synced')),
failure_reason TEXT
);

CREATE INDEX IF NOT EXISTS idx_pending_records_kind_state
ON pending_records(kind, state, local_id);

CREATE TABLE IF NOT EXISTS voucher_lines (
line_id INTEGER PRIMARY KEY AUTOINCREMENT,
voucher_id INTEGER NOT NULL REFERENCES pending_records(local_id) ON DELETE CASCADE,
article_id INTEGER NOT NULL,
quantity REAL NOT NULL,
unit TEXT,
notes TEXT
);

CREATE INDEX IF NOT EXISTS idx_voucher_lines_voucher
ON voucher_lines(voucher_id, line_id);

CREATE TABLE IF NOT EXISTS sync_kv (
k TEXT PRIMARY KEY,
v TEXT NOT NULL
);
"#,
            )?;
            // A fresh database starts at the base schema; the steps below bring it up to date.
            conn.execute(
                "INSERT INTO sync_kv(k,v) VALUES(?1,'1')
ON CONFLICT(k) DO NOTHING",
                params![SCHEMA_VERSION_KEY],
            )?;
        }
        self.run_migrations(SCHEMA_VERSION)
    }

    /// Return the integer schema version stored in `sync_kv`.
    pub fn schema_version(&self) -> Result<i32, SyncError> {
        self.with_conn(stored_version)
    }

    /// Apply every migration step up to `target_version` in one transaction.
    /// A database already at or past the target is left alone.
    pub fn run_migrations(&self, target_version: i32) -> Result<(), SyncError> {
        if !(1..=SCHEMA_VERSION).contains(&target_version) {
            return Err(SyncError::State("invalid target_version"));
        }
        self.with_tx(|tx| {
            let current = stored_version(tx)?;
            if current >= target_version {
                return Ok(());
            }
            for (version, sql) in MIGRATIONS {
                if *version > current && *version <= target_version {
                    tx.execute_batch(sql)?;
                }
            }
            kv_set(tx, SCHEMA_VERSION_KEY, &target_version.to_string())?;
            info!(from = current, to = target_version, "local store migrated");
            Ok(())
        })
    }

    /// Run `f` with the connection held, on the calling thread.
    pub fn with_conn<R, F>(&self, f: F) -> Result<R, SyncError>
    where
        F: FnOnce(&Connection) -> Result<R, SyncError>,
    {
        let conn = self.lock()?;
        f(&*conn)
    }

    /// Execute closure `f` inside a transaction and commit if `f` returns Ok.
    pub fn with_tx<R, F>(&self, f: F) -> Result<R, SyncError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, SyncError>,
    {
        let conn = self.lock()?;
        in_tx(&conn, f)
    }

    pub fn save_session(&self, session: &Session) -> Result<(), SyncError> {
        let raw = serde_json::to_string(session)?;
        self.with_conn(|c| kv_set(c, SESSION_KEY, &raw))
    }

    pub fn clear_session(&self) -> Result<(), SyncError> {
        self.with_conn(|c| kv_delete(c, SESSION_KEY).map(|_| ()))
    }

    /// Run `f` on the blocking pool with the connection held.
    async fn blocking<R, F>(&self, f: F) -> Result<R, SyncError>
    where
        F: FnOnce(&Connection) -> Result<R, SyncError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        spawn_blocking(move || {
            let conn = lock(&conn)?;
            f(&*conn)
        })
        .await?
    }

    /// Like [`Self::blocking`], inside a transaction.
    async fn blocking_tx<R, F>(&self, f: F) -> Result<R, SyncError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, SyncError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        spawn_blocking(move || {
            let conn = lock(&conn)?;
            in_tx(&conn, f)
        })
        .await?
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
        lock(&self.conn)
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, SyncError> {
    conn.lock()
        .map_err(|_| SyncError::State("local store lock poisoned"))
}

fn in_tx<R, F>(conn: &Connection, f: F) -> Result<R, SyncError>
where
    F: FnOnce(&Transaction<'_>) -> Result<R, SyncError>,
{
    let tx = conn.unchecked_transaction()?;
    let result = f(&tx)?;
    tx.commit()?;
    Ok(result)
}

impl SessionProvider for SqliteStore {
    fn current_session(&self) -> Result<Option<Session>, SyncError> {
        let raw = self.with_conn(|c| kv_get(c, SESSION_KEY))?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn catalog_rows(&self, kind: CatalogKind) -> Result<Vec<CatalogRow>, SyncError> {
        self.blocking(move |c| load_catalog(c, kind)).await
    }

    async fn catalog_count(&self, kind: CatalogKind) -> Result<usize, SyncError> {
        self.blocking(move |c| count_catalog(c, kind)).await
    }

    async fn replace_catalog(
        &self,
        kind: CatalogKind,
        rows: &[CatalogRow],
    ) -> Result<usize, SyncError> {
        let rows = rows.to_vec();
        self.blocking_tx(move |tx| {
            tx.execute(
                "DELETE FROM catalog_rows WHERE catalog=?1",
                params![kind.slug()],
            )?;
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO catalog_rows(catalog, row_id, position, data)
VALUES (?1,?2,?3,?4)",
            )?;
            for (position, row) in rows.iter().enumerate() {
                stmt.execute(params![
                    kind.slug(),
                    row.id,
                    position as i64,
                    row.data.to_string()
                ])?;
            }
            let stored = count_catalog(tx, kind)?;
            if stored != rows.len() {
                debug!(
                    catalog = kind.slug(),
                    fetched = rows.len(),
                    stored,
                    "duplicate row ids collapsed"
                );
            }
            Ok(stored)
        })
        .await
    }

    async fn clear_catalog(&self, kind: CatalogKind) -> Result<usize, SyncError> {
        self.blocking(move |c| {
            Ok(c.execute(
                "DELETE FROM catalog_rows WHERE catalog=?1",
                params![kind.slug()],
            )?)
        })
        .await
    }

    async fn mark_catalog_synced(
        &self,
        kind: CatalogKind,
        at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let key = format!("{CATALOG_MARK_PREFIX}{}", kind.slug());
        self.blocking(move |c| kv_set(c, &key, &at.to_rfc3339()))
            .await
    }

    async fn last_synced_at(&self, kind: CatalogKind) -> Result<Option<DateTime<Utc>>, SyncError> {
        let key = format!("{CATALOG_MARK_PREFIX}{}", kind.slug());
        let raw = self.blocking(move |c| kv_get(c, &key)).await?;
        Ok(raw
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    async fn clear_catalog_sync_marks(&self) -> Result<(), SyncError> {
        let pattern = format!("{CATALOG_MARK_PREFIX}%");
        self.blocking(move |c| {
            c.execute("DELETE FROM sync_kv WHERE k LIKE ?1", params![pattern])?;
            Ok(())
        })
        .await
    }

    async fn save_pending(&self, record: &NewPendingRecord) -> Result<i64, SyncError> {
        let record = record.clone();
        self.blocking(move |c| insert_pending(c, &record)).await
    }

    async fn save_voucher(
        &self,
        header: &NewPendingRecord,
        lines: &[VoucherLine],
    ) -> Result<i64, SyncError> {
        let header = header.clone();
        let lines = lines.to_vec();
        self.blocking_tx(move |tx| insert_voucher(tx, &header, &lines))
            .await
    }

    async fn pending(&self, kind: PendingKind) -> Result<Vec<PendingRecord>, SyncError> {
        self.blocking(move |c| load_pending(c, kind)).await
    }

    async fn count_pending(&self, kind: PendingKind) -> Result<usize, SyncError> {
        self.blocking(move |c| count_pending(c, kind)).await
    }

    async fn set_pending_state(&self, local_id: i64, state: &PendingState) -> Result<bool, SyncError> {
        let state = state.clone();
        self.blocking(move |c| {
            let changed = c.execute(
                "UPDATE pending_records SET state=?1, failure_reason=?2 WHERE local_id=?3",
                params![state.as_str(), state.reason(), local_id],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn claim_pending(&self, local_id: i64) -> Result<bool, SyncError> {
        self.blocking(move |c| {
            let claimed = c.execute(
                "UPDATE pending_records SET state='submitting', failure_reason=NULL
WHERE local_id=?1 AND state IN ('pending','failed')",
                params![local_id],
            )?;
            Ok(claimed == 1)
        })
        .await
    }

    async fn delete_pending(&self, local_id: i64) -> Result<usize, SyncError> {
        self.blocking(move |c| {
            Ok(c.execute(
                "DELETE FROM pending_records WHERE local_id=?1",
                params![local_id],
            )?)
        })
        .await
    }

    async fn delete_many_pending(&self, local_ids: &[i64]) -> Result<usize, SyncError> {
        let local_ids = local_ids.to_vec();
        self.blocking_tx(move |tx| {
            let mut removed = 0;
            for id in &local_ids {
                removed += tx.execute(
                    "DELETE FROM pending_records WHERE local_id=?1",
                    params![id],
                )?;
            }
            Ok(removed)
        })
        .await
    }

    async fn recover_in_flight(&self) -> Result<usize, SyncError> {
        self.blocking(|c| {
            Ok(c.execute(
                "UPDATE pending_records SET state='pending', failure_reason=NULL
WHERE state='submitting'",
                [],
            )?)
        })
        .await
    }

    async fn voucher_lines(&self, voucher_id: i64) -> Result<Vec<VoucherLine>, SyncError> {
        self.blocking(move |c| {
            let mut stmt = c.prepare(
                "SELECT article_id, quantity, unit, notes FROM voucher_lines
WHERE voucher_id=?1 ORDER BY line_id ASC",
            )?;
            let rows = stmt.query_map(params![voucher_id], |r| {
                Ok(VoucherLine {
                    article_id: r.get(0)?,
                    quantity: r.get(1)?,
                    unit: r.get(2)?,
                    notes: r.get(3)?,
                })
            })?;
            let mut out = Vec::new();
            for line in rows {
                out.push(line?);
            }
            Ok(out)
        })
        .await
    }

    async fn voucher_history(&self) -> Result<Vec<PendingRecord>, SyncError> {
        self.blocking(|c| {
            query_pending(
                c,
                &format!(
                    "SELECT {PENDING_COLUMNS} FROM pending_records
WHERE kind=?1 AND state='synced' ORDER BY local_id ASC"
                ),
                PendingKind::Voucher,
            )
        })
        .await
    }
}
pub(crate) fn insert_pending(c: &Connection, record: &NewPendingRecord) -> Result<i64, SyncError> {
    c.execute(
        "INSERT INTO pending_records
(kind, inspector_id, field_id, season_id, latitude, longitude, captured_at, payload, state)
VALUES (?1,?2,?3,?4,?5,?6,?7,?8,'pending')",
        params![
            record.kind.slug(),
            record.inspector_id,
            record.field_id,
            record.season_id,
            record.latitude,
            record.longitude,
            record.captured_at.to_rfc3339(),
            record.payload.to_string(),
        ],
    )?;
    Ok(c.last_insert_rowid())
}

/// Insert a voucher header and its lines. Call inside a transaction.
pub(crate) fn insert_voucher(
    c: &Connection,
    header: &NewPendingRecord,
    lines: &[VoucherLine],
) -> Result<i64, SyncError> {
    if header.kind != PendingKind::Voucher {
        return Err(SyncError::State("save_voucher needs a voucher header"));
    }
    let id = insert_pending(c, header)?;
    let mut stmt = c.prepare(
        "INSERT INTO voucher_lines(voucher_id, article_id, quantity, unit, notes)
VALUES (?1,?2,?3,?4,?5)",
    )?;
    for line in lines {
        stmt.execute(params![
            id,
            line.article_id,
            line.quantity,
            line.unit,
            line.notes
        ])?;
    }
    Ok(id)
}

pub(crate) fn load_pending(c: &Connection, kind: PendingKind) -> Result<Vec<PendingRecord>, SyncError> {
    query_pending(
        c,
        &format!(
            "SELECT {PENDING_COLUMNS} FROM pending_records
WHERE kind=?1 AND state IN ('pending','failed') ORDER BY local_id ASC"
        ),
        kind,
    )
}

pub(crate) fn count_pending(c: &Connection, kind: PendingKind) -> Result<usize, SyncError> {
    let n: i64 = c.query_row(
        "SELECT COUNT(*) FROM pending_records WHERE kind=?1 AND state IN ('pending','failed')",
        params![kind.slug()],
        |r| r.get(0),
    )?;
    Ok(n as usize)
}

fn count_catalog(c: &Connection, kind: CatalogKind) -> Result<usize, SyncError> {
    let n: i64 = c.query_row(
        "SELECT COUNT(*) FROM catalog_rows WHERE catalog=?1",
        params![kind.slug()],
        |r| r.get(0),
    )?;
    Ok(n as usize)
}

pub(crate) fn load_catalog(c: &Connection, kind: CatalogKind) -> Result<Vec<CatalogRow>, SyncError> {
    let mut stmt = c.prepare(
        "SELECT row_id, data FROM catalog_rows WHERE catalog=?1 ORDER BY position ASC",
    )?;
    let rows = stmt.query_map(params![kind.slug()], |r| {
        Ok(CatalogRow {
            id: r.get(0)?,
            data: json_col(r, 1)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn query_pending(c: &Connection, sql: &str, kind: PendingKind) -> Result<Vec<PendingRecord>, SyncError> {
    let mut stmt = c.prepare(sql)?;
    let rows = stmt.query_map(params![kind.slug()], pending_from_row)?;
    let mut out = Vec::new();
    for rec in rows {
        out.push(rec?);
    }
    Ok(out)
}

fn pending_from_row(r: &Row<'_>) -> rusqlite::Result<PendingRecord> {
    let kind_str: String = r.get(1)?;
    let kind = PendingKind::from_slug(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown record kind `{kind_str}`").into(),
        )
    })?;
    let captured_raw: String = r.get(7)?;
    let captured_at = DateTime::parse_from_rfc3339(&captured_raw)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);
    let state_str: String = r.get(9)?;

    Ok(PendingRecord {
        local_id: r.get(0)?,
        kind,
        inspector_id: r.get(2)?,
        field_id: r.get(3)?,
        season_id: r.get(4)?,
        latitude: r.get(5)?,
        longitude: r.get(6)?,
        captured_at,
        payload: json_col(r, 8)?,
        state: PendingState::from_columns(&state_str, r.get(10)?),
    })
}

fn json_col(r: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = r.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn stored_version(c: &Connection) -> Result<i32, SyncError> {
    Ok(kv_get(c, SCHEMA_VERSION_KEY)?
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or(1))
}

fn kv_get(c: &Connection, key: &str) -> Result<Option<String>, SyncError> {
    Ok(c
        .query_row("SELECT v FROM sync_kv WHERE k=?1", params![key], |r| r.get(0))
        .optional()?)
}

fn kv_set(c: &Connection, key: &str, value: &str) -> Result<(), SyncError> {
    c.execute(
        "INSERT INTO sync_kv(k,v) VALUES(?1,?2)
ON CONFLICT(k) DO UPDATE SET v=excluded.v",
        params![key, value],
    )?;
    Ok(())
}

fn kv_delete(c: &Connection, key: &str) -> Result<usize, SyncError> {
    Ok(c.execute("DELETE FROM sync_kv WHERE k=?1", params![key])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn trap(n: i64) -> NewPendingRecord {
        NewPendingRecord::new(PendingKind::RatTrap, json!({"trap": n, "captures": n * 2}))
            .with_refs(1, 10, 2025)
    }

    #[test]
    fn schema_init_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    }

    fn has_index(store: &SqliteStore, name: &str) -> bool {
        store
            .with_conn(|c| {
                let n: i64 = c.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name=?1",
                    params![name],
                    |r| r.get(0),
                )?;
                Ok(n == 1)
            })
            .unwrap()
    }

    #[test]
    fn version_one_database_is_migrated() {
        let store = SqliteStore::open_in_memory().unwrap();
        // Put the database back to how the first release left it.
        store
            .with_conn(|c| {
                c.execute_batch("DROP INDEX idx_pending_records_state;")?;
                kv_set(c, SCHEMA_VERSION_KEY, "1")
            })
            .unwrap();
        assert_eq!(store.schema_version().unwrap(), 1);
        assert!(!has_index(&store, "idx_pending_records_state"));

        store.init_schema().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
        assert!(has_index(&store, "idx_pending_records_state"));
    }

    #[test]
    fn migrations_never_go_backwards() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.run_migrations(1).unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);

        let err = store.run_migrations(0).unwrap_err();
        assert!(matches!(err, SyncError::State(_)));
        let err = store.run_migrations(SCHEMA_VERSION + 1).unwrap_err();
        assert!(matches!(err, SyncError::State(_)));
    }

    #[tokio::test]
    async fn claim_only_takes_backlog_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.save_pending(&trap(1)).await.unwrap();
        let b = store.save_pending(&trap(2)).await.unwrap();
        store
            .set_pending_state(b, &PendingState::Failed("timeout".into()))
            .await
            .unwrap();

        assert!(store.claim_pending(a).await.unwrap());
        // Already in flight.
        assert!(!store.claim_pending(a).await.unwrap());
        assert!(store.claim_pending(b).await.unwrap());

        store.delete_pending(a).await.unwrap();
        assert!(!store.claim_pending(a).await.unwrap());
        assert!(!store.set_pending_state(a, &PendingState::Pending).await.unwrap());

        let voucher = store
            .save_voucher(&NewPendingRecord::new(PendingKind::Voucher, json!({})), &[])
            .await
            .unwrap();
        store.set_pending_state(voucher, &PendingState::Synced).await.unwrap();
        assert!(!store.claim_pending(voucher).await.unwrap());
    }

    #[tokio::test]
    async fn replace_catalog_counts_stored_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rows = vec![
            CatalogRow::new("1", json!({"Id": 1, "Nombre": "viejo"})),
            CatalogRow::new("1", json!({"Id": 1, "Nombre": "nuevo"})),
            CatalogRow::new("2", json!({"Id": 2})),
        ];
        let stored = store.replace_catalog(CatalogKind::Familias, &rows).await.unwrap();
        assert_eq!(stored, 2);
        assert_eq!(store.catalog_count(CatalogKind::Familias).await.unwrap(), 2);
        let kept = store.catalog_rows(CatalogKind::Familias).await.unwrap();
        assert_eq!(kept[0].data["Nombre"], json!("nuevo"));
    }

    #[tokio::test]
    async fn pending_round_trip_keeps_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.save_pending(&trap(1)).await.unwrap();
        let b = store.save_pending(&trap(2)).await.unwrap();
        store
            .save_pending(&NewPendingRecord::new(PendingKind::Rainfall, json!({"mm": 3})))
            .await
            .unwrap();

        let rows = store.pending(PendingKind::RatTrap).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.local_id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(rows[0].payload["trap"], json!(1));
        assert_eq!(rows[0].field_id, Some(10));
        assert_eq!(store.count_pending(PendingKind::RatTrap).await.unwrap(), 2);
        assert_eq!(store.count_pending(PendingKind::Rainfall).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn states_control_backlog_membership() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.save_pending(&trap(1)).await.unwrap();
        let b = store.save_pending(&trap(2)).await.unwrap();

        store
            .set_pending_state(a, &PendingState::Failed("timeout".into()))
            .await
            .unwrap();
        store.set_pending_state(b, &PendingState::Submitting).await.unwrap();

        let rows = store.pending(PendingKind::RatTrap).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, PendingState::Failed("timeout".into()));

        assert_eq!(store.recover_in_flight().await.unwrap(), 1);
        assert_eq!(store.count_pending(PendingKind::RatTrap).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn pending_where_filters_backlog() {
        let store = SqliteStore::open_in_memory().unwrap();
        for n in 1..=4 {
            store.save_pending(&trap(n)).await.unwrap();
        }
        let even = store
            .pending_where(PendingKind::RatTrap, &|r: &PendingRecord| {
                r.payload["trap"].as_i64().is_some_and(|n| n % 2 == 0)
            })
            .await
            .unwrap();
        assert_eq!(even.len(), 2);
    }

    #[tokio::test]
    async fn delete_reports_rows_affected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.save_pending(&trap(1)).await.unwrap();
        let b = store.save_pending(&trap(2)).await.unwrap();
        let c = store.save_pending(&trap(3)).await.unwrap();
        assert_eq!(store.delete_pending(a).await.unwrap(), 1);
        assert_eq!(store.delete_pending(a).await.unwrap(), 0);
        assert_eq!(store.delete_many_pending(&[b, c, 999]).await.unwrap(), 2);
        assert_eq!(store.count_pending(PendingKind::RatTrap).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replace_catalog_swaps_generation() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = vec![
            CatalogRow::new("1", json!({"Id": 1, "Nombre": "Norte"})),
            CatalogRow::new("2", json!({"Id": 2, "Nombre": "Sur"})),
        ];
        store.replace_catalog(CatalogKind::Campos, &first).await.unwrap();
        assert_eq!(store.catalog_rows(CatalogKind::Campos).await.unwrap(), first);

        let second = vec![CatalogRow::new("3", json!({"Id": 3}))];
        store.replace_catalog(CatalogKind::Campos, &second).await.unwrap();
        assert_eq!(store.catalog_rows(CatalogKind::Campos).await.unwrap(), second);
        assert_eq!(store.catalog_count(CatalogKind::Lotes).await.unwrap(), 0);

        assert_eq!(store.clear_catalog(CatalogKind::Campos).await.unwrap(), 1);
        assert_eq!(store.catalog_count(CatalogKind::Campos).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn voucher_lines_follow_header() {
        let store = SqliteStore::open_in_memory().unwrap();
        let header = NewPendingRecord::new(PendingKind::Voucher, json!({"folio": "S-1"}));
        let lines = vec![
            VoucherLine {
                article_id: 40,
                quantity: 2.0,
                unit: Some("kg".into()),
                notes: None,
            },
            VoucherLine {
                article_id: 41,
                quantity: 1.5,
                unit: None,
                notes: Some("bodega 2".into()),
            },
        ];
        let id = store.save_voucher(&header, &lines).await.unwrap();
        assert_eq!(store.voucher_lines(id).await.unwrap(), lines);

        store.set_pending_state(id, &PendingState::Synced).await.unwrap();
        assert_eq!(store.count_pending(PendingKind::Voucher).await.unwrap(), 0);
        assert_eq!(store.voucher_history().await.unwrap().len(), 1);

        store.delete_pending(id).await.unwrap();
        assert!(store.voucher_lines(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_voucher_rejects_other_kinds() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.save_voucher(&trap(1), &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::State(_)));
    }

    #[tokio::test]
    async fn catalog_sync_marks() {
        let store = SqliteStore::open_in_memory().unwrap();
        let at = Utc::now();
        store.mark_catalog_synced(CatalogKind::Lotes, at).await.unwrap();
        let read = store.last_synced_at(CatalogKind::Lotes).await.unwrap().unwrap();
        assert_eq!(read.timestamp_micros(), at.timestamp_micros());

        store.clear_catalog_sync_marks().await.unwrap();
        assert!(store.last_synced_at(CatalogKind::Lotes).await.unwrap().is_none());
    }

    #[test]
    fn session_is_persisted() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.current_session().unwrap().is_none());
        let session = Session {
            token: "abc".into(),
            expires_at: Utc::now() + Duration::hours(1),
            user_type: "inspector".into(),
            inspector_id: Some(9),
            user_name: Some("mario".into()),
        };
        store.save_session(&session).unwrap();
        assert_eq!(store.current_session().unwrap(), Some(session));
        store.clear_session().unwrap();
        assert!(store.current_session().unwrap().is_none());
    }
}
