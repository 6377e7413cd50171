//! Append-only transition log: single writer thread, pooled readers, and a
//! broadcast of every committed entry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

use super::entry::LogEntry;
use super::machine::{Event, State};
use super::writer::{BUSY_TIMEOUT, LogWriter, Precondition, WriteCommand};
use super::{persistence_err, persistence_err_with};
use crate::error::Result;

const DEFAULT_READ_POOL_SIZE: usize = 2;
const UPDATE_CHANNEL_CAPACITY: usize = 64;

const SELECT_COLUMNS: &str = "SELECT timestamp, state, causing_event, reminder_deadline FROM log_entries";

/// Raw row: (timestamp, state, causing_event, reminder_deadline).
type EntryRow = (i64, String, Option<String>, i64);

/// Storage contract the dispatcher depends on.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Commits `entry` only if the latest stored timestamp is still
    /// `expected_prev` (`None` for an empty log); otherwise fails with
    /// [`RefreshError::LogConflict`](crate::error::RefreshError::LogConflict).
    async fn append_after(&self, entry: LogEntry, expected_prev: Option<i64>) -> Result<LogEntry>;

    async fn latest(&self) -> Result<Option<LogEntry>>;

    /// Newest first.
    async fn latest_n(&self, n: usize) -> Result<Vec<LogEntry>>;

    fn subscribe(&self) -> broadcast::Receiver<LogEntry>;
}

struct ReadPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    fn new(db_path: &Path, size: usize) -> Result<Self> {
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size.max(1) {
            let conn = Connection::open_with_flags(
                db_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| persistence_err_with("Failed to open read connection", e))?;
            conn.busy_timeout(BUSY_TIMEOUT)
                .map_err(|e| persistence_err_with("Failed to set busy timeout", e))?;
            connections.push(Mutex::new(conn));
        }
        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    fn acquire(&self) -> parking_lot::MutexGuard<'_, Connection> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[idx].lock()
    }
}

struct EventLogInner {
    writer_tx: Sender<WriteCommand>,
    read_pool: ReadPool,
    updates: broadcast::Sender<LogEntry>,
    db_path: PathBuf,
    /// Owns the writer thread; dropping it shuts the thread down.
    #[allow(dead_code)]
    writer: LogWriter,
}

#[derive(Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

impl EventLog {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_read_pool_size(db_path, DEFAULT_READ_POOL_SIZE)
    }

    pub fn with_read_pool_size(db_path: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| persistence_err_with("Failed to create db directory", e))?;
        }

        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let writer = LogWriter::new(db_path.clone(), updates.clone())?;
        let writer_tx = writer.sender();
        let read_pool = ReadPool::new(&db_path, pool_size)?;

        Ok(Self {
            inner: Arc::new(EventLogInner {
                writer_tx,
                read_pool,
                updates,
                db_path,
                writer,
            }),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    /// Appends without checking the predecessor; ordering is still enforced.
    pub async fn append(&self, entry: LogEntry) -> Result<LogEntry> {
        self.send_append(entry, Precondition::Any).await
    }

    pub async fn append_after(
        &self,
        entry: LogEntry,
        expected_prev: Option<i64>,
    ) -> Result<LogEntry> {
        self.send_append(entry, Precondition::Latest(expected_prev)).await
    }

    async fn send_append(&self, entry: LogEntry, precondition: Precondition) -> Result<LogEntry> {
        let (tx, rx) = oneshot::channel();

        self.inner
            .writer_tx
            .send(WriteCommand::Append {
                entry,
                precondition,
                response: tx,
            })
            .map_err(|_| persistence_err("Writer thread disconnected"))?;

        rx.await
            .map_err(|_| persistence_err("Writer response channel dropped"))?
    }

    pub async fn latest(&self) -> Result<Option<LogEntry>> {
        self.read(|conn| {
            let row = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} ORDER BY timestamp DESC LIMIT 1"),
                    [],
                    map_entry_row,
                )
                .optional()
                .map_err(|e| persistence_err_with("Failed to query latest entry", e))?;
            row.map(row_to_entry).transpose()
        })
        .await
    }

    pub async fn latest_n(&self, n: usize) -> Result<Vec<LogEntry>> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        self.read(move |conn| {
            query_entries(
                conn,
                &format!("{SELECT_COLUMNS} ORDER BY timestamp DESC LIMIT ?1"),
                params![limit],
            )
        })
        .await
    }

    /// Entries with `start_ms <= timestamp <= end_ms`, oldest first.
    pub async fn range(&self, start_ms: i64, end_ms: i64) -> Result<Vec<LogEntry>> {
        self.read(move |conn| {
            query_entries(
                conn,
                &format!(
                    "{SELECT_COLUMNS} WHERE timestamp >= ?1 AND timestamp <= ?2 ORDER BY timestamp ASC"
                ),
                params![start_ms, end_ms],
            )
        })
        .await
    }

    pub async fn count(&self) -> Result<i64> {
        self.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM log_entries", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|e| persistence_err_with("Failed to count entries", e))
        })
        .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.inner.updates.subscribe()
    }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || {
            let guard = inner.read_pool.acquire();
            f(&guard)
        })
        .await
        .map_err(|e| persistence_err_with("Query task failed", e))?
    }
}

#[async_trait]
impl LogStore for EventLog {
    async fn append_after(&self, entry: LogEntry, expected_prev: Option<i64>) -> Result<LogEntry> {
        EventLog::append_after(self, entry, expected_prev).await
    }

    async fn latest(&self) -> Result<Option<LogEntry>> {
        EventLog::latest(self).await
    }

    async fn latest_n(&self, n: usize) -> Result<Vec<LogEntry>> {
        EventLog::latest_n(self, n).await
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        EventLog::subscribe(self)
    }
}

fn query_entries(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<LogEntry>> {
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| persistence_err_with("Failed to prepare statement", e))?;

    let rows = stmt
        .query_map(params, map_entry_row)
        .map_err(|e| persistence_err_with("Failed to query entries", e))?;

    let mut entries = Vec::new();
    for row_result in rows {
        let row = row_result.map_err(|e| persistence_err_with("Failed to read row", e))?;
        entries.push(row_to_entry(row)?);
    }

    debug!(count = entries.len(), "Entries queried");

    Ok(entries)
}

fn map_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn row_to_entry(row: EntryRow) -> Result<LogEntry> {
    let (timestamp, state, causing_event, reminder_deadline) = row;

    let state: State = state
        .parse()
        .map_err(|e| persistence_err_with("Corrupt state column", e))?;
    let causing_event = causing_event
        .map(|name| name.parse::<Event>())
        .transpose()
        .map_err(|e| persistence_err_with("Corrupt event column", e))?;

    Ok(LogEntry {
        timestamp,
        state,
        causing_event,
        reminder_deadline,
    })
}
