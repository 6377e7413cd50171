//! Dedicated writer thread for the SQLite transition log.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior, params};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, warn};

use super::entry::LogEntry;
use super::{persistence_err, persistence_err_with};
use crate::error::{RefreshError, Result};

const SCHEMA_VERSION: i32 = 1;
pub(super) const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// What the log must hold for an append to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Precondition {
    /// Only the timestamp ordering is checked.
    Any,
    /// `MAX(timestamp)` must equal this value (`None` for an empty log).
    Latest(Option<i64>),
}

pub(super) enum WriteCommand {
    Append {
        entry: LogEntry,
        precondition: Precondition,
        response: oneshot::Sender<Result<LogEntry>>,
    },
    Shutdown,
}

pub(super) struct LogWriter {
    tx: Sender<WriteCommand>,
    handle: Option<JoinHandle<()>>,
}

impl LogWriter {
    pub fn new(db_path: PathBuf, updates: broadcast::Sender<LogEntry>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<WriteCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name("log-writer".into())
            .spawn(move || match Self::init_db(&db_path) {
                Ok(mut conn) => {
                    let _ = ready_tx.send(Ok(()));
                    Self::process_commands(&mut conn, rx, &updates);
                }
                Err(e) => {
                    error!(error = %e, "Log writer init failed");
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| persistence_err_with("Failed to spawn writer thread", e))?;

        ready_rx
            .recv()
            .map_err(|_| persistence_err("Writer thread died during init"))??;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> Sender<WriteCommand> {
        self.tx.clone()
    }

    fn init_db(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path)
            .map_err(|e| persistence_err_with("Failed to open database", e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| persistence_err_with("Failed to set busy timeout", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| persistence_err_with("Failed to enable WAL", e))?;
        Self::init_schema(&conn)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS log_entries (
                timestamp INTEGER PRIMARY KEY,
                state TEXT NOT NULL,
                causing_event TEXT,
                reminder_deadline INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_log_entries_event
                ON log_entries(causing_event) WHERE causing_event IS NOT NULL;

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );
            ",
        )
        .map_err(|e| persistence_err_with("Failed to init schema", e))?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_version VALUES (?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(|e| persistence_err_with("Failed to record schema version", e))?;

        Ok(())
    }

    fn process_commands(
        conn: &mut Connection,
        rx: Receiver<WriteCommand>,
        updates: &broadcast::Sender<LogEntry>,
    ) {
        for cmd in rx {
            match cmd {
                WriteCommand::Append {
                    entry,
                    precondition,
                    response,
                } => {
                    let result = Self::append_entry(conn, entry, precondition);
                    if let Ok(committed) = &result {
                        // No subscribers is fine; the entry is durable either way.
                        let _ = updates.send(committed.clone());
                    }
                    let _ = response.send(result);
                }
                WriteCommand::Shutdown => {
                    debug!("Writer thread received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Other processes may hold their own writer on the same file, so the
    /// write lock is taken up front (`BEGIN IMMEDIATE`) and the predecessor
    /// check runs under it.
    fn append_entry(
        conn: &mut Connection,
        entry: LogEntry,
        precondition: Precondition,
    ) -> Result<LogEntry> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| persistence_err_with("Failed to start transaction", e))?;

        let latest: Option<i64> = tx
            .query_row("SELECT MAX(timestamp) FROM log_entries", [], |row| {
                row.get(0)
            })
            .map_err(|e| persistence_err_with("Failed to read latest timestamp", e))?;

        if let Precondition::Latest(expected) = precondition
            && latest != expected
        {
            debug!(?expected, found = ?latest, "Append rejected, log moved");
            return Err(RefreshError::LogConflict {
                expected,
                found: latest,
            });
        }

        if let Some(latest) = latest
            && entry.timestamp <= latest
        {
            return Err(persistence_err(format!(
                "Out-of-order append: timestamp {} is not after latest {}",
                entry.timestamp, latest
            )));
        }

        tx.execute(
            "INSERT INTO log_entries (timestamp, state, causing_event, reminder_deadline)
               VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.timestamp,
                entry.state.as_str(),
                entry.causing_event.map(|e| e.as_str()),
                entry.reminder_deadline,
            ],
        )
        .map_err(|e| persistence_err_with("Failed to insert entry", e))?;

        tx.commit()
            .map_err(|e| persistence_err_with("Failed to commit", e))?;

        debug!(
            timestamp = entry.timestamp,
            state = %entry.state,
            reminder_deadline = entry.reminder_deadline,
            "Entry appended"
        );

        Ok(entry)
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(WriteCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.join()
        {
            warn!("Writer thread panicked: {:?}", e);
        }
    }
}
