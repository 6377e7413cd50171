//! Read-side views over the transition log: recent entries, completed
//! refresh sessions and per-period breakdowns.

mod range;
mod sessions;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::state::{EventLog, LogEntry, LogStore};

pub use range::{Range, RangeKind};
pub use sessions::{CompletedSession, SessionTracker, derive_sessions};

/// Newest first.
pub async fn history(log: &dyn LogStore, limit: usize) -> Result<Vec<LogEntry>> {
    log.latest_n(limit).await
}

/// Sessions whose entries fall inside `range`, newest first.
pub async fn sessions_in(log: &EventLog, range: Range) -> Result<Vec<CompletedSession>> {
    let (start, end) = range.bounds();
    let entries = log.range(start, end).await?;
    let sessions = derive_sessions(&entries);
    debug!(%range, entries = entries.len(), sessions = sessions.len(), "Sessions derived");
    Ok(sessions)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub range: Range,
    pub label: String,
    pub count: usize,
    pub total_ms: i64,
}

/// Groups sessions by their start time into `range`'s subsections.
pub fn breakdown(range: Range, sessions: &[CompletedSession]) -> Vec<Bucket> {
    range
        .subsections()
        .into_iter()
        .map(|sub| {
            let (mut count, mut total_ms) = (0, 0);
            for session in sessions.iter().filter(|s| sub.contains(s.started_at)) {
                count += 1;
                total_ms += session.duration_ms;
            }
            Bucket {
                label: sub.to_string(),
                range: sub,
                count,
                total_ms,
            }
        })
        .collect()
}
