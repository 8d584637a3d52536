//! Durable, append-only per-session message log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DasiError, Result};
use crate::types::ModelMessage;

/// One persisted message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    /// Stable identifier, used to exclude this turn's own entries from the
    /// rebuilt prompt.
    pub id: Uuid,
    /// Exact session id the entry was appended under.
    pub session_id: String,
    pub message: ModelMessage,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    fn new(session_id: &str, message: ModelMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            message,
            recorded_at: Utc::now(),
        }
    }
}

/// Storage abstraction for conversation history.
///
/// Sessions are independent; an implementation only needs to keep appends
/// within one session ordered. Session ids are compared exactly.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a fully resolved message and return the stored entry.
    async fn append(&self, session_id: &str, message: ModelMessage) -> Result<HistoryEntry>;
    /// The most recent `limit` entries, oldest first. `None` returns everything.
    async fn read(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<HistoryEntry>>;
    /// Drop every entry of the session. Clearing an unknown session is a no-op.
    async fn clear(&self, session_id: &str) -> Result<()>;
}

fn tail<T>(mut entries: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
    }
    entries
}

/// Process-local history, used by tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    sessions: Mutex<HashMap<String, Vec<HistoryEntry>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, session_id: &str, message: ModelMessage) -> Result<HistoryEntry> {
        let entry = HistoryEntry::new(session_id, message);
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    async fn read(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
        let entries = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .unwrap_or_default();
        Ok(tail(entries, limit))
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        Ok(())
    }
}

/// File-backed history: one JSON Lines file per session, written with
/// `tokio::fs` so the turn task never blocks on disk.
#[derive(Debug)]
pub struct FileHistoryStore {
    base_dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileHistoryStore {
    /// Logs live directly under `base_dir`, created on first append.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the log for `session_id`. Distinct ids always map to distinct
    /// files, including on case-insensitive filesystems.
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.jsonl", encode_session_id(session_id)))
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn append(&self, session_id: &str, message: ModelMessage) -> Result<HistoryEntry> {
        let entry = HistoryEntry::new(session_id, message);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.base_dir).await?;
        let path = self.session_path(session_id);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        debug!(session_id, entry_id = %entry.id, "history entry appended");
        Ok(entry)
    }

    async fn read(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
        let path = self.session_path(session_id);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(DasiError::History(format!("{}: {err}", path.display()))),
        };

        let mut entries = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) if entry.session_id == session_id => entries.push(entry),
                Ok(entry) => debug!(path = %path.display(), foreign = %entry.session_id, "ignoring entry from another session"),
                // A torn final write must not make the whole session unreadable.
                Err(e) => warn!(path = %path.display(), line = lineno + 1, error = %e, "skipping corrupt history line"),
            }
        }
        Ok(tail(entries, limit))
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.session_path(session_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(DasiError::History(format!("{}: {err}", path.display()))),
        }
    }
}

/// Lower-case ASCII letters, digits and `_` pass through; every other byte
/// becomes `-xx` (lower hex). `-` only ever starts an escape, so the mapping
/// is injective, and the output never depends on letter case.
fn encode_session_id(session_id: &str) -> String {
    if session_id.is_empty() {
        return "-".to_string();
    }
    let mut out = String::with_capacity(session_id.len());
    for byte in session_id.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'_' => out.push(char::from(byte)),
            _ => out.push_str(&format!("-{byte:02x}")),
        }
    }
    out
}
