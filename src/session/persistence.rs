//! Session persistence backends.
//!
//! [`FileStore`] writes each session as pretty-printed JSON under
//! `<base>/sessions/<id>.json`, going through a temp file and an
//! atomic rename so readers never observe a half-written session.
//! One async lock serializes the write path; reads are shared.
//! [`NullStore`] keeps nothing and is useful in tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::ConversationContext;

/// Maximum session id length accepted by the file backend.
const MAX_SESSION_ID_LEN: usize = 255;

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No session with the given id exists.
    #[error("session {id:?} not found")]
    NotFound {
        /// The requested session id.
        id: String,
    },
    /// The session id fails the file-safety rules.
    #[error("invalid session id {id:?}: {reason}")]
    InvalidSessionId {
        /// The offending id.
        id: String,
        /// Which rule it broke.
        reason: String,
    },
    /// JSON encode/decode failure.
    #[error("session serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Filesystem failure.
    #[error("session store i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration named a backend that does not exist.
    #[error("unknown persistence backend {0:?}")]
    UnknownBackend(String),
    /// The store was closed.
    #[error("session store is closed")]
    Closed,
}

/// Store-level description returned by [`SessionStore::metadata`].
#[derive(Debug, Clone, Serialize)]
pub struct StoreMetadata {
    /// Number of persisted sessions.
    pub total_sessions: usize,
    /// Total persisted bytes.
    pub total_bytes: u64,
    /// Encoding format tag.
    pub format: String,
    /// Backing directory, when file-backed.
    pub path: Option<PathBuf>,
    /// When the last backup was taken, when the backend tracks one.
    pub last_backup: Option<DateTime<Utc>>,
}

/// Operation counters kept by each backend.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreStats {
    /// Successful single saves.
    pub saves: u64,
    /// Successful loads.
    pub loads: u64,
    /// Delete calls.
    pub deletes: u64,
    /// Batch save calls.
    pub batch_saves: u64,
    /// Individual failures, including skipped batch entries.
    pub failures: u64,
    /// Rolling average operation duration in milliseconds.
    pub avg_op_duration_ms: f64,
}

#[derive(Debug, Default)]
struct StatsInner {
    stats: StoreStats,
    ops: u64,
    total_duration: Duration,
}

impl StatsInner {
    fn record(&mut self, elapsed: Duration, update: impl FnOnce(&mut StoreStats)) {
        update(&mut self.stats);
        self.ops = self.ops.saturating_add(1);
        self.total_duration = self.total_duration.saturating_add(elapsed);
        #[allow(clippy::cast_precision_loss)]
        let avg = if self.ops == 0 {
            0.0
        } else {
            self.total_duration.as_secs_f64() * 1000.0 / (self.ops as f64)
        };
        self.stats.avg_op_duration_ms = avg;
    }
}

/// Persistence interface consumed by the engine.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist one session.
    async fn save_session(&self, id: &str, context: &ConversationContext)
        -> Result<(), StoreError>;

    /// Load one session; [`StoreError::NotFound`] when absent.
    async fn load_session(&self, id: &str) -> Result<ConversationContext, StoreError>;

    /// Delete one session. Deleting an absent session is not an error.
    async fn delete_session(&self, id: &str) -> Result<(), StoreError>;

    /// Load every persisted session. A missing directory yields an
    /// empty map, not an error.
    async fn load_all_sessions(&self) -> Result<HashMap<String, ConversationContext>, StoreError>;

    /// Persist many sessions, best-effort: individual failures are
    /// skipped and recorded in [`SessionStore::stats`].
    async fn batch_save_sessions(
        &self,
        sessions: &HashMap<String, ConversationContext>,
    ) -> Result<(), StoreError>;

    /// Store-level description.
    async fn metadata(&self) -> Result<StoreMetadata, StoreError>;

    /// Operation counters.
    fn stats(&self) -> StoreStats;

    /// Flush and refuse further operations.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Reject ids that could escape the sessions directory.
fn validate_session_id(id: &str) -> Result<(), StoreError> {
    let fail = |reason: &str| StoreError::InvalidSessionId {
        id: id.to_owned(),
        reason: reason.to_owned(),
    };
    if id.is_empty() {
        return Err(fail("must not be empty"));
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return Err(fail("longer than 255 bytes"));
    }
    if id.contains("..") {
        return Err(fail("must not contain '..'"));
    }
    if id.contains('/') || id.contains('\\') {
        return Err(fail("must not contain path separators"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// File-backed store, one JSON file per session.
pub struct FileStore {
    sessions_dir: PathBuf,
    base_dir: PathBuf,
    /// Serializes writes and deletes; reads go straight to the
    /// filesystem and rely on the atomic rename.
    write_lock: AsyncMutex<()>,
    stats: Mutex<StatsInner>,
    closed: AtomicBool,
}

impl FileStore {
    /// Open (creating directories as needed) a store rooted at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directories cannot be
    /// created.
    pub async fn open(base: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base.into();
        let sessions_dir = base_dir.join("sessions");
        tokio::fs::create_dir_all(&sessions_dir).await?;
        tokio::fs::create_dir_all(base_dir.join("backups")).await?;
        Ok(Self {
            sessions_dir,
            base_dir,
            write_lock: AsyncMutex::new(()),
            stats: Mutex::new(StatsInner::default()),
            closed: AtomicBool::new(false),
        })
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{id}.json"))
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn record(&self, elapsed: Duration, update: impl FnOnce(&mut StoreStats)) {
        if let Ok(mut inner) = self.stats.lock() {
            inner.record(elapsed, update);
        }
    }

    async fn save_one(&self, id: &str, context: &ConversationContext) -> Result<(), StoreError> {
        validate_session_id(id)?;
        let json = serde_json::to_string_pretty(context)?;

        let _write = self.write_lock.lock().await;
        let final_path = self.session_path(id);
        let tmp_path = self.sessions_dir.join(format!("{id}.json.tmp"));
        tokio::fs::write(&tmp_path, json.as_bytes()).await?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            // Leave no partial file behind.
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(e));
        }
        debug!(session_id = %id, path = %final_path.display(), "session persisted");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn save_session(
        &self,
        id: &str,
        context: &ConversationContext,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let start = Instant::now();
        let result = self.save_one(id, context).await;
        match &result {
            Ok(()) => self.record(start.elapsed(), |s| s.saves = s.saves.saturating_add(1)),
            Err(_) => self.record(start.elapsed(), |s| s.failures = s.failures.saturating_add(1)),
        }
        result
    }

    async fn load_session(&self, id: &str) -> Result<ConversationContext, StoreError> {
        self.ensure_open()?;
        validate_session_id(id)?;
        let start = Instant::now();
        let path = self.session_path(id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { id: id.to_owned() });
            }
            Err(e) => {
                self.record(start.elapsed(), |s| {
                    s.failures = s.failures.saturating_add(1);
                });
                return Err(StoreError::Io(e));
            }
        };
        let context = serde_json::from_str(&raw)?;
        self.record(start.elapsed(), |s| s.loads = s.loads.saturating_add(1));
        Ok(context)
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        validate_session_id(id)?;
        let start = Instant::now();
        {
            let _write = self.write_lock.lock().await;
            match tokio::fs::remove_file(self.session_path(id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        self.record(start.elapsed(), |s| s.deletes = s.deletes.saturating_add(1));
        Ok(())
    }

    async fn load_all_sessions(&self) -> Result<HashMap<String, ConversationContext>, StoreError> {
        self.ensure_open()?;
        let mut sessions = HashMap::new();
        let mut entries = match tokio::fs::read_dir(&self.sessions_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(e) => return Err(StoreError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => match serde_json::from_str::<ConversationContext>(&raw) {
                    Ok(context) => {
                        sessions.insert(context.session_id.clone(), context);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping undecodable session file");
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable session file");
                }
            }
        }
        Ok(sessions)
    }

    async fn batch_save_sessions(
        &self,
        sessions: &HashMap<String, ConversationContext>,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let start = Instant::now();
        for (id, context) in sessions {
            if let Err(e) = self.save_one(id, context).await {
                warn!(session_id = %id, error = %e, "batch save skipped session");
                self.record(Duration::ZERO, |s| {
                    s.failures = s.failures.saturating_add(1);
                });
            }
        }
        self.record(start.elapsed(), |s| {
            s.batch_saves = s.batch_saves.saturating_add(1);
        });
        Ok(())
    }

    async fn metadata(&self) -> Result<StoreMetadata, StoreError> {
        self.ensure_open()?;
        let mut total_sessions = 0usize;
        let mut total_bytes = 0u64;
        let mut entries = match tokio::fs::read_dir(&self.sessions_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreMetadata {
                    total_sessions: 0,
                    total_bytes: 0,
                    format: "json".to_owned(),
                    path: Some(self.base_dir.clone()),
                    last_backup: None,
                });
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            total_sessions = total_sessions.saturating_add(1);
            if let Ok(meta) = entry.metadata().await {
                total_bytes = total_bytes.saturating_add(meta.len());
            }
        }
        Ok(StoreMetadata {
            total_sessions,
            total_bytes,
            format: "json".to_owned(),
            path: Some(self.base_dir.clone()),
            last_backup: None,
        })
    }

    fn stats(&self) -> StoreStats {
        self.stats.lock().map(|s| s.stats).unwrap_or_default()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Null backend
// ---------------------------------------------------------------------------

/// Store that keeps nothing; loads always miss.
#[derive(Default)]
pub struct NullStore {
    stats: Mutex<StatsInner>,
}

impl NullStore {
    /// A fresh null store.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, update: impl FnOnce(&mut StoreStats)) {
        if let Ok(mut inner) = self.stats.lock() {
            inner.record(Duration::ZERO, update);
        }
    }
}

#[async_trait]
impl SessionStore for NullStore {
    async fn save_session(
        &self,
        id: &str,
        _context: &ConversationContext,
    ) -> Result<(), StoreError> {
        validate_session_id(id)?;
        self.record(|s| s.saves = s.saves.saturating_add(1));
        Ok(())
    }

    async fn load_session(&self, id: &str) -> Result<ConversationContext, StoreError> {
        Err(StoreError::NotFound { id: id.to_owned() })
    }

    async fn delete_session(&self, _id: &str) -> Result<(), StoreError> {
        self.record(|s| s.deletes = s.deletes.saturating_add(1));
        Ok(())
    }

    async fn load_all_sessions(&self) -> Result<HashMap<String, ConversationContext>, StoreError> {
        Ok(HashMap::new())
    }

    async fn batch_save_sessions(
        &self,
        sessions: &HashMap<String, ConversationContext>,
    ) -> Result<(), StoreError> {
        let _ = sessions;
        self.record(|s| s.batch_saves = s.batch_saves.saturating_add(1));
        Ok(())
    }

    async fn metadata(&self) -> Result<StoreMetadata, StoreError> {
        Ok(StoreMetadata {
            total_sessions: 0,
            total_bytes: 0,
            format: "memory".to_owned(),
            path: None,
            last_backup: None,
        })
    }

    fn stats(&self) -> StoreStats {
        self.stats.lock().map(|s| s.stats).unwrap_or_default()
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// Construct a store from the configured backend name.
///
/// # Errors
///
/// Returns [`StoreError::UnknownBackend`] for unrecognized names and
/// [`StoreError::Io`] when the file backend cannot create its
/// directories.
pub async fn open_store(
    backend: &str,
    base_dir: &Path,
) -> Result<std::sync::Arc<dyn SessionStore>, StoreError> {
    match backend {
        "file" => Ok(std::sync::Arc::new(FileStore::open(base_dir).await?)),
        "memory" => Ok(std::sync::Arc::new(NullStore::new())),
        other => Err(StoreError::UnknownBackend(other.to_owned())),
    }
}
