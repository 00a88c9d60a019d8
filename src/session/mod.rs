//! Session context management.
//!
//! A [`ConversationContext`] carries the per-session state between
//! turns. Live contexts are owned by the [`lru::SessionCache`];
//! [`persistence`] keeps independent serialized copies on disk, and
//! [`monitor::MemoryMonitor`] watches overall memory pressure.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod lru;
pub mod monitor;
pub mod persistence;

pub use lru::{CacheStats, SessionCache};
pub use monitor::{MemoryMonitor, MemoryStats, PressureLevel};
pub use persistence::{FileStore, NullStore, SessionStore, StoreError};

/// One completed query/response turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The natural-language query as received.
    pub query: String,
    /// Reference to the structured response produced for the query.
    pub response: Value,
    /// Optional per-turn annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    /// When the turn completed.
    pub timestamp: DateTime<Utc>,
}

/// A resolved entity reference (e.g. a pronoun antecedent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReference {
    /// Resolved value.
    pub value: String,
    /// Value type tag (e.g. `"resource"`, `"user"`).
    #[serde(rename = "type")]
    pub kind: String,
}

/// Per-session conversation state.
///
/// Created on first touch, mutated by the engine on each turn, and
/// destroyed by explicit removal, LRU eviction, or TTL expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Unique session identifier.
    pub session_id: String,
    /// Owning user identifier.
    pub user_id: String,
    /// Completed turns, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Name → resolved reference map.
    #[serde(default)]
    pub resolved_references: HashMap<String, ResolvedReference>,
    /// Opaque enrichment payload attached by external collaborators.
    #[serde(default)]
    pub enrichment: HashMap<String, Value>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last mutated.
    pub last_updated: DateTime<Utc>,
}

impl ConversationContext {
    /// Fresh context for a session.
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            history: Vec::new(),
            resolved_references: HashMap::new(),
            enrichment: HashMap::new(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Append a completed turn.
    pub fn add_history_entry(&mut self, query: impl Into<String>, response: Value) {
        self.history.push(HistoryEntry {
            query: query.into(),
            response,
            metadata: None,
            timestamp: Utc::now(),
        });
        self.last_updated = Utc::now();
    }

    /// Record a resolved reference.
    pub fn resolve_reference(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        kind: impl Into<String>,
    ) {
        self.resolved_references.insert(
            name.into(),
            ResolvedReference {
                value: value.into(),
                kind: kind.into(),
            },
        );
        self.last_updated = Utc::now();
    }

    /// Number of completed turns.
    pub fn turn_count(&self) -> usize {
        self.history.len()
    }
}
