//! Durable, append-only history of restock events.
//!
//! The store is a single JSON document rewritten atomically on every save.
//! Events are kept sorted by timestamp and unique per source message, so no
//! `(product_id, source_message_id)` pair repeats; merging is idempotent and
//! a run that re-sees messages from an earlier run changes nothing.
//!
//! Next to the events the file keeps the [`FetchState`]: how far back the
//! timeline has been read completely, and where an interrupted walk resumes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use restock_core::models::RestockEvent;
use restock_core::{RestockError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// On-disk format version written by this build.
pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    fetch: FetchState,
    events: Vec<RestockEvent>,
}

// ── FetchState ────────────────────────────────────────────────────────────────

/// Progress of timeline ingestion across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchState {
    /// Every message posted at or before this instant has been read, as far
    /// as the provider's recency window allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<DateTime<Utc>>,
    /// A walk that stopped at the page limit before reaching the watermark.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backfill: Option<Backfill>,
}

/// The unread stretch left behind by a truncated walk: everything older
/// than `until_id` and newer than the watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backfill {
    /// Oldest message read so far; the resumed walk asks for older ones.
    pub until_id: String,
    /// Timestamp of that message.
    pub oldest: DateTime<Utc>,
    /// Newest message read by the walk that was cut short. The watermark
    /// moves here once the stretch is closed.
    pub newest: DateTime<Utc>,
}

/// Result of a [`EventStore::merge`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Events that were new and have been added.
    pub inserted: usize,
    /// Events whose source message was already stored (or repeated within
    /// the batch).
    pub duplicates: usize,
}

// ── EventStore ────────────────────────────────────────────────────────────────

/// Sorted, deduplicated event history bound to a file path.
#[derive(Debug)]
pub struct EventStore {
    path: PathBuf,
    fetch: FetchState,
    events: Vec<RestockEvent>,
    message_ids: HashSet<String>,
}

impl EventStore {
    /// An empty store that will be saved to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fetch: FetchState::default(),
            events: Vec::new(),
            message_ids: HashSet::new(),
        }
    }

    /// Open the store at `path`.
    ///
    /// A missing file yields an empty store. A file that exists but cannot be
    /// decoded is an error: the history it holds must not be overwritten.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no event store at {}, starting empty", path.display());
                return Ok(Self::empty(path));
            }
            Err(source) => return Err(RestockError::FileRead { path, source }),
        };

        let file: StoreFile =
            serde_json::from_str(&content).map_err(|e| RestockError::StoreCorrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if file.version != STORE_VERSION {
            return Err(RestockError::StoreCorrupt {
                path,
                reason: format!("unsupported version {}", file.version),
            });
        }

        let mut store = Self::empty(path);
        store.fetch = file.fetch;
        // Rebuild through merge so a hand-edited file is re-sorted and deduplicated.
        store.merge(file.events);
        debug!(
            "loaded {} events from {}",
            store.len(),
            store.path.display()
        );
        Ok(store)
    }

    /// Atomically write the store to its path, creating parent directories
    /// if needed.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = StoreFile {
            version: STORE_VERSION,
            fetch: self.fetch.clone(),
            events: self.events.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!("saved {} events to {}", self.len(), self.path.display());
        Ok(())
    }

    /// Insert events whose source message is not stored yet, keeping
    /// timestamp order.
    ///
    /// A message yields at most one event, so a message already stored under
    /// one product is not stored again under another (the registry order may
    /// have changed in between). Merging the same events again is a no-op.
    pub fn merge(&mut self, new_events: impl IntoIterator<Item = RestockEvent>) -> MergeReport {
        let mut report = MergeReport::default();
        let mut fresh = Vec::new();

        for event in new_events {
            if self.message_ids.insert(event.key().to_string()) {
                fresh.push(event);
                report.inserted += 1;
            } else {
                report.duplicates += 1;
            }
        }

        if !fresh.is_empty() {
            self.events.extend(fresh);
            self.events.sort_by(compare_events);
        }

        report
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All events, oldest first.
    pub fn events(&self) -> &[RestockEvent] {
        &self.events
    }

    /// Whether an event derived from this message is stored.
    pub fn contains(&self, source_message_id: &str) -> bool {
        self.message_ids.contains(source_message_id)
    }

    pub fn fetch_state(&self) -> &FetchState {
        &self.fetch
    }

    /// Replace the ingestion progress; persisted by the next [`EventStore::save`].
    pub fn set_fetch_state(&mut self, state: FetchState) {
        self.fetch = state;
    }

    /// Timestamp of the newest stored event.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.events.last().map(|e| e.timestamp)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Timestamp order, ties broken by product then message id.
fn compare_events(a: &RestockEvent, b: &RestockEvent) -> std::cmp::Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.product_id.cmp(&b.product_id))
        .then_with(|| a.source_message_id.cmp(&b.source_message_id))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
