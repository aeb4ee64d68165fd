//! Bounded, durable record of past evaluation runs.
//!
//! [`RunHistoryStore`] keeps lightweight [`HistoryEntry`] summaries,
//! most-recent-first, capped at a fixed capacity (oldest evicted first).
//! Persistence goes through the [`HistoryBackend`] trait so the same store
//! logic targets a file on disk or plain memory without code changes.
//!
//! Robustness over precision: a missing or corrupt persisted record reads
//! as an empty history, never as an error.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::EvalError;
use crate::models::HistoryEntry;

/// Storage backend holding one named JSON record.
///
/// Implementations must be `Send + Sync`. Reads return `Ok(None)` when the
/// record does not exist yet.
pub trait HistoryBackend: Send + Sync {
    /// Read the raw persisted payload, if any.
    fn read(&self) -> Result<Option<String>>;

    /// Replace the persisted payload.
    fn write(&self, payload: &str) -> Result<()>;
}

/// File-backed persistence: one JSON file on disk.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HistoryBackend for FileBackend {
    fn read(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", self.path.display())),
        }
    }

    fn write(&self, payload: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, payload)
            .with_context(|| format!("write {}", self.path.display()))
    }
}

/// In-memory persistence for tests and ephemeral sessions.
pub struct MemoryBackend {
    payload: RwLock<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            payload: RwLock::new(None),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryBackend for MemoryBackend {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.payload.read().unwrap().clone())
    }

    fn write(&self, payload: &str) -> Result<()> {
        *self.payload.write().unwrap() = Some(payload.to_string());
        Ok(())
    }
}

/// Aggregate statistics over history entries sharing one config label.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigStats {
    pub count: usize,
    pub mean_top1_pct: f64,
    pub mean_topk_pct: f64,
    pub mean_duration_secs: f64,
    /// Most recent matching entry (entries are most-recent-first).
    pub latest: HistoryEntry,
}

/// Top-k delta between an entry and the previous run of the same config.
#[derive(Debug, Clone, Serialize)]
pub struct DeltaVsPrevious {
    /// `current_topk_pct − previous_topk_pct`, in percentage points.
    pub delta: f64,
    pub previous: HistoryEntry,
    pub improved: bool,
}

/// One point of a trend series, oldest-first.
#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub top1_pct: f64,
    pub topk_pct: f64,
    pub duration_secs: f64,
    pub config_label: String,
}

/// Bounded, durable run history. Most-recent-first; FIFO eviction past
/// capacity; selection tracked by entry id so deletions never leave a
/// stale index.
pub struct RunHistoryStore {
    backend: Box<dyn HistoryBackend>,
    capacity: usize,
    entries: Vec<HistoryEntry>,
    selected: Option<String>,
}

/// Default rolling-history capacity.
pub const DEFAULT_CAPACITY: usize = 20;

impl RunHistoryStore {
    /// Open the store, loading whatever the backend holds. Absent or
    /// corrupt payloads load as an empty history.
    pub fn open(backend: Box<dyn HistoryBackend>, capacity: usize) -> Self {
        let entries = match backend.read() {
            Ok(Some(payload)) => serde_json::from_str::<Vec<HistoryEntry>>(&payload)
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        let mut store = Self {
            backend,
            capacity: capacity.max(1),
            entries,
            selected: None,
        };
        store.entries.truncate(store.capacity);
        store
    }

    /// Convenience constructor for the file backend.
    pub fn open_file(path: &Path, capacity: usize) -> Self {
        Self::open(Box::new(FileBackend::new(path)), capacity)
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a completed run's summary at the front; evict past capacity;
    /// persist.
    pub fn append(&mut self, entry: HistoryEntry) -> Result<()> {
        self.entries.insert(0, entry);
        self.entries.truncate(self.capacity);
        self.persist()
    }

    /// Remove the entry at `index`. Deleting the selected entry clears the
    /// selection; deleting any other entry leaves selection on the same
    /// logical entry (tracked by id, not index).
    pub fn delete(&mut self, index: usize) -> Result<HistoryEntry> {
        if index >= self.entries.len() {
            return Err(EvalError::NotFound(format!(
                "no history entry at index {} ({} entries)",
                index,
                self.entries.len()
            ))
            .into());
        }
        let removed = self.entries.remove(index);
        if self.selected.as_deref() == Some(removed.id.as_str()) {
            self.selected = None;
        }
        self.persist()?;
        Ok(removed)
    }

    /// Empty the store and clear the selection.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.selected = None;
        self.persist()
    }

    /// Mark the entry at `index` as selected.
    pub fn select(&mut self, index: usize) -> Result<()> {
        let entry = self.entries.get(index).ok_or_else(|| {
            EvalError::NotFound(format!(
                "no history entry at index {} ({} entries)",
                index,
                self.entries.len()
            ))
        })?;
        self.selected = Some(entry.id.clone());
        Ok(())
    }

    /// The selected entry and its current index, if any.
    pub fn selected(&self) -> Option<(usize, &HistoryEntry)> {
        let id = self.selected.as_deref()?;
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.id == id)
    }

    /// Aggregate statistics for entries matching `config_label`, or `None`
    /// if nothing matches.
    pub fn config_stats(&self, config_label: &str) -> Option<ConfigStats> {
        let matching: Vec<&HistoryEntry> = self
            .entries
            .iter()
            .filter(|e| e.config_label == config_label)
            .collect();
        let latest = matching.first()?;

        let count = matching.len();
        let n = count as f64;
        Some(ConfigStats {
            count,
            mean_top1_pct: matching.iter().map(|e| e.top1_pct()).sum::<f64>() / n,
            mean_topk_pct: matching.iter().map(|e| e.topk_pct()).sum::<f64>() / n,
            mean_duration_secs: matching.iter().map(|e| e.duration_secs).sum::<f64>() / n,
            latest: (*latest).clone(),
        })
    }

    /// Top-k delta between the entry at `index` and the next older entry
    /// sharing its config label. `None` when the index is out of range or
    /// no older entry matches.
    pub fn delta_vs_previous(&self, index: usize) -> Option<DeltaVsPrevious> {
        let current = self.entries.get(index)?;
        let previous = self.entries[index + 1..]
            .iter()
            .find(|e| e.config_label == current.config_label)?;

        let delta = current.topk_pct() - previous.topk_pct();
        Some(DeltaVsPrevious {
            delta,
            previous: previous.clone(),
            improved: delta > 0.0,
        })
    }

    /// Oldest-first trend series, optionally filtered by config label.
    pub fn trend_data(&self, config_label: Option<&str>) -> Vec<TrendPoint> {
        self.entries
            .iter()
            .rev()
            .filter(|e| config_label.map_or(true, |l| e.config_label == l))
            .map(|e| TrendPoint {
                timestamp: e.timestamp,
                top1_pct: e.top1_pct(),
                topk_pct: e.topk_pct(),
                duration_secs: e.duration_secs,
                config_label: e.config_label.clone(),
            })
            .collect()
    }

    /// Write the full entry list to `path` as pretty JSON.
    pub fn export(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json).with_context(|| format!("write {}", path.display()))
    }

    /// Replace the store contents with the entries from `path`, re-applying
    /// the capacity bound; selection is cleared.
    pub fn import(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let entries: Vec<HistoryEntry> =
            serde_json::from_str(&content).with_context(|| "parse history export")?;

        self.entries = entries;
        self.entries.truncate(self.capacity);
        self.selected = None;
        self.persist()?;
        Ok(self.entries.len())
    }

    fn persist(&self) -> Result<()> {
        let payload = serde_json::to_string(&self.entries)?;
        self.backend.write(&payload)
    }
}
