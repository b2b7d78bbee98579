//! Clipboard history log
//!
//! Append-only list capped at `max_items`; the oldest entries fall off the
//! front. Optionally persisted as JSON and trimmed by age.

use crate::device::current_timestamp_millis;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of kept entries
pub const DEFAULT_MAX_HISTORY_ITEMS: usize = 100;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// One clipboard entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: i64,
    pub text: String,
    pub source_device_id: String,
    pub source_device_name: String,
}

impl HistoryEntry {
    pub fn new(
        text: impl Into<String>,
        source_device_id: impl Into<String>,
        source_device_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: current_timestamp_millis(),
            text: text.into(),
            source_device_id: source_device_id.into(),
            source_device_name: source_device_name.into(),
        }
    }
}

/// History retention policy
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// When false nothing is recorded
    pub keep_history: bool,
    pub max_items: usize,
    /// Entries older than this many days are dropped; negative keeps forever
    pub retention_days: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            keep_history: true,
            max_items: DEFAULT_MAX_HISTORY_ITEMS,
            retention_days: -1,
        }
    }
}

/// Capped clipboard history
#[derive(Debug)]
pub struct ClipboardHistory {
    entries: Mutex<VecDeque<HistoryEntry>>,
    config: HistoryConfig,
    path: Option<PathBuf>,
}

impl ClipboardHistory {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            config,
            path: None,
        }
    }

    /// History persisted at `path`, loading what is already there
    pub fn with_path(config: HistoryConfig, path: impl Into<PathBuf>) -> Result<Self> {
        let history = Self {
            entries: Mutex::new(VecDeque::new()),
            config,
            path: Some(path.into()),
        };
        history.load()?;
        Ok(history)
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Append an entry, evicting the oldest past the cap
    ///
    /// Returns false when history is disabled or the text is blank.
    pub fn push(&self, entry: HistoryEntry) -> bool {
        if !self.config.keep_history || entry.text.trim().is_empty() {
            return false;
        }

        {
            let mut entries = self.lock();
            entries.push_back(entry);
            Self::enforce_cap(&mut entries, self.config.max_items);
        }
        self.persist();
        true
    }

    /// Newest-first list of at most `limit` entries
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Case-insensitive substring search over text and source device name
    pub fn search(&self, query: &str) -> Vec<HistoryEntry> {
        let needle = query.to_lowercase();
        self.lock()
            .iter()
            .rev()
            .filter(|e| {
                e.text.to_lowercase().contains(&needle)
                    || e.source_device_name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<HistoryEntry> {
        self.lock().iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn delete(&self, id: Uuid) -> bool {
        let removed = {
            let mut entries = self.lock();
            let before = entries.len();
            entries.retain(|e| e.id != id);
            entries.len() != before
        };
        if removed {
            self.persist();
        }
        removed
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.persist();
    }

    /// Drop entries older than the retention window
    pub fn apply_retention(&self, now: i64) -> usize {
        if self.config.retention_days < 0 {
            return 0;
        }

        let window = self.config.retention_days.saturating_mul(MILLIS_PER_DAY);
        let cutoff = now.saturating_sub(window);
        let removed = {
            let mut entries = self.lock();
            let before = entries.len();
            entries.retain(|e| e.timestamp >= cutoff);
            before - entries.len()
        };

        if removed > 0 {
            debug!("Dropped {} history entries past retention", removed);
            self.persist();
        }
        removed
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entries: Vec<HistoryEntry> = self.lock().iter().cloned().collect();
        fs::write(path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }

    pub fn load(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let entries: Vec<HistoryEntry> = serde_json::from_str(&fs::read_to_string(path)?)?;
        let mut loaded: VecDeque<HistoryEntry> = entries.into();
        Self::enforce_cap(&mut loaded, self.config.max_items);
        info!("Loaded {} history entries", loaded.len());
        *self.lock() = loaded;
        Ok(())
    }

    fn enforce_cap(entries: &mut VecDeque<HistoryEntry>, max_items: usize) {
        while entries.len() > max_items {
            entries.pop_front();
        }
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!("Failed to save clipboard history: {}", e);
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
