//! Dedup ledger: which qualifying slots have already triggered an alert.
//!
//! Owned by the single poll worker, so no locking. Optionally persisted to
//! a JSON file so run-once/cron deployments keep their memory between
//! invocations.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::SeenKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenEntry {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// On-disk shape: a flat list of seen-key records.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    entries: Vec<SeenRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SeenRecord {
    key: SeenKey,
    #[serde(flatten)]
    entry: SeenEntry,
}

#[derive(Debug, Default)]
pub struct SeenLedger {
    entries: HashMap<SeenKey, SeenEntry>,
    path: Option<PathBuf>,
}

impl SeenLedger {
    /// Ledger that lives only for this process (continuous mode).
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Ledger backed by a JSON file. A missing file is an empty ledger,
    /// not an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!(path = %path.display(), "No ledger file yet, starting empty");
            return Ok(Self {
                entries: HashMap::new(),
                path: Some(path),
            });
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read ledger file {}", path.display()))?;
        let file: LedgerFile = serde_json::from_str(&raw)
            .with_context(|| format!("Ledger file {} is not valid JSON", path.display()))?;

        let entries: HashMap<SeenKey, SeenEntry> = file
            .entries
            .into_iter()
            .map(|record| (record.key, record.entry))
            .collect();

        info!(
            path = %path.display(),
            entries = entries.len(),
            "Loaded dedup ledger"
        );

        Ok(Self {
            entries,
            path: Some(path),
        })
    }

    /// Read-only check: has this key never been notified?
    pub fn is_new(&self, key: &SeenKey) -> bool {
        !self.entries.contains_key(key)
    }

    /// Record a delivered notification. Idempotent: re-marking an existing
    /// key only refreshes its last-seen stamp.
    pub fn mark_notified(&mut self, key: SeenKey, at: DateTime<Utc>) {
        self.entries
            .entry(key)
            .and_modify(|entry| entry.last_seen = at)
            .or_insert(SeenEntry {
                first_seen: at,
                last_seen: at,
            });
    }

    /// Prune entries whose slot date has passed. Never touches still-future
    /// slots, so an already-notified future slot cannot re-fire.
    pub fn expire_older_than(&mut self, date: NaiveDate) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.date >= date);
        let expired = before - self.entries.len();
        if expired > 0 {
            debug!(expired, horizon = %date, "Expired past ledger entries");
        }
        expired
    }

    /// Write the ledger to its backing file, if it has one. Uses a
    /// temp-file-then-rename so a crash mid-write cannot truncate the
    /// previous state.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = LedgerFile {
            entries: self
                .entries
                .iter()
                .map(|(key, entry)| SeenRecord {
                    key: key.clone(),
                    entry: entry.clone(),
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file).context("Failed to serialize ledger")?;

        let tmp = temp_path(path);
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write ledger file {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace ledger file {}", path.display()))?;

        debug!(path = %path.display(), entries = self.entries.len(), "Saved dedup ledger");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
