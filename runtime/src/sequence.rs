//! Run history and configuration drift detection.
//!
//! Every run that does work appends an entry to a JSON history at the
//! archive root and snapshots the configuration that produced it. The next
//! run compares its configuration with the current entry's snapshot to
//! decide whether anything needs doing.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use a3s_mirror_core::error::{MirrorError, Result};
use a3s_mirror_core::{ArchiveLayout, ImageSetConfiguration};

const HISTORY_TITLE: &str = "a3s-mirror sequence history";
const HISTORY_OWNER: &str = "a3s-mirror";

/// One recorded run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceEntry {
    pub ordinal: u64,
    pub current: bool,
    pub timestamp: DateTime<Utc>,
    /// Snapshot file name, relative to the archive root
    pub config: String,
    /// Archive entry a publish run pushed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_ordinal: Option<u64>,
}

/// Append-only run history with exactly one current entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceHistory {
    pub title: String,
    pub owner: String,
    #[serde(default)]
    pub entries: Vec<SequenceEntry>,
}

impl Default for SequenceHistory {
    fn default() -> Self {
        Self {
            title: HISTORY_TITLE.to_string(),
            owner: HISTORY_OWNER.to_string(),
            entries: Vec::new(),
        }
    }
}

impl SequenceHistory {
    pub fn current(&self) -> Option<&SequenceEntry> {
        self.entries.iter().find(|e| e.current)
    }

    fn next_ordinal(&self) -> u64 {
        self.entries.iter().map(|e| e.ordinal).max().unwrap_or(0) + 1
    }
}

/// Which history a tracker reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    /// Archive-producing runs
    Archive,
    /// Registry-publishing runs
    Publish,
}

/// Reads and appends one run history under an archive root.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    kind: HistoryKind,
    layout: ArchiveLayout,
}

impl SequenceTracker {
    pub fn new(kind: HistoryKind, layout: ArchiveLayout) -> Self {
        Self { kind, layout }
    }

    pub fn history_path(&self) -> PathBuf {
        match self.kind {
            HistoryKind::Archive => self.layout.archive_metadata(),
            HistoryKind::Publish => self.layout.publish_metadata(),
        }
    }

    fn snapshot_path(&self, ordinal: u64) -> PathBuf {
        match self.kind {
            HistoryKind::Archive => self.layout.config_snapshot(ordinal),
            HistoryKind::Publish => self.layout.publish_config_snapshot(ordinal),
        }
    }

    /// Load the history and the configuration of its current entry.
    ///
    /// A missing history is a first run: an empty history and no config.
    pub fn get_all_metadata(&self) -> Result<(SequenceHistory, Option<ImageSetConfiguration>)> {
        let path = self.history_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No run history, first run");
            return Ok((SequenceHistory::default(), None));
        }

        let data = std::fs::read_to_string(&path)?;
        let history: SequenceHistory = serde_json::from_str(&data).map_err(|e| {
            MirrorError::Serialization(format!("corrupt history {}: {}", path.display(), e))
        })?;

        let last = match history.current() {
            Some(entry) => Some(load_snapshot(&self.layout.root().join(&entry.config))?),
            None => None,
        };
        Ok((history, last))
    }

    /// Append an entry for `config`, making it the only current one.
    pub fn write_metadata(
        &self,
        mut history: SequenceHistory,
        config: &ImageSetConfiguration,
        archive_ordinal: Option<u64>,
    ) -> Result<SequenceEntry> {
        let ordinal = history.next_ordinal();
        let snapshot = self.snapshot_path(ordinal);
        if let Some(parent) = snapshot.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&snapshot, config.to_yaml()?)?;

        for entry in &mut history.entries {
            entry.current = false;
        }
        let entry = SequenceEntry {
            ordinal,
            current: true,
            timestamp: Utc::now(),
            config: snapshot
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            archive_ordinal,
        };
        history.entries.push(entry.clone());

        self.save(&history)?;
        tracing::info!(
            ordinal,
            history = %self.history_path().display(),
            "Recorded run metadata"
        );
        Ok(entry)
    }

    /// Write atomically: `.tmp` then rename.
    fn save(&self, history: &SequenceHistory) -> Result<()> {
        let path = self.history_path();
        let data = serde_json::to_string_pretty(history)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> Result<ImageSetConfiguration> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MirrorError::Serialization(format!(
            "missing configuration snapshot {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Whether `current` differs structurally from the last recorded config.
///
/// Without a previous config, everything is a change.
pub fn check_diff(current: &ImageSetConfiguration, last: Option<&ImageSetConfiguration>) -> bool {
    match last {
        Some(last) => current != last,
        None => true,
    }
}
