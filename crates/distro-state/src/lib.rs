//! Resumable state for a weekly batch publish run.
//!
//! The weekly batch planner (§4.8) selects a set of content items and
//! submits a job per item. A run can span many jobs and take long enough
//! that the process restarts mid-way; `BatchRunState` tracks per-item
//! progress so a restart resumes instead of resubmitting completed work.
//!
//! # Example
//!
//! ```
//! use distro_state::{BatchRunState, BatchItemState, StateStore};
//! use std::path::Path;
//!
//! let mut state = BatchRunState::new("batch-2026-08-01");
//! state.mark_submitted("doc-1", "job-1");
//!
//! let store = StateStore::new(Path::new(".distro"));
//! store.save(&state).expect("save");
//!
//! let loaded = store.load().expect("load");
//! assert_eq!(loaded.run_id(), "batch-2026-08-01");
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STATE_FILE: &str = "batch_state.json";

pub fn state_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATE_FILE)
}

/// Per-content-item progress within a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItemState {
    Pending,
    Submitted { job_id: String },
    Completed { job_id: String },
    Failed { job_id: Option<String>, message: String },
    Skipped { reason: String },
}

/// Progress of a single weekly batch run across every content item it
/// selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRunState {
    run_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    items: HashMap<String, BatchItemState>,
    attempt_count: u32,
    last_error: Option<String>,
}

impl BatchRunState {
    pub fn new(run_id: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            created_at: now,
            updated_at: now,
            items: HashMap::new(),
            attempt_count: 0,
            last_error: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn set_item_state(&mut self, document_id: &str, state: BatchItemState) {
        self.items.insert(document_id.to_string(), state);
        self.updated_at = Utc::now();
    }

    pub fn item_state(&self, document_id: &str) -> Option<&BatchItemState> {
        self.items.get(document_id)
    }

    pub fn items(&self) -> &HashMap<String, BatchItemState> {
        &self.items
    }

    pub fn mark_pending(&mut self, document_id: &str) {
        self.set_item_state(document_id, BatchItemState::Pending);
    }

    pub fn mark_submitted(&mut self, document_id: &str, job_id: &str) {
        self.set_item_state(
            document_id,
            BatchItemState::Submitted {
                job_id: job_id.to_string(),
            },
        );
    }

    pub fn mark_completed(&mut self, document_id: &str, job_id: &str) {
        self.set_item_state(
            document_id,
            BatchItemState::Completed {
                job_id: job_id.to_string(),
            },
        );
    }

    pub fn mark_failed(&mut self, document_id: &str, job_id: Option<&str>, message: &str) {
        self.set_item_state(
            document_id,
            BatchItemState::Failed {
                job_id: job_id.map(String::from),
                message: message.to_string(),
            },
        );
        self.last_error = Some(message.to_string());
    }

    pub fn mark_skipped(&mut self, document_id: &str, reason: &str) {
        self.set_item_state(
            document_id,
            BatchItemState::Skipped {
                reason: reason.to_string(),
            },
        );
    }

    pub fn increment_attempts(&mut self) {
        self.attempt_count += 1;
        self.updated_at = Utc::now();
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether every known item has reached a terminal state. A freshly
    /// created run with no items yet selected is not considered complete.
    pub fn is_complete(&self) -> bool {
        !self.items.is_empty()
            && self.items.values().all(|s| {
                matches!(
                    s,
                    BatchItemState::Completed { .. }
                        | BatchItemState::Skipped { .. }
                        | BatchItemState::Failed { .. }
                )
            })
    }

    /// Items still eligible for (re)submission on resume: pending, or
    /// submitted but never observed completing (the process died before the
    /// orchestrator result came back).
    pub fn resumable_items(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|(_, s)| matches!(s, BatchItemState::Pending | BatchItemState::Submitted { .. }))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn failed_items(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|(_, s)| matches!(s, BatchItemState::Failed { .. }))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn completed_items(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|(_, s)| matches!(s, BatchItemState::Completed { .. }))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.attempt_count = 0;
        self.last_error = None;
        self.updated_at = Utc::now();
    }
}

/// Atomic disk persistence for a `BatchRunState`.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_path(state_dir),
        }
    }

    pub fn save(&self, state: &BatchRunState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state dir {}", parent.display()))?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let json = serde_json::to_string_pretty(state).context("failed to serialize state to JSON")?;

        fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write state file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename state file to {}", self.path.display()))?;

        Ok(())
    }

    pub fn load(&self) -> Result<BatchRunState> {
        if !self.path.exists() {
            return Err(anyhow::anyhow!("state file not found: {}", self.path.display()));
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read state file {}", self.path.display()))?;

        let state: BatchRunState = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse state JSON from {}", self.path.display()))?;

        Ok(state)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn delete(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to delete state file {}", self.path.display()))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Summary of a completed batch run, appended to a JSONL log for later
/// auditing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub completed_items: Vec<String>,
    pub skipped_items: Vec<String>,
    pub failed_items: Vec<String>,
    pub total_attempts: u32,
    pub success: bool,
}

impl BatchReceipt {
    pub fn from_state(state: &BatchRunState) -> Self {
        let completed_items = state.completed_items().into_iter().map(String::from).collect();
        let failed_items = state.failed_items().into_iter().map(String::from).collect();
        let skipped_items = state
            .items()
            .iter()
            .filter(|(_, s)| matches!(s, BatchItemState::Skipped { .. }))
            .map(|(id, _)| id.clone())
            .collect();

        Self {
            run_id: state.run_id().to_string(),
            started_at: state.created_at(),
            completed_at: state.updated_at(),
            completed_items,
            skipped_items,
            failed_items,
            total_attempts: state.attempt_count(),
            success: state.failed_items().is_empty(),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}

pub fn receipts_path(state_dir: &Path) -> PathBuf {
    state_dir.join("batch_receipts.jsonl")
}

pub fn append_receipt(state_dir: &Path, receipt: &BatchReceipt) -> Result<()> {
    let path = receipts_path(state_dir);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create state dir {}", parent.display()))?;
    }

    let line = serde_json::to_string(receipt).context("failed to serialize receipt to JSON")?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open receipts file {}", path.display()))?;

    use std::io::Write;
    writeln!(file, "{}", line).with_context(|| format!("failed to write receipt to {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_state_has_run_id() {
        let state = BatchRunState::new("run-1");
        assert_eq!(state.run_id(), "run-1");
        assert_eq!(state.attempt_count(), 0);
        assert!(state.items().is_empty());
    }

    #[test]
    fn mark_submitted_then_completed() {
        let mut state = BatchRunState::new("run-1");
        state.mark_submitted("doc-1", "job-1");
        assert!(matches!(state.item_state("doc-1"), Some(BatchItemState::Submitted { .. })));

        state.mark_completed("doc-1", "job-1");
        assert!(matches!(state.item_state("doc-1"), Some(BatchItemState::Completed { .. })));
    }

    #[test]
    fn mark_failed_records_last_error() {
        let mut state = BatchRunState::new("run-1");
        state.mark_failed("doc-1", Some("job-1"), "channel timeout");

        assert!(matches!(state.item_state("doc-1"), Some(BatchItemState::Failed { .. })));
        assert_eq!(state.last_error(), Some("channel timeout"));
    }

    #[test]
    fn is_complete_requires_all_items_terminal() {
        let mut state = BatchRunState::new("run-1");
        assert!(!state.is_complete());

        state.mark_submitted("doc-1", "job-1");
        assert!(!state.is_complete());

        state.mark_completed("doc-1", "job-1");
        assert!(state.is_complete());
    }

    #[test]
    fn resumable_items_excludes_terminal_states() {
        let mut state = BatchRunState::new("run-1");
        state.mark_pending("doc-1");
        state.mark_submitted("doc-2", "job-2");
        state.mark_completed("doc-3", "job-3");
        state.mark_failed("doc-4", Some("job-4"), "boom");

        let resumable = state.resumable_items();
        assert_eq!(resumable.len(), 2);
        assert!(resumable.contains(&"doc-1"));
        assert!(resumable.contains(&"doc-2"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let td = tempdir().expect("tempdir");
        let store = StateStore::new(td.path());

        let mut state = BatchRunState::new("run-1");
        state.mark_completed("doc-1", "job-1");
        store.save(&state).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded.run_id(), "run-1");
        assert!(matches!(loaded.item_state("doc-1"), Some(BatchItemState::Completed { .. })));
    }

    #[test]
    fn load_missing_state_errors() {
        let td = tempdir().expect("tempdir");
        let store = StateStore::new(td.path());
        assert!(store.load().is_err());
    }

    #[test]
    fn receipt_from_state_summarizes_outcomes() {
        let mut state = BatchRunState::new("run-1");
        state.mark_completed("doc-1", "job-1");
        state.mark_failed("doc-2", Some("job-2"), "boom");
        state.mark_skipped("doc-3", "no eligible channels");
        state.increment_attempts();

        let receipt = BatchReceipt::from_state(&state);
        assert_eq!(receipt.completed_items, vec!["doc-1".to_string()]);
        assert_eq!(receipt.failed_items, vec!["doc-2".to_string()]);
        assert_eq!(receipt.skipped_items, vec!["doc-3".to_string()]);
        assert!(!receipt.success);
        assert_eq!(receipt.total_attempts, 1);
    }

    #[test]
    fn append_receipt_writes_jsonl_line() {
        let td = tempdir().expect("tempdir");
        let mut state = BatchRunState::new("run-1");
        state.mark_completed("doc-1", "job-1");
        let receipt = BatchReceipt::from_state(&state);

        append_receipt(td.path(), &receipt).expect("append");

        let content = fs::read_to_string(receipts_path(td.path())).expect("read");
        assert_eq!(content.lines().count(), 1);
    }
}
