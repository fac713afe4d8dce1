//! Durable record of phase outcomes, kept in `.kdeploy/runs.yaml`.
//!
//! The cluster stays the source of truth for resources; the ledger only
//! remembers what kdeploy did so `--resume` can skip phases that already
//! converged and `runs` can show what happened after an interrupted run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::Result;
use crate::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub run_id: Uuid,
    pub command: String,
    pub phase: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub entries: Vec<LedgerEntry>,
}

/// Maximum entries retained; older ones are dropped on save.
const MAX_ENTRIES: usize = 500;

impl Ledger {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::ledger_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&paths::ledger_path(root), data.as_bytes())
    }

    pub fn clear(root: &Path) -> Result<bool> {
        crate::io::remove_if_exists(&paths::ledger_path(root))
    }

    pub fn push(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
        if self.entries.len() > MAX_ENTRIES {
            let excess = self.entries.len() - MAX_ENTRIES;
            self.entries.drain(..excess);
        }
    }

    /// Latest recorded outcome for `phase`, if any.
    pub fn last_outcome(&self, phase: &str) -> Option<Outcome> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.phase == phase)
            .map(|e| e.outcome)
    }

    pub fn is_converged(&self, phase: &str) -> bool {
        self.last_outcome(phase) == Some(Outcome::Succeeded)
    }
}

// ---------------------------------------------------------------------------
// LedgerWriter
// ---------------------------------------------------------------------------

/// Appends entries for one run and persists after each one, so an interrupted
/// run still leaves a record of the phases it finished.
pub struct LedgerWriter {
    root: Option<PathBuf>,
    run_id: Uuid,
    command: String,
    ledger: Ledger,
}

impl LedgerWriter {
    pub fn open(root: &Path, command: &str) -> Result<Self> {
        Ok(Self {
            root: Some(root.to_path_buf()),
            run_id: Uuid::new_v4(),
            command: command.to_string(),
            ledger: Ledger::load(root)?,
        })
    }

    /// In-memory only; used for dry runs, which must leave no trace.
    pub fn ephemeral(command: &str) -> Self {
        Self {
            root: None,
            run_id: Uuid::new_v4(),
            command: command.to_string(),
            ledger: Ledger::default(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn record(&mut self, phase: &str, outcome: Outcome, detail: Option<String>) -> Result<()> {
        self.ledger.push(LedgerEntry {
            run_id: self.run_id,
            command: self.command.clone(),
            phase: phase.to_string(),
            outcome,
            detail,
            timestamp: Utc::now(),
        });
        match &self.root {
            Some(root) => self.ledger.save(root),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writer_persists_each_entry() {
        let dir = TempDir::new().unwrap();
        let mut writer = LedgerWriter::open(dir.path(), "infra").unwrap();
        writer.record("namespace", Outcome::Succeeded, None).unwrap();
        writer
            .record("config", Outcome::Failed, Some("admission webhook denied".into()))
            .unwrap();

        let ledger = Ledger::load(dir.path()).unwrap();
        assert_eq!(ledger.entries.len(), 2);
        assert_eq!(ledger.entries[0].command, "infra");
        assert_eq!(ledger.entries[0].run_id, ledger.entries[1].run_id);
        assert!(ledger.is_converged("namespace"));
        assert!(!ledger.is_converged("config"));
        assert!(!ledger.is_converged("infrastructure"));
    }

    #[test]
    fn latest_outcome_wins() {
        let dir = TempDir::new().unwrap();
        let mut first = LedgerWriter::open(dir.path(), "infra").unwrap();
        first.record("config", Outcome::Failed, None).unwrap();
        let mut second = LedgerWriter::open(dir.path(), "infra").unwrap();
        second.record("config", Outcome::Succeeded, None).unwrap();

        let ledger = Ledger::load(dir.path()).unwrap();
        assert_eq!(ledger.last_outcome("config"), Some(Outcome::Succeeded));
        assert_ne!(ledger.entries[0].run_id, ledger.entries[1].run_id);
    }

    #[test]
    fn ephemeral_writer_leaves_no_file() {
        let mut writer = LedgerWriter::ephemeral("all");
        writer.record("namespace", Outcome::Succeeded, None).unwrap();
        assert!(writer.ledger().is_converged("namespace"));
    }

    #[test]
    fn clear_removes_ledger() {
        let dir = TempDir::new().unwrap();
        let mut writer = LedgerWriter::open(dir.path(), "all").unwrap();
        writer.record("namespace", Outcome::Succeeded, None).unwrap();
        assert!(Ledger::clear(dir.path()).unwrap());
        assert!(Ledger::load(dir.path()).unwrap().entries.is_empty());
        assert!(!Ledger::clear(dir.path()).unwrap());
    }

    #[test]
    fn push_caps_history() {
        let mut ledger = Ledger::default();
        let run_id = Uuid::new_v4();
        for i in 0..(MAX_ENTRIES + 5) {
            ledger.push(LedgerEntry {
                run_id,
                command: "infra".into(),
                phase: format!("p{i}"),
                outcome: Outcome::Succeeded,
                detail: None,
                timestamp: Utc::now(),
            });
        }
        assert_eq!(ledger.entries.len(), MAX_ENTRIES);
        assert_eq!(ledger.entries[0].phase, "p5");
    }
}
