use serde::Serialize;

use crate::error::Result;
use crate::kubectl::{Kubectl, Presence, ResourceSummary};
use crate::ledger::{Ledger, LedgerEntry};

/// Read-only view of one namespace plus what kdeploy last did there.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub namespace: String,
    pub exists: bool,
    pub resources: Vec<ResourceSummary>,
    /// Most recent ledger entry per phase, oldest first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub last_runs: Vec<LedgerEntry>,
}

impl StatusReport {
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

/// Query the namespace. A missing namespace is reported as zero resources,
/// not as an error; only an unreachable cluster fails.
pub fn namespace_status(kubectl: &Kubectl<'_>, namespace: &str) -> Result<StatusReport> {
    let exists = kubectl.namespace_exists(namespace)? == Presence::Found;
    let resources = if exists {
        kubectl.list_resources(namespace)?
    } else {
        Vec::new()
    };
    Ok(StatusReport {
        namespace: namespace.to_string(),
        exists,
        resources,
        last_runs: Vec::new(),
    })
}

/// Latest entry for each distinct phase, in the order phases first appeared.
pub fn latest_per_phase(ledger: &Ledger) -> Vec<LedgerEntry> {
    let mut latest: Vec<LedgerEntry> = Vec::new();
    for entry in &ledger.entries {
        match latest.iter_mut().find(|e| e.phase == entry.phase) {
            Some(slot) => *slot = entry.clone(),
            None => latest.push(entry.clone()),
        }
    }
    latest
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
