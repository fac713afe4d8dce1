use serde::Serialize;

use crate::config::{PhaseConfig, Settings};
use crate::error::{DeployError, Result};
use crate::kubectl::Kubectl;
use crate::readiness::{ReadinessGate, TargetReport};
use crate::types::Stage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: String,
    pub stage: Stage,
    /// Manifest directories applied, in order.
    pub applied: Vec<String>,
    pub ready: Vec<TargetReport>,
    /// True when `--resume` skipped an already converged phase.
    pub skipped: bool,
}

impl PhaseReport {
    pub fn skipped(phase: &PhaseConfig) -> Self {
        Self {
            phase: phase.name.clone(),
            stage: phase.stage,
            applied: Vec::new(),
            ready: Vec::new(),
            skipped: true,
        }
    }
}

/// Applies the manifest directories of one phase, then blocks on the phase's
/// readiness targets.
pub struct ManifestApplier<'a> {
    settings: &'a Settings,
    kubectl: &'a Kubectl<'a>,
}

impl<'a> ManifestApplier<'a> {
    pub fn new(settings: &'a Settings, kubectl: &'a Kubectl<'a>) -> Self {
        Self { settings, kubectl }
    }

    /// Every manifest directory must exist before the first mutation.
    pub fn check_dirs<'p>(&self, phases: impl IntoIterator<Item = &'p PhaseConfig>) -> Result<()> {
        for phase in phases {
            for rel in &phase.manifest_dirs {
                let dir = self.settings.manifest_dir(rel);
                if !dir.exists() {
                    return Err(DeployError::ManifestDirMissing {
                        phase: phase.name.clone(),
                        path: dir.display().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn apply_phase(&self, phase: &PhaseConfig) -> Result<PhaseReport> {
        let namespace = self.settings.namespace();
        tracing::info!(phase = %phase.name, stage = %phase.stage, "applying phase");

        let mut applied = Vec::with_capacity(phase.manifest_dirs.len());
        for rel in &phase.manifest_dirs {
            let dir = self.settings.manifest_dir(rel);
            let out = self.kubectl.apply_path(&dir, namespace)?;
            if !out.success() {
                return Err(DeployError::ApplyFailed {
                    phase: phase.name.clone(),
                    source_path: dir.display().to_string(),
                    detail: out.detail(),
                });
            }
            tracing::debug!(phase = %phase.name, dir = %dir.display(), "applied");
            applied.push(rel.display().to_string());
        }

        let ready = ReadinessGate::new(self.kubectl, namespace).wait_all(&phase.readiness)?;

        Ok(PhaseReport {
            phase: phase.name.clone(),
            stage: phase.stage,
            applied,
            ready,
            skipped: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
