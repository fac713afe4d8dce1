//! Phase sequencing for `all`, `build`, `infra`, `apps`, `status` and
//! `teardown`.
//!
//! Run shape:
//!
//! ```text
//! all   = build -> infra phases -> apps phases
//! build = build
//! infra = infra phases
//! apps  = precondition -> apps phases
//! ```
//!
//! Every configuration check (config validity, tools on PATH, manifest
//! directories, apps precondition) happens before the first mutation. After
//! that the first failure ends the run; nothing is rolled back.

use serde::Serialize;
use uuid::Uuid;

use crate::applier::{ManifestApplier, PhaseReport};
use crate::builder::{BuiltImage, ImageBuilder};
use crate::config::{PhaseConfig, Settings};
use crate::error::{DeployError, Result};
use crate::kubectl::{Kubectl, Presence};
use crate::ledger::{Ledger, LedgerWriter, Outcome};
use crate::runner::{self, CommandRunner};
use crate::status::{self, StatusReport};
use crate::types::Stage;

/// Ledger phase name used for the image build step.
pub const BUILD_PHASE: &str = "build";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployCommand {
    All,
    Build,
    Infra,
    Apps,
}

impl DeployCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            DeployCommand::All => "all",
            DeployCommand::Build => "build",
            DeployCommand::Infra => "infra",
            DeployCommand::Apps => "apps",
        }
    }

    pub fn builds_images(self) -> bool {
        matches!(self, DeployCommand::All | DeployCommand::Build)
    }

    pub fn stages(self) -> &'static [Stage] {
        match self {
            DeployCommand::All => Stage::all(),
            DeployCommand::Build => &[],
            DeployCommand::Infra => &[Stage::Infra],
            DeployCommand::Apps => &[Stage::Apps],
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip phases whose latest ledger outcome is `succeeded`.
    pub resume: bool,
}

/// Process-local record of one invocation, returned for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub command: String,
    pub dry_run: bool,
    pub images: Vec<BuiltImage>,
    pub phases: Vec<PhaseReport>,
}

impl RunSummary {
    pub fn completed_phases(&self) -> impl Iterator<Item = &str> {
        self.phases
            .iter()
            .filter(|p| !p.skipped)
            .map(|p| p.phase.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TeardownReport {
    pub namespace: String,
    pub dry_run: bool,
    pub ledger_cleared: bool,
}

pub struct Orchestrator<'a> {
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
}

impl<'a> Orchestrator<'a> {
    pub fn new(settings: &'a Settings, runner: &'a dyn CommandRunner) -> Self {
        Self { settings, runner }
    }

    fn kubectl(&self) -> Kubectl<'a> {
        Kubectl::new(self.settings.config.tools.kubectl.as_str(), self.runner)
    }

    fn ensure_tools(&self, command: DeployCommand) -> Result<()> {
        if self.runner.is_dry_run() {
            return Ok(());
        }
        let tools = &self.settings.config.tools;
        let mut needed = Vec::new();
        if command.builds_images() && !self.settings.config.services.is_empty() {
            needed.push(tools.docker.as_str());
            needed.push(tools.kind.as_str());
        }
        if !command.stages().is_empty() {
            needed.push(tools.kubectl.as_str());
        }
        runner::ensure_tools(needed)
    }

    pub fn run(&self, command: DeployCommand, options: RunOptions) -> Result<RunSummary> {
        let config = &self.settings.config;
        config.ensure_valid()?;
        self.ensure_tools(command)?;

        let phases: Vec<&PhaseConfig> = command
            .stages()
            .iter()
            .flat_map(|stage| config.phases_for(*stage))
            .collect();

        let kubectl = self.kubectl();
        let applier = ManifestApplier::new(self.settings, &kubectl);
        applier.check_dirs(phases.iter().copied())?;

        if command == DeployCommand::Apps {
            self.check_apps_precondition(&kubectl)?;
        }

        let mut ledger = if self.runner.is_dry_run() {
            LedgerWriter::ephemeral(command.as_str())
        } else {
            LedgerWriter::open(&self.settings.root, command.as_str())?
        };
        tracing::info!(command = command.as_str(), run_id = %ledger.run_id(), phases = phases.len(), "run started");

        let mut summary = RunSummary {
            run_id: ledger.run_id(),
            command: command.as_str().to_string(),
            dry_run: self.runner.is_dry_run(),
            images: Vec::new(),
            phases: Vec::new(),
        };

        if command.builds_images() {
            match ImageBuilder::new(self.settings, self.runner).run() {
                Ok(images) => {
                    ledger.record(BUILD_PHASE, Outcome::Succeeded, None)?;
                    summary.images = images;
                }
                Err(e) => {
                    ledger.record(BUILD_PHASE, Outcome::Failed, Some(e.to_string()))?;
                    return Err(e);
                }
            }
        }

        for phase in phases {
            if options.resume && ledger.ledger().is_converged(&phase.name) {
                tracing::info!(phase = %phase.name, "already converged, skipping");
                summary.phases.push(PhaseReport::skipped(phase));
                continue;
            }
            match applier.apply_phase(phase) {
                Ok(report) => {
                    ledger.record(&phase.name, Outcome::Succeeded, None)?;
                    summary.phases.push(report);
                }
                Err(e) => {
                    tracing::error!(phase = %phase.name, error = %e, "phase failed");
                    ledger.record(&phase.name, Outcome::Failed, Some(e.to_string()))?;
                    return Err(e.in_phase(&phase.name));
                }
            }
        }

        tracing::info!(command = command.as_str(), "run finished");
        Ok(summary)
    }

    /// `apps` assumes infra converged. Verify the namespace and every infra
    /// readiness target exist; whether they are ready is left to the first
    /// readiness wait.
    fn check_apps_precondition(&self, kubectl: &Kubectl<'_>) -> Result<()> {
        let namespace = self.settings.namespace();
        if kubectl.namespace_exists(namespace)? == Presence::Missing {
            return Err(DeployError::Precondition(format!(
                "namespace '{namespace}' does not exist; run `kdeploy infra` first"
            )));
        }
        for phase in self.settings.config.phases_for(Stage::Infra) {
            for target in &phase.readiness {
                let ns = target.namespace_or(namespace);
                if kubectl.get(&target.reference(), ns)? == Presence::Missing {
                    return Err(DeployError::Precondition(format!(
                        "infrastructure target {} (phase '{}') does not exist in namespace '{ns}'; run `kdeploy infra` first",
                        target.reference(),
                        phase.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn status(&self) -> Result<StatusReport> {
        if !self.runner.is_dry_run() {
            runner::ensure_tools([self.settings.config.tools.kubectl.as_str()])?;
        }
        let mut report = status::namespace_status(&self.kubectl(), self.settings.namespace())?;
        report.last_runs = status::latest_per_phase(&Ledger::load(&self.settings.root)?);
        Ok(report)
    }

    /// Delete the deploy namespace and everything in it. Irreversible, so the
    /// caller must pass explicit confirmation.
    pub fn teardown(&self, confirmed: bool) -> Result<TeardownReport> {
        let namespace = self.settings.namespace();
        if !confirmed {
            return Err(DeployError::ConfirmationRequired(namespace.to_string()));
        }
        let dry_run = self.runner.is_dry_run();
        if !dry_run {
            runner::ensure_tools([self.settings.config.tools.kubectl.as_str()])?;
        }

        tracing::warn!(%namespace, "deleting namespace");
        let out = self.kubectl().delete_namespace(namespace)?;
        if !out.success() {
            return Err(DeployError::DeleteFailed {
                namespace: namespace.to_string(),
                detail: out.detail(),
            });
        }

        let ledger_cleared = if dry_run {
            false
        } else {
            Ledger::clear(&self.settings.root)?
        };
        Ok(TeardownReport {
            namespace: namespace.to_string(),
            dry_run,
            ledger_cleared,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::runner::fake::ScriptedRunner;
    use crate::runner::{CommandOutput, DryRunRunner};
    use tempfile::TempDir;

    /// Project tree with every manifest dir and build context present, and
    /// tools pointed at programs that exist everywhere so PATH checks pass.
    fn project() -> (TempDir, Settings) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.images.parallel_builds = false;
        config.tools.kubectl = "sh".to_string();
        config.tools.docker = "sh".to_string();
        config.tools.kind = "sh".to_string();
        for phase in &config.phases {
            for rel in &phase.manifest_dirs {
                std::fs::create_dir_all(dir.path().join("k8s").join(rel)).unwrap();
            }
        }
        for svc in &config.services {
            std::fs::create_dir_all(dir.path().join(&svc.build_context)).unwrap();
        }
        let settings = Settings::new(dir.path(), config);
        (dir, settings)
    }

    fn position(lines: &[String], needle: &str) -> usize {
        lines
            .iter()
            .position(|l| l.contains(needle))
            .unwrap_or_else(|| panic!("'{needle}' not invoked: {lines:?}"))
    }

    #[cfg(unix)]
    #[test]
    fn applications_never_start_before_infrastructure_is_ready() {
        let (_dir, settings) = project();
        let runner = ScriptedRunner::succeeding();
        let summary = Orchestrator::new(&settings, &runner)
            .run(DeployCommand::Infra, RunOptions::default())
            .unwrap();
        assert_eq!(
            summary.completed_phases().collect::<Vec<_>>(),
            ["namespace", "config", "infrastructure"]
        );

        let runner = ScriptedRunner::succeeding();
        Orchestrator::new(&settings, &runner)
            .run(DeployCommand::All, RunOptions::default())
            .unwrap();
        let lines = runner.lines();
        let minio_ready = position(&lines, "rollout status statefulset/minio");
        let apps_apply = position(&lines, "k8s/deployments");
        assert!(minio_ready < apps_apply);
        let last_load = lines.iter().rposition(|l| l.contains("load docker-image")).unwrap();
        let first_apply = position(&lines, "apply -f");
        assert!(last_load < first_apply);
    }

    #[cfg(unix)]
    #[test]
    fn infrastructure_timeout_aborts_before_applications() {
        let (_dir, settings) = project();
        let runner = ScriptedRunner::new(|inv| {
            if inv.has_arg("rollout") && inv.has_arg("deployment/redis") {
                CommandOutput::failed(1, "error: timed out waiting for the condition")
            } else {
                CommandOutput::ok("")
            }
        });
        let err = Orchestrator::new(&settings, &runner)
            .run(DeployCommand::All, RunOptions::default())
            .unwrap_err();

        assert!(err.to_string().starts_with("phase 'infrastructure' failed"));
        assert!(matches!(err.root(), DeployError::ReadinessTimeout { .. }));
        assert!(runner.lines().iter().all(|l| !l.contains("k8s/deployments")));

        let ledger = Ledger::load(&settings.root).unwrap();
        assert_eq!(ledger.last_outcome("infrastructure"), Some(Outcome::Failed));
        assert!(ledger.is_converged("config"));
    }

    #[cfg(unix)]
    #[test]
    fn rerunning_infra_only_reapplies() {
        let (_dir, settings) = project();
        let first = ScriptedRunner::succeeding();
        let orchestrator = Orchestrator::new(&settings, &first);
        orchestrator.run(DeployCommand::Infra, RunOptions::default()).unwrap();

        let second = ScriptedRunner::succeeding();
        Orchestrator::new(&settings, &second)
            .run(DeployCommand::Infra, RunOptions::default())
            .unwrap();

        assert_eq!(first.lines(), second.lines());
        // everything besides reads and waits is a declarative apply
        for call in second.calls() {
            let verb = call.args[0].as_str();
            assert!(matches!(verb, "get" | "rollout" | "apply"), "unexpected: {call}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn resume_skips_converged_phases() {
        let (_dir, settings) = project();
        let failing = ScriptedRunner::new(|inv| {
            if inv.has_arg("rollout") && inv.has_arg("statefulset/minio") {
                CommandOutput::failed(1, "error: timed out waiting for the condition")
            } else {
                CommandOutput::ok("")
            }
        });
        assert!(Orchestrator::new(&settings, &failing)
            .run(DeployCommand::Infra, RunOptions::default())
            .is_err());

        let runner = ScriptedRunner::succeeding();
        let summary = Orchestrator::new(&settings, &runner)
            .run(DeployCommand::Infra, RunOptions { resume: true })
            .unwrap();
        assert!(summary.phases[0].skipped);
        assert!(summary.phases[1].skipped);
        assert!(!summary.phases[2].skipped);
        assert!(runner.lines().iter().all(|l| !l.contains("k8s/namespace")));
    }

    #[cfg(unix)]
    #[test]
    fn apps_requires_namespace() {
        let (_dir, settings) = project();
        let runner = ScriptedRunner::new(|inv| {
            if inv.has_arg("namespace") && inv.has_arg("get") {
                CommandOutput::failed(1, "Error from server (NotFound): namespaces \"chatflow\" not found")
            } else {
                CommandOutput::ok("")
            }
        });
        let err = Orchestrator::new(&settings, &runner)
            .run(DeployCommand::Apps, RunOptions::default())
            .unwrap_err();
        assert!(matches!(err, DeployError::Precondition(ref m) if m.contains("kdeploy infra")));
        assert!(runner.lines().iter().all(|l| !l.contains("apply")));
    }

    #[cfg(unix)]
    #[test]
    fn apps_requires_infra_targets_to_exist() {
        let (_dir, settings) = project();
        let runner = ScriptedRunner::new(|inv| {
            if inv.has_arg("statefulset/minio") {
                CommandOutput::failed(1, "Error from server (NotFound): statefulsets.apps \"minio\" not found")
            } else {
                CommandOutput::ok("")
            }
        });
        let err = Orchestrator::new(&settings, &runner)
            .run(DeployCommand::Apps, RunOptions::default())
            .unwrap_err();
        assert!(matches!(err, DeployError::Precondition(ref m) if m.contains("statefulset/minio")));
    }

    #[cfg(unix)]
    #[test]
    fn apps_waits_on_unready_target_and_names_it() {
        let (_dir, settings) = project();
        let runner = ScriptedRunner::new(|inv| {
            if inv.has_arg("rollout") && inv.has_arg("deployment/chat-service") {
                CommandOutput::failed(1, "error: timed out waiting for the condition")
            } else {
                CommandOutput::ok("")
            }
        });
        let err = Orchestrator::new(&settings, &runner)
            .run(DeployCommand::Apps, RunOptions::default())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("applications"));
        assert!(message.contains("deployment/chat-service"));
    }

    #[test]
    fn build_only_touches_images() {
        let (_dir, settings) = project();
        let runner = DryRunRunner::new(false);
        let summary = Orchestrator::new(&settings, &runner)
            .run(DeployCommand::Build, RunOptions::default())
            .unwrap();
        assert_eq!(summary.images.len(), 5);
        assert!(summary.phases.is_empty());
        assert!(runner.invocations().iter().all(|i| !i.has_arg("apply")));
        // dry runs leave no ledger behind
        assert!(!crate::paths::ledger_path(&settings.root).exists());
    }

    #[test]
    fn invalid_config_fails_before_any_command() {
        let (_dir, mut settings) = project();
        settings.config.namespace = String::new();
        let runner = ScriptedRunner::succeeding();
        assert!(Orchestrator::new(&settings, &runner)
            .run(DeployCommand::All, RunOptions::default())
            .is_err());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn teardown_requires_confirmation() {
        let (_dir, settings) = project();
        let runner = ScriptedRunner::succeeding();
        let err = Orchestrator::new(&settings, &runner).teardown(false).unwrap_err();
        assert!(matches!(err, DeployError::ConfirmationRequired(ref ns) if ns == "chatflow"));
        assert!(runner.calls().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn teardown_then_status_reports_nothing() {
        let (_dir, settings) = project();
        LedgerWriter::open(&settings.root, "infra")
            .unwrap()
            .record("namespace", Outcome::Succeeded, None)
            .unwrap();

        let runner = ScriptedRunner::new(|inv| {
            if inv.has_arg("get") && inv.has_arg("namespace") {
                CommandOutput::failed(1, "Error from server (NotFound): namespaces \"chatflow\" not found")
            } else {
                CommandOutput::ok("namespace \"chatflow\" deleted")
            }
        });
        let orchestrator = Orchestrator::new(&settings, &runner);
        let report = orchestrator.teardown(true).unwrap();
        assert!(report.ledger_cleared);
        assert_eq!(
            runner.lines()[0],
            "sh delete namespace chatflow --ignore-not-found --wait=true"
        );

        let status = orchestrator.status().unwrap();
        assert!(!status.exists);
        assert_eq!(status.resource_count(), 0);
        assert!(status.last_runs.is_empty());
    }
}
