//! Blocks phase advancement until every readiness target has rolled out.
//!
//! Targets are waited on one after another; all of them must report Ready.
//! There is no retry: a timed-out target ends the run so an operator can look
//! at the cluster and re-invoke the phase.

use std::time::Instant;

use serde::Serialize;

use crate::error::{DeployError, Result};
use crate::kubectl::{self, Kubectl, Presence};
use crate::types::ReadinessTarget;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub target: String,
    pub namespace: String,
    pub waited_ms: u64,
}

pub struct ReadinessGate<'a> {
    kubectl: &'a Kubectl<'a>,
    default_namespace: &'a str,
}

impl<'a> ReadinessGate<'a> {
    pub fn new(kubectl: &'a Kubectl<'a>, default_namespace: &'a str) -> Self {
        Self {
            kubectl,
            default_namespace,
        }
    }

    /// Wait for every target in order. Returns on the first failure.
    pub fn wait_all(&self, targets: &[ReadinessTarget]) -> Result<Vec<TargetReport>> {
        targets.iter().map(|t| self.wait(t)).collect()
    }

    pub fn wait(&self, target: &ReadinessTarget) -> Result<TargetReport> {
        let namespace = target.namespace_or(self.default_namespace);
        let reference = target.reference();
        let label = format!("{reference} in namespace {namespace}");

        if self.kubectl.get(&reference, namespace)? == Presence::Missing {
            return Err(DeployError::TargetNotFound(label));
        }

        tracing::info!(target = %reference, %namespace, timeout_secs = target.timeout_secs, "waiting for rollout");
        let started = Instant::now();
        let out = self.kubectl.rollout_status(target, namespace)?;
        let waited_ms = started.elapsed().as_millis() as u64;

        if out.success() {
            tracing::info!(target = %reference, waited_ms, "ready");
            return Ok(TargetReport {
                target: reference,
                namespace: namespace.to_string(),
                waited_ms,
            });
        }
        if kubectl::is_rollout_timeout(&out) {
            return Err(DeployError::ReadinessTimeout {
                target: label,
                timeout_secs: target.timeout_secs,
            });
        }
        Err(DeployError::RolloutFailed {
            target: label,
            detail: out.detail(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::ScriptedRunner;
    use crate::runner::CommandOutput;
    use crate::types::WorkloadKind;

    fn targets() -> Vec<ReadinessTarget> {
        vec![
            ReadinessTarget::new(WorkloadKind::StatefulSet, "postgres"),
            ReadinessTarget::new(WorkloadKind::Deployment, "redis"),
        ]
    }

    #[test]
    fn waits_on_targets_sequentially() {
        let runner = ScriptedRunner::succeeding();
        let kubectl = Kubectl::new("kubectl", &runner);
        let reports = ReadinessGate::new(&kubectl, "chatflow")
            .wait_all(&targets())
            .unwrap();
        assert_eq!(reports.len(), 2);

        let lines = runner.lines();
        assert_eq!(
            lines,
            [
                "kubectl get statefulset/postgres -n chatflow -o name",
                "kubectl rollout status statefulset/postgres -n chatflow --timeout=120s",
                "kubectl get deployment/redis -n chatflow -o name",
                "kubectl rollout status deployment/redis -n chatflow --timeout=120s",
            ]
        );
    }

    #[test]
    fn missing_target_is_not_a_timeout() {
        let runner = ScriptedRunner::new(|inv| {
            if inv.has_arg("get") {
                CommandOutput::failed(1, "Error from server (NotFound): statefulsets.apps \"postgres\" not found")
            } else {
                CommandOutput::ok("")
            }
        });
        let kubectl = Kubectl::new("kubectl", &runner);
        let err = ReadinessGate::new(&kubectl, "chatflow")
            .wait_all(&targets())
            .unwrap_err();
        assert!(matches!(err, DeployError::TargetNotFound(ref t) if t.contains("statefulset/postgres")));
        // never waited on anything
        assert!(runner.lines().iter().all(|l| !l.contains("rollout")));
    }

    #[test]
    fn timeout_stops_at_first_unready_target() {
        let runner = ScriptedRunner::new(|inv| {
            if inv.has_arg("rollout") && inv.has_arg("statefulset/postgres") {
                CommandOutput::failed(1, "error: timed out waiting for the condition")
            } else {
                CommandOutput::ok("")
            }
        });
        let kubectl = Kubectl::new("kubectl", &runner);
        let err = ReadinessGate::new(&kubectl, "chatflow")
            .wait_all(&targets())
            .unwrap_err();
        match err {
            DeployError::ReadinessTimeout {
                target,
                timeout_secs,
            } => {
                assert!(target.contains("statefulset/postgres"));
                assert_eq!(timeout_secs, 120);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(runner.lines().iter().all(|l| !l.contains("redis")));
    }

    #[test]
    fn killed_by_deadline_counts_as_timeout() {
        let runner = ScriptedRunner::new(|inv| {
            if inv.has_arg("rollout") {
                CommandOutput::timed_out()
            } else {
                CommandOutput::ok("")
            }
        });
        let kubectl = Kubectl::new("kubectl", &runner);
        let err = ReadinessGate::new(&kubectl, "chatflow")
            .wait(&targets()[1])
            .unwrap_err();
        assert!(matches!(err, DeployError::ReadinessTimeout { .. }));
    }

    #[test]
    fn target_namespace_overrides_default() {
        let runner = ScriptedRunner::succeeding();
        let kubectl = Kubectl::new("kubectl", &runner);
        let mut target = ReadinessTarget::new(WorkloadKind::Deployment, "ingress-nginx-controller");
        target.namespace = Some("ingress-nginx".to_string());
        let report = ReadinessGate::new(&kubectl, "chatflow").wait(&target).unwrap();
        assert_eq!(report.namespace, "ingress-nginx");
        assert!(runner.lines()[1].contains("-n ingress-nginx"));
    }

    #[test]
    fn other_rollout_failures_carry_detail() {
        let runner = ScriptedRunner::new(|inv| {
            if inv.has_arg("rollout") {
                CommandOutput::failed(1, "error: deployment \"redis\" exceeded its progress deadline")
            } else {
                CommandOutput::ok("")
            }
        });
        let kubectl = Kubectl::new("kubectl", &runner);
        let err = ReadinessGate::new(&kubectl, "chatflow")
            .wait(&targets()[1])
            .unwrap_err();
        assert!(matches!(err, DeployError::RolloutFailed { ref detail, .. } if detail.contains("progress deadline")));
    }
}
