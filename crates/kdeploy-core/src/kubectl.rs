//! Typed wrapper over the kubectl invocations kdeploy needs.
//!
//! Every call goes through a [`CommandRunner`]; nothing here spawns processes
//! itself. Mutating calls use declarative `apply` so re-running a phase only
//! changes resources that drifted from the manifests.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use serde::Serialize;

use crate::error::{DeployError, Result};
use crate::runner::{CommandOutput, CommandRunner, Invocation};
use crate::types::ReadinessTarget;

/// Extra time granted to kubectl beyond its own `--timeout` before the
/// process is killed.
pub const DEADLINE_SLACK: Duration = Duration::from_secs(10);

/// Resource kinds reported by `status`.
const STATUS_KINDS: &str = "all,pvc,ingress,resourcequota";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Found,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSummary {
    pub kind: String,
    pub name: String,
    /// `ready/desired` for workloads, phase for pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<String>,
}

pub struct Kubectl<'a> {
    program: &'a str,
    runner: &'a dyn CommandRunner,
}

impl<'a> Kubectl<'a> {
    pub fn new(program: &'a str, runner: &'a dyn CommandRunner) -> Self {
        Self { program, runner }
    }

    fn run<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run(&Invocation::new(self.program, args))
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// `kubectl apply -f PATH -n NS`. PATH may be a file or a directory.
    pub fn apply_path(&self, path: &Path, namespace: &str) -> Result<CommandOutput> {
        self.run([
            "apply".to_string(),
            "-f".to_string(),
            path.display().to_string(),
            "-n".to_string(),
            namespace.to_string(),
        ])
    }

    /// `kubectl apply -f -` with the manifest on stdin, so rendered content
    /// (including credentials) never touches disk.
    pub fn apply_stdin(&self, manifest: &str) -> Result<CommandOutput> {
        self.runner
            .run(&Invocation::new(self.program, ["apply", "-f", "-"]).with_stdin(manifest))
    }

    pub fn delete_namespace(&self, namespace: &str) -> Result<CommandOutput> {
        self.run([
            "delete",
            "namespace",
            namespace,
            "--ignore-not-found",
            "--wait=true",
        ])
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn namespace_exists(&self, namespace: &str) -> Result<Presence> {
        let out = self.run(["get", "namespace", namespace, "-o", "name"])?;
        presence(out)
    }

    /// Look up `kind/name` in `namespace`.
    pub fn get(&self, reference: &str, namespace: &str) -> Result<Presence> {
        let out = self.run(["get", reference, "-n", namespace, "-o", "name"])?;
        presence(out)
    }

    /// `kubectl rollout status` bounded by the target's timeout, with a hard
    /// client-side deadline slightly beyond it.
    pub fn rollout_status(&self, target: &ReadinessTarget, namespace: &str) -> Result<CommandOutput> {
        let timeout = Duration::from_secs(target.timeout_secs);
        let invocation = Invocation::new(
            self.program,
            [
                "rollout".to_string(),
                "status".to_string(),
                target.reference(),
                "-n".to_string(),
                namespace.to_string(),
                format!("--timeout={}s", target.timeout_secs),
            ],
        )
        .with_deadline(timeout + DEADLINE_SLACK);
        self.runner.run(&invocation)
    }

    pub fn list_resources(&self, namespace: &str) -> Result<Vec<ResourceSummary>> {
        let out = self.run(["get", STATUS_KINDS, "-n", namespace, "-o", "json"])?;
        if !out.success() {
            return Err(DeployError::ClusterUnreachable(out.detail()));
        }
        parse_resource_list(&out.stdout)
    }

    /// Read and decode one key of a Secret. `None` if the Secret or key is absent.
    pub fn secret_value(&self, namespace: &str, name: &str, key: &str) -> Result<Option<String>> {
        let out = self.run(["get", "secret", name, "-n", namespace, "-o", "json"])?;
        if !out.success() {
            return match classify_failure(&out) {
                Presence::Missing => Ok(None),
                Presence::Found => Err(DeployError::ClusterUnreachable(out.detail())),
            };
        }
        if out.stdout.trim().is_empty() {
            return Ok(None);
        }
        let secret: serde_json::Value = serde_json::from_str(&out.stdout)?;
        let Some(encoded) = secret["data"][key].as_str() else {
            return Ok(None);
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DeployError::ClusterUnreachable(format!("secret {name} is not valid base64: {e}")))?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

// ---------------------------------------------------------------------------
// Output interpretation
// ---------------------------------------------------------------------------

fn presence(out: CommandOutput) -> Result<Presence> {
    if out.success() {
        return Ok(Presence::Found);
    }
    match classify_failure(&out) {
        Presence::Missing => Ok(Presence::Missing),
        Presence::Found => Err(DeployError::ClusterUnreachable(out.detail())),
    }
}

/// kubectl reports absent objects as `Error from server (NotFound)`.
/// Anything else (connection refused, forbidden) is a cluster problem.
fn classify_failure(out: &CommandOutput) -> Presence {
    if out.stderr.contains("NotFound") || out.stderr.contains("not found") {
        Presence::Missing
    } else {
        Presence::Found
    }
}

/// True if kubectl's own `--timeout` fired during `rollout status`.
pub fn is_rollout_timeout(out: &CommandOutput) -> bool {
    out.timed_out || out.stderr.contains("timed out waiting")
}

pub fn parse_resource_list(json: &str) -> Result<Vec<ResourceSummary>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let list: serde_json::Value = serde_json::from_str(json)?;
    let items = list["items"].as_array().cloned().unwrap_or_default();
    Ok(items.iter().map(summarize).collect())
}

fn summarize(item: &serde_json::Value) -> ResourceSummary {
    let kind = item["kind"].as_str().unwrap_or("Unknown").to_string();
    let name = item["metadata"]["name"].as_str().unwrap_or("").to_string();
    let ready = match kind.as_str() {
        "Deployment" | "StatefulSet" | "ReplicaSet" => {
            let ready = item["status"]["readyReplicas"].as_u64().unwrap_or(0);
            let desired = item["spec"]["replicas"].as_u64().unwrap_or(0);
            Some(format!("{ready}/{desired}"))
        }
        "DaemonSet" => {
            let ready = item["status"]["numberReady"].as_u64().unwrap_or(0);
            let desired = item["status"]["desiredNumberScheduled"].as_u64().unwrap_or(0);
            Some(format!("{ready}/{desired}"))
        }
        "Pod" => item["status"]["phase"].as_str().map(str::to_string),
        _ => None,
    };
    ResourceSummary { kind, name, ready }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
