use crate::error::{DeployError, Result};
use crate::paths;
use crate::types::{ReadinessTarget, Stage, WorkloadKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ImagesConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImagesConfig {
    #[serde(default = "default_registry")]
    pub registry: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    /// kind cluster the images are loaded into.
    #[serde(default = "default_cluster")]
    pub cluster: String,
    #[serde(default = "default_parallel_builds")]
    pub parallel_builds: bool,
}

fn default_registry() -> String {
    "chatflow".to_string()
}

fn default_tag() -> String {
    "v1".to_string()
}

fn default_cluster() -> String {
    "kind".to_string()
}

fn default_parallel_builds() -> bool {
    true
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            tag: default_tag(),
            cluster: default_cluster(),
            parallel_builds: default_parallel_builds(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub name: String,
    /// Docker build context, relative to the project root.
    pub build_context: PathBuf,
}

// ---------------------------------------------------------------------------
// PhaseConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    pub name: String,
    pub stage: Stage,
    /// Directories under `manifests_dir`, applied in order.
    #[serde(default)]
    pub manifest_dirs: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness: Vec<ReadinessTarget>,
}

// ---------------------------------------------------------------------------
// TenantConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantConfig {
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    /// Data key holding the database password in the tenant credential Secret.
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("tenant-template")
}

fn default_secret_key() -> String {
    "password".to_string()
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            template_dir: default_template_dir(),
            secret_key: default_secret_key(),
        }
    }
}

// ---------------------------------------------------------------------------
// ToolsConfig
// ---------------------------------------------------------------------------

/// Executables used to talk to the cluster and the container runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    #[serde(default = "default_docker")]
    pub docker: String,
    #[serde(default = "default_kind")]
    pub kind: String,
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_docker() -> String {
    "docker".to_string()
}

fn default_kind() -> String {
    "kind".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            docker: default_docker(),
            kind: default_kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: String,
    /// Namespace every phase applies into and `teardown` deletes.
    pub namespace: String,
    #[serde(default = "default_manifests_dir")]
    pub manifests_dir: PathBuf,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
    #[serde(default)]
    pub tenant: TenantConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_version() -> u32 {
    1
}

fn default_manifests_dir() -> PathBuf {
    PathBuf::from("k8s")
}

/// Values supplied at the CLI boundary that override the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub registry: Option<String>,
    pub image_tag: Option<String>,
    pub cluster: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::chatflow()
    }
}

impl Config {
    /// The realtime chat platform layout: four backend services and a frontend
    /// in front of postgres, redis and minio.
    pub fn chatflow() -> Self {
        let services = [
            "chat-service",
            "presence-service",
            "notification-service",
            "file-service",
            "frontend",
        ]
        .iter()
        .map(|name| ServiceConfig {
            name: name.to_string(),
            build_context: PathBuf::from("app").join(name),
        })
        .collect();

        let phase = |name: &str, stage: Stage, dirs: &[&str], readiness: Vec<ReadinessTarget>| PhaseConfig {
            name: name.to_string(),
            stage,
            manifest_dirs: dirs.iter().map(|d| PathBuf::from(*d)).collect(),
            readiness,
        };

        let phases = vec![
            phase("namespace", Stage::Infra, &["namespace"], vec![]),
            phase("config", Stage::Infra, &["secrets", "configmaps"], vec![]),
            phase(
                "infrastructure",
                Stage::Infra,
                &["infrastructure"],
                vec![
                    ReadinessTarget::new(WorkloadKind::StatefulSet, "postgres"),
                    ReadinessTarget::new(WorkloadKind::Deployment, "redis"),
                    ReadinessTarget::new(WorkloadKind::StatefulSet, "minio"),
                ],
            ),
            phase(
                "applications",
                Stage::Apps,
                &["deployments", "services"],
                vec![
                    ReadinessTarget::new(WorkloadKind::Deployment, "chat-service"),
                    ReadinessTarget::new(WorkloadKind::Deployment, "presence-service"),
                    ReadinessTarget::new(WorkloadKind::Deployment, "notification-service"),
                    ReadinessTarget::new(WorkloadKind::Deployment, "file-service"),
                    ReadinessTarget::new(WorkloadKind::Deployment, "frontend"),
                ],
            ),
            phase("routing", Stage::Apps, &["hpa", "ingress"], vec![]),
        ];

        Self {
            version: 1,
            project: "chatflow".to_string(),
            namespace: "chatflow".to_string(),
            manifests_dir: default_manifests_dir(),
            images: ImagesConfig::default(),
            services,
            phases,
            tenant: TenantConfig::default(),
            tools: ToolsConfig::default(),
        }
    }

    /// Load `kdeploy.yaml` from `root`, falling back to the built-in layout.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(registry) = &overrides.registry {
            self.images.registry = registry.clone();
        }
        if let Some(tag) = &overrides.image_tag {
            self.images.tag = tag.clone();
        }
        if let Some(cluster) = &overrides.cluster {
            self.images.cluster = cluster.clone();
        }
    }

    pub fn phases_for(&self, stage: Stage) -> impl Iterator<Item = &PhaseConfig> {
        self.phases.iter().filter(move |p| p.stage == stage)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let error = |message: String| ConfigWarning {
            level: WarnLevel::Error,
            message,
        };
        let warning = |message: String| ConfigWarning {
            level: WarnLevel::Warning,
            message,
        };

        if self.namespace.trim().is_empty() {
            warnings.push(error("namespace must not be empty".to_string()));
        }
        if self.images.registry.trim().is_empty() {
            warnings.push(error("images.registry must not be empty".to_string()));
        }
        if self.images.tag.trim().is_empty() {
            warnings.push(error("images.tag must not be empty".to_string()));
        }
        if self.tenant.secret_key.trim().is_empty() {
            warnings.push(error("tenant.secret_key must not be empty".to_string()));
        }

        // 1. Service names are identities
        if self.services.is_empty() {
            warnings.push(warning("no services configured; build is a no-op".to_string()));
        }
        let mut seen = HashSet::new();
        for svc in &self.services {
            if !seen.insert(svc.name.as_str()) {
                warnings.push(error(format!("duplicate service '{}'", svc.name)));
            }
        }

        // 2. Phases: unique names, infra before apps
        let mut seen = HashSet::new();
        let mut apps_seen = false;
        for phase in &self.phases {
            if !seen.insert(phase.name.as_str()) {
                warnings.push(error(format!("duplicate phase '{}'", phase.name)));
            }
            match phase.stage {
                Stage::Apps => apps_seen = true,
                Stage::Infra if apps_seen => warnings.push(error(format!(
                    "infra phase '{}' is declared after an apps phase",
                    phase.name
                ))),
                Stage::Infra => {}
            }
            if phase.manifest_dirs.is_empty() {
                warnings.push(warning(format!(
                    "phase '{}' has no manifest directories",
                    phase.name
                )));
            }

            // 3. Readiness timeouts
            for target in &phase.readiness {
                if target.timeout_secs == 0 {
                    warnings.push(error(format!(
                        "readiness target {} in phase '{}' has a zero timeout",
                        target, phase.name
                    )));
                } else if target.timeout_secs > 1800 {
                    warnings.push(warning(format!(
                        "readiness target {} in phase '{}' waits {}s (>30m is unusual)",
                        target, phase.name, target.timeout_secs
                    )));
                }
            }
        }

        warnings
    }

    /// Fail with the first error-level finding, if any.
    pub fn ensure_valid(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            Some(w) => Err(DeployError::InvalidConfig(w.message)),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Fully resolved run configuration. Built once at the CLI boundary and
/// passed by reference to every component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub config: Config,
}

impl Settings {
    pub fn new(root: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn manifest_dir(&self, rel: &Path) -> PathBuf {
        self.root.join(&self.config.manifests_dir).join(rel)
    }

    pub fn template_dir(&self) -> PathBuf {
        self.root.join(&self.config.tenant.template_dir)
    }

    pub fn build_context(&self, service: &ServiceConfig) -> PathBuf {
        self.root.join(&service.build_context)
    }

    /// `{registry}/{service}:{tag}`
    pub fn image_ref(&self, service: &str) -> String {
        format!(
            "{}/{}:{}",
            self.config.images.registry, service, self.config.images.tag
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
