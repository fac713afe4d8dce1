use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    // -----------------------------------------------------------------------
    // Configuration (always detected before any cluster mutation)
    // -----------------------------------------------------------------------
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unknown plan '{0}': PLAN must be starter, pro, or enterprise.")]
    UnknownPlan(String),

    #[error("invalid tenant slug '{0}': must be lowercase alphanumeric with hyphens, at most 53 characters")]
    InvalidSlug(String),

    #[error("manifest directory not found for phase '{phase}': {path}")]
    ManifestDirMissing { phase: String, path: String },

    #[error("template directory not found: {0}")]
    TemplateDirMissing(String),

    #[error("template '{file}' has unresolved placeholders: {}", .tokens.join(", "))]
    UnresolvedPlaceholders { file: String, tokens: Vec<String> },

    #[error("template '{file}' is malformed at byte {offset}: {reason}")]
    TemplateParse {
        file: String,
        offset: usize,
        reason: String,
    },

    #[error("rendered '{file}' escapes tenant namespace '{namespace}': {resource}")]
    IsolationViolation {
        file: String,
        namespace: String,
        resource: String,
    },

    #[error("rendered '{file}' has a non-string value at {field} (quote the placeholder)")]
    NonStringField { file: String, field: String },

    #[error("required tool '{0}' not found on PATH")]
    ToolNotFound(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("refusing to delete namespace '{0}' without --yes")]
    ConfirmationRequired(String),

    // -----------------------------------------------------------------------
    // Build
    // -----------------------------------------------------------------------
    #[error("image build failed for service '{service}': {detail}")]
    BuildFailed { service: String, detail: String },

    #[error("loading image for service '{service}' into cluster '{cluster}' failed: {detail}")]
    LoadFailed {
        service: String,
        cluster: String,
        detail: String,
    },

    // -----------------------------------------------------------------------
    // Apply
    // -----------------------------------------------------------------------
    #[error("apply failed in phase '{phase}' for {source_path}: {detail}")]
    ApplyFailed {
        phase: String,
        source_path: String,
        detail: String,
    },

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------
    #[error("readiness target {target} timed out after {timeout_secs}s")]
    ReadinessTimeout { target: String, timeout_secs: u64 },

    #[error("readiness target {0} not found")]
    TargetNotFound(String),

    #[error("rollout of {target} failed: {detail}")]
    RolloutFailed { target: String, detail: String },

    // -----------------------------------------------------------------------
    // Run-level wrappers
    // -----------------------------------------------------------------------
    #[error("phase '{phase}' failed: {cause}")]
    PhaseFailed {
        phase: String,
        cause: Box<DeployError>,
    },

    #[error("deleting namespace '{namespace}' failed: {detail}")]
    DeleteFailed { namespace: String, detail: String },

    // -----------------------------------------------------------------------
    // Cluster queries
    // -----------------------------------------------------------------------
    #[error("cluster query failed: {0}")]
    ClusterUnreachable(String),

    #[error("failed to spawn '{program}': {detail}")]
    Spawn { program: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// Attach the phase name to an error raised while running that phase.
    pub fn in_phase(self, phase: &str) -> Self {
        DeployError::PhaseFailed {
            phase: phase.to_string(),
            cause: Box::new(self),
        }
    }

    /// The innermost error, looking through phase wrappers.
    pub fn root(&self) -> &DeployError {
        match self {
            DeployError::PhaseFailed { cause, .. } => cause.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
