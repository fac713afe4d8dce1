//! Tenant provisioning: template directory + slug + plan -> isolated namespace.
//!
//! Order of operations for `provision`:
//!
//! 1. slug and plan are validated when the [`TenantRequest`] is built
//! 2. every template is parsed and rendered with a redacted credential, then
//!    checked for isolation (nothing touches the cluster before this passes)
//! 3. the credential is read from the tenant Secret, or generated
//! 4. templates are rendered for real and applied one file at a time via stdin
//!
//! There is no rollback. A partial apply is recovered by re-running, which
//! reuses the stored credential.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{DeployError, Result};
use crate::io;
use crate::kubectl::Kubectl;
use crate::paths;
use crate::plan::{Plan, Quota};
use crate::runner::{self, CommandRunner};
use crate::status::{self, StatusReport};
use crate::template::{Substitutions, Template};

const PASSWORD_LEN: usize = 32;
const REDACTED: &str = "<redacted>";

/// Phase name reported when a tenant apply fails.
pub const TENANT_PHASE: &str = "tenant";

// ---------------------------------------------------------------------------
// TenantRequest
// ---------------------------------------------------------------------------

/// A validated slug + plan pair. Constructing one is the only validation
/// step; everything downstream can assume both are well formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRequest {
    slug: String,
    plan: Plan,
}

impl TenantRequest {
    pub fn new(slug: &str, plan: &str) -> Result<Self> {
        paths::validate_slug(slug)?;
        let plan = plan.parse()?;
        Ok(Self {
            slug: slug.to_string(),
            plan,
        })
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn plan(&self) -> Plan {
        self.plan
    }

    pub fn namespace(&self) -> String {
        paths::tenant_namespace(&self.slug)
    }

    pub fn secret_name(&self) -> String {
        format!("{}-db-credentials", self.slug)
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Generated,
    Reused,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedManifest {
    pub file: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantReport {
    pub slug: String,
    pub namespace: String,
    pub plan: Plan,
    pub quota: Quota,
    pub secret_name: String,
    pub credential: CredentialSource,
    /// Template files applied, in order.
    pub applied: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanRow {
    pub plan: Plan,
    #[serde(flatten)]
    pub quota: Quota,
}

/// The static plan table, in tier order.
pub fn plan_table() -> Vec<PlanRow> {
    Plan::all()
        .iter()
        .map(|plan| PlanRow {
            plan: *plan,
            quota: plan.quota(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// TenantEngine
// ---------------------------------------------------------------------------

pub struct TenantEngine<'a> {
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
}

impl<'a> TenantEngine<'a> {
    pub fn new(settings: &'a Settings, runner: &'a dyn CommandRunner) -> Self {
        Self { settings, runner }
    }

    fn kubectl(&self) -> Kubectl<'a> {
        Kubectl::new(self.settings.config.tools.kubectl.as_str(), self.runner)
    }

    fn ensure_kubectl(&self) -> Result<()> {
        if self.runner.is_dry_run() {
            return Ok(());
        }
        runner::ensure_tools([self.settings.config.tools.kubectl.as_str()])
    }

    /// Every value a template may reference. All tokens are always present.
    pub fn substitutions(&self, request: &TenantRequest, password: &str) -> Substitutions {
        let quota = request.plan.quota();
        let images = &self.settings.config.images;
        [
            ("TENANT_SLUG", request.slug.clone()),
            ("TENANT_NAMESPACE", request.namespace()),
            ("PLAN_VALUE", request.plan.to_string()),
            ("REQ_CPU_VALUE", quota.requests_cpu.to_string()),
            ("REQ_MEMORY_VALUE", quota.requests_memory.to_string()),
            ("LIMIT_CPU_VALUE", quota.limits_cpu.to_string()),
            ("LIMIT_MEMORY_VALUE", quota.limits_memory.to_string()),
            ("MAX_PODS_VALUE", quota.max_pods.to_string()),
            ("MAX_SERVICES_VALUE", quota.max_services.to_string()),
            ("DB_PASSWORD_VALUE", password.to_string()),
            ("DB_SECRET_NAME", request.secret_name()),
            ("DB_SECRET_KEY", self.settings.config.tenant.secret_key.clone()),
            ("REGISTRY", images.registry.clone()),
            ("IMAGE_TAG", images.tag.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Parse every `*.yaml`/`*.yml` file in the template directory, sorted by
    /// file name.
    pub fn load_templates(&self) -> Result<Vec<Template>> {
        let dir = self.settings.template_dir();
        if !dir.is_dir() {
            return Err(DeployError::TemplateDirMissing(dir.display().to_string()));
        }
        let files = io::yaml_files(&dir)?;
        if files.is_empty() {
            return Err(DeployError::TemplateDirMissing(format!(
                "{} (no *.yaml files)",
                dir.display()
            )));
        }
        files.iter().map(|f| Template::load(f)).collect()
    }

    /// Render every template, then check isolation. Nothing is returned
    /// unless all files pass.
    fn render_all(
        &self,
        request: &TenantRequest,
        templates: &[Template],
        password: &str,
    ) -> Result<Vec<RenderedManifest>> {
        let values = self.substitutions(request, password);
        let rendered = templates
            .iter()
            .map(|t| {
                Ok(RenderedManifest {
                    file: t.name().to_string(),
                    content: t.render(&values)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let namespace = request.namespace();
        for manifest in &rendered {
            check_isolation(&manifest.file, &manifest.content, &namespace)?;
            check_string_fields(&manifest.file, &manifest.content)?;
        }
        Ok(rendered)
    }

    /// Rendered manifests with the credential replaced by a marker. Never
    /// touches the cluster.
    pub fn render_preview(&self, request: &TenantRequest) -> Result<Vec<RenderedManifest>> {
        let templates = self.load_templates()?;
        self.render_all(request, &templates, REDACTED)
    }

    pub fn provision(&self, request: &TenantRequest) -> Result<TenantReport> {
        let templates = self.load_templates()?;
        self.render_all(request, &templates, REDACTED)?;
        self.ensure_kubectl()?;

        let namespace = request.namespace();
        let secret_name = request.secret_name();
        let kubectl = self.kubectl();

        let (password, credential) = match kubectl.secret_value(
            &namespace,
            &secret_name,
            &self.settings.config.tenant.secret_key,
        )? {
            Some(existing) if !existing.is_empty() => (existing, CredentialSource::Reused),
            _ => (generate_password(), CredentialSource::Generated),
        };
        tracing::info!(tenant = %request.slug, %namespace, plan = %request.plan, credential = ?credential, "provisioning tenant");

        let rendered = self.render_all(request, &templates, &password)?;
        let mut applied = Vec::with_capacity(rendered.len());
        for manifest in &rendered {
            let out = kubectl.apply_stdin(&manifest.content)?;
            if !out.success() {
                return Err(DeployError::ApplyFailed {
                    phase: TENANT_PHASE.to_string(),
                    source_path: manifest.file.clone(),
                    detail: out.detail(),
                });
            }
            tracing::debug!(tenant = %request.slug, file = %manifest.file, "applied");
            applied.push(manifest.file.clone());
        }

        Ok(TenantReport {
            slug: request.slug.clone(),
            namespace,
            plan: request.plan,
            quota: request.plan.quota(),
            secret_name,
            credential,
            applied,
            dry_run: self.runner.is_dry_run(),
        })
    }

    pub fn status(&self, slug: &str) -> Result<StatusReport> {
        paths::validate_slug(slug)?;
        self.ensure_kubectl()?;
        status::namespace_status(&self.kubectl(), &paths::tenant_namespace(slug))
    }

    /// Delete the tenant namespace. The credential Secret goes with it.
    pub fn teardown(&self, slug: &str, confirmed: bool) -> Result<String> {
        paths::validate_slug(slug)?;
        let namespace = paths::tenant_namespace(slug);
        if !confirmed {
            return Err(DeployError::ConfirmationRequired(namespace));
        }
        self.ensure_kubectl()?;
        tracing::warn!(tenant = %slug, %namespace, "deleting tenant namespace");
        let out = self.kubectl().delete_namespace(&namespace)?;
        if !out.success() {
            return Err(DeployError::DeleteFailed {
                namespace,
                detail: out.detail(),
            });
        }
        Ok(namespace)
    }
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Every document must be the tenant Namespace itself or live inside it.
/// Cluster-scoped kinds have no namespace and are rejected.
fn check_isolation(file: &str, content: &str, namespace: &str) -> Result<()> {
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let kind = value["kind"].as_str().unwrap_or("<no kind>");
        let name = value["metadata"]["name"].as_str().unwrap_or("<no name>");
        let violation = |detail: String| DeployError::IsolationViolation {
            file: file.to_string(),
            namespace: namespace.to_string(),
            resource: detail,
        };

        if kind == "Namespace" {
            if name != namespace {
                return Err(violation(format!("Namespace/{name}")));
            }
            continue;
        }
        match value["metadata"]["namespace"].as_str() {
            Some(ns) if ns == namespace => {}
            Some(ns) => return Err(violation(format!("{kind}/{name} in namespace '{ns}'"))),
            None => return Err(violation(format!("{kind}/{name} has no metadata.namespace"))),
        }
    }
    Ok(())
}

/// Labels, annotations and container env values must be YAML strings. An
/// unquoted placeholder such as `tenant: {{ TENANT_SLUG }}` turns a slug like
/// `123` into a number, which the API server rejects mid-apply.
fn check_string_fields(file: &str, content: &str) -> Result<()> {
    use serde_yaml::Value;

    let non_string = |field: String| DeployError::NonStringField {
        file: file.to_string(),
        field,
    };
    let check_map = |value: &Value, at: &str| -> Result<()> {
        if let Some(map) = value.as_mapping() {
            for (key, v) in map {
                if !v.is_string() {
                    let key = key.as_str().unwrap_or("?");
                    return Err(non_string(format!("{at}.{key}")));
                }
            }
        }
        Ok(())
    };

    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        for meta in ["metadata", "spec.template.metadata"] {
            let node = meta.split('.').fold(&value, |v, k| &v[k]);
            check_map(&node["labels"], &format!("{meta}.labels"))?;
            check_map(&node["annotations"], &format!("{meta}.annotations"))?;
        }
        let containers = value["spec"]["template"]["spec"]["containers"].as_sequence();
        for container in containers.into_iter().flatten() {
            let name = container["name"].as_str().unwrap_or("?");
            for env in container["env"].as_sequence().into_iter().flatten() {
                let value = &env["value"];
                if !value.is_null() && !value.is_string() {
                    let var = env["name"].as_str().unwrap_or("?");
                    return Err(non_string(format!("container {name} env {var}")));
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
