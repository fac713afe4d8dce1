use crate::error::{DeployError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// File and directory constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "kdeploy.yaml";
pub const STATE_DIR: &str = ".kdeploy";
pub const LEDGER_FILE: &str = "runs.yaml";

pub const TENANT_NAMESPACE_PREFIX: &str = "tenant-";

/// Namespaces are DNS labels (63 chars). Tenant resources are named
/// `{slug}-<suffix>`, so the slug stays well under that.
const MAX_TENANT_SLUG_LEN: usize = 53;

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn ledger_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(LEDGER_FILE)
}

pub fn tenant_namespace(slug: &str) -> String {
    format!("{TENANT_NAMESPACE_PREFIX}{slug}")
}

// ---------------------------------------------------------------------------
// Slug validation
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > MAX_TENANT_SLUG_LEN || !slug_re().is_match(slug) {
        return Err(DeployError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
