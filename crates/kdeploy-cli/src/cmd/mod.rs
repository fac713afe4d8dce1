pub mod config;
pub mod deploy;
pub mod runs;
pub mod tenant;

use anyhow::Context;
use kdeploy_core::config::{Config, Overrides, Settings};
use kdeploy_core::runner::{CommandRunner, DryRunRunner, SystemRunner};
use std::path::PathBuf;

/// Everything resolved from flags and env before a command runs.
pub struct Ctx {
    pub root: PathBuf,
    pub config_path: Option<PathBuf>,
    pub overrides: Overrides,
    pub json: bool,
    pub dry_run: bool,
}

impl Ctx {
    /// Config as written on disk (or the built-in layout), without overrides.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        match &self.config_path {
            Some(path) => Config::load_from(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => Config::load(&self.root).context("failed to load kdeploy.yaml"),
        }
    }

    /// The run configuration, built once per invocation.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let mut config = self.load_config()?;
        config.apply_overrides(&self.overrides);
        Ok(Settings::new(self.root.clone(), config))
    }

    pub fn runner(&self) -> Box<dyn CommandRunner> {
        if self.dry_run {
            // keep stdout parseable under --json
            Box::new(DryRunRunner::new(!self.json))
        } else {
            Box::new(SystemRunner::in_dir(&self.root))
        }
    }
}
