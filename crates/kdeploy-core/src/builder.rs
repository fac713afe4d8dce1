//! Builds every configured service image and loads it into the kind cluster.
//!
//! Builds are independent and may run concurrently; loads start only after
//! every build succeeded, so a failing build never leaves a partially
//! refreshed image set in the cluster.

use serde::Serialize;

use crate::config::{ServiceConfig, Settings};
use crate::error::{DeployError, Result};
use crate::runner::{CommandRunner, Invocation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltImage {
    pub service: String,
    pub image: String,
}

pub struct ImageBuilder<'a> {
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(settings: &'a Settings, runner: &'a dyn CommandRunner) -> Self {
        Self { settings, runner }
    }

    /// Build all images, then load them. Fails fast on the first build error.
    pub fn run(&self) -> Result<Vec<BuiltImage>> {
        self.check_contexts()?;
        let images = self.build_all()?;
        self.load_all(&images)?;
        tracing::info!(count = images.len(), "images built and loaded");
        Ok(images)
    }

    fn check_contexts(&self) -> Result<()> {
        for svc in &self.settings.config.services {
            let ctx = self.settings.build_context(svc);
            if !ctx.is_dir() {
                return Err(DeployError::InvalidConfig(format!(
                    "build context for service '{}' not found: {}",
                    svc.name,
                    ctx.display()
                )));
            }
        }
        Ok(())
    }

    pub fn build_all(&self) -> Result<Vec<BuiltImage>> {
        let services = &self.settings.config.services;
        if !self.settings.config.images.parallel_builds {
            return services.iter().map(|svc| self.build_one(svc)).collect();
        }

        let results: Vec<Result<BuiltImage>> = std::thread::scope(|scope| {
            let handles: Vec<_> = services
                .iter()
                .map(|svc| scope.spawn(move || self.build_one(svc)))
                .collect();
            handles
                .into_iter()
                .zip(services)
                .map(|(h, svc)| {
                    h.join().unwrap_or_else(|_| {
                        Err(DeployError::BuildFailed {
                            service: svc.name.clone(),
                            detail: "build thread panicked".to_string(),
                        })
                    })
                })
                .collect()
        });

        // First failure in declared order wins, for a stable error message.
        results.into_iter().collect()
    }

    fn build_one(&self, svc: &ServiceConfig) -> Result<BuiltImage> {
        let image = self.settings.image_ref(&svc.name);
        let context = self.settings.build_context(svc);
        tracing::info!(service = %svc.name, %image, "building image");

        let out = self.runner.run(&Invocation::new(
            self.settings.config.tools.docker.as_str(),
            [
                "build".to_string(),
                "-t".to_string(),
                image.clone(),
                context.display().to_string(),
            ],
        ))?;
        if !out.success() {
            return Err(DeployError::BuildFailed {
                service: svc.name.clone(),
                detail: out.detail(),
            });
        }
        Ok(BuiltImage {
            service: svc.name.clone(),
            image,
        })
    }

    pub fn load_all(&self, images: &[BuiltImage]) -> Result<()> {
        let cluster = &self.settings.config.images.cluster;
        for built in images {
            tracing::info!(service = %built.service, %cluster, "loading image into cluster");
            let out = self.runner.run(&Invocation::new(
                self.settings.config.tools.kind.as_str(),
                [
                    "load",
                    "docker-image",
                    built.image.as_str(),
                    "--name",
                    cluster.as_str(),
                ],
            ))?;
            if !out.success() {
                return Err(DeployError::LoadFailed {
                    service: built.service.clone(),
                    cluster: cluster.clone(),
                    detail: out.detail(),
                });
            }
        }
        Ok(())
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
    use crate::runner::CommandOutput;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, parallel: bool) -> Settings {
        let mut config = Config::default();
        config.images.parallel_builds = parallel;
        for svc in &config.services {
            std::fs::create_dir_all(dir.path().join(&svc.build_context)).unwrap();
        }
        Settings::new(dir.path(), config)
    }

    #[test]
    fn every_build_precedes_every_load() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, true);
        let runner = ScriptedRunner::succeeding();
        let images = ImageBuilder::new(&settings, &runner).run().unwrap();

        assert_eq!(images.len(), 5);
        assert_eq!(images[0].image, "chatflow/chat-service:v1");

        let lines = runner.lines();
        let last_build = lines.iter().rposition(|l| l.starts_with("docker build")).unwrap();
        let first_load = lines.iter().position(|l| l.starts_with("kind load")).unwrap();
        assert!(last_build < first_load, "loads started before builds finished: {lines:?}");
        assert!(lines.contains(&"kind load docker-image chatflow/frontend:v1 --name kind".to_string()));
    }

    #[test]
    fn build_failure_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, true);
        let runner = ScriptedRunner::new(|inv| {
            if inv.has_arg("chatflow/file-service:v1") && inv.has_arg("build") {
                CommandOutput::failed(1, "COPY failed: requirements.txt not found")
            } else {
                CommandOutput::ok("")
            }
        });
        let err = ImageBuilder::new(&settings, &runner).run().unwrap_err();
        match err {
            DeployError::BuildFailed { service, detail } => {
                assert_eq!(service, "file-service");
                assert!(detail.contains("requirements.txt"));
            }
            other => panic!("expected BuildFailed, got {other:?}"),
        }
        assert!(runner.lines().iter().all(|l| !l.starts_with("kind load")));
    }

    #[test]
    fn sequential_build_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, false);
        let runner = ScriptedRunner::new(|inv| {
            if inv.has_arg("chatflow/presence-service:v1") {
                CommandOutput::failed(1, "boom")
            } else {
                CommandOutput::ok("")
            }
        });
        assert!(ImageBuilder::new(&settings, &runner).run().is_err());
        // chat-service and presence-service only
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn load_failure_is_distinct_from_build_failure() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, false);
        let runner = ScriptedRunner::new(|inv| {
            if inv.program == "kind" {
                CommandOutput::failed(1, "ERROR: no nodes found for cluster \"kind\"")
            } else {
                CommandOutput::ok("")
            }
        });
        let err = ImageBuilder::new(&settings, &runner).run().unwrap_err();
        assert!(matches!(err, DeployError::LoadFailed { ref service, .. } if service == "chat-service"));
    }

    #[test]
    fn missing_build_context_fails_before_building() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::new(dir.path(), Config::default());
        let runner = ScriptedRunner::succeeding();
        let err = ImageBuilder::new(&settings, &runner).run().unwrap_err();
        assert!(matches!(err, DeployError::InvalidConfig(_)));
        assert!(runner.calls().is_empty());
    }
}
