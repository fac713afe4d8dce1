use super::Ctx;
use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use kdeploy_core::config::{Config, WarnLevel};
use kdeploy_core::paths;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration (file + env/flag overrides)
    Show,

    /// Validate the config for common mistakes
    Validate,

    /// Write the built-in chatflow layout to kdeploy.yaml
    Init {
        /// Overwrite an existing kdeploy.yaml
        #[arg(long)]
        force: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(ctx: &Ctx, subcmd: ConfigSubcommand) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(ctx),
        ConfigSubcommand::Validate => validate(ctx),
        ConfigSubcommand::Init { force } => init(ctx, force),
    }
}

fn show(ctx: &Ctx) -> anyhow::Result<()> {
    let settings = ctx.settings()?;
    if ctx.json {
        return print_json(&settings.config);
    }
    print!("{}", serde_yaml::to_string(&settings.config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(ctx: &Ctx) -> anyhow::Result<()> {
    let settings = ctx.settings()?;
    let warnings = settings.config.validate();

    if ctx.json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn init(ctx: &Ctx, force: bool) -> anyhow::Result<()> {
    let path = paths::config_path(&ctx.root);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default()
        .save(&ctx.root)
        .with_context(|| format!("failed to write {}", path.display()))?;
    if ctx.json {
        return print_json(&serde_json::json!({ "path": path }));
    }
    println!("Wrote {}", path.display());
    Ok(())
}
