mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, tenant::TenantSubcommand, Ctx};
use kdeploy_core::config::Overrides;
use kdeploy_core::pipeline::DeployCommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kdeploy",
    about = "Build, load and roll out a multi-service platform onto a kind cluster, phase by phase",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from kdeploy.yaml or .git/)
    #[arg(long, global = true, env = "KDEPLOY_ROOT")]
    root: Option<PathBuf>,

    /// Config file (default: <root>/kdeploy.yaml, else built-in defaults)
    #[arg(long = "config", global = true, value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Print every external command instead of running it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Image registry prefix
    #[arg(long, global = true, env = "REGISTRY")]
    registry: Option<String>,

    /// Image tag
    #[arg(long, global = true, env = "IMAGE_TAG")]
    image_tag: Option<String>,

    /// kind cluster to load images into
    #[arg(long, global = true, env = "KIND_CLUSTER")]
    cluster: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build images, then run every infra and apps phase
    All {
        /// Skip phases whose last recorded outcome succeeded
        #[arg(long)]
        resume: bool,
    },

    /// Build every service image and load it into the cluster
    Build,

    /// Apply namespace, config and infrastructure phases
    Infra {
        #[arg(long)]
        resume: bool,
    },

    /// Apply application and routing phases (infra must already exist)
    Apps {
        #[arg(long)]
        resume: bool,
    },

    /// Show resources in the deploy namespace and the last recorded runs
    Status,

    /// Delete the deploy namespace and everything in it
    Teardown {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Show the run ledger
    Runs {
        /// Delete the ledger
        #[arg(long)]
        clear: bool,
    },

    /// Provision and inspect tenants
    Tenant {
        #[command(subcommand)]
        subcommand: TenantSubcommand,
    },

    /// Inspect and validate kdeploy.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

impl Commands {
    fn mutates(&self) -> bool {
        match self {
            Commands::All { .. }
            | Commands::Build
            | Commands::Infra { .. }
            | Commands::Apps { .. }
            | Commands::Teardown { .. } => true,
            Commands::Tenant { subcommand } => subcommand.mutates(),
            _ => false,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.command.mutates() {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Ctx {
        root: root::resolve_root(cli.root.as_deref()),
        config_path: cli.config_file,
        overrides: Overrides {
            registry: cli.registry,
            image_tag: cli.image_tag,
            cluster: cli.cluster,
        },
        json: cli.json,
        dry_run: cli.dry_run,
    };

    let result = match cli.command {
        Commands::All { resume } => cmd::deploy::run(&ctx, DeployCommand::All, resume),
        Commands::Build => cmd::deploy::run(&ctx, DeployCommand::Build, false),
        Commands::Infra { resume } => cmd::deploy::run(&ctx, DeployCommand::Infra, resume),
        Commands::Apps { resume } => cmd::deploy::run(&ctx, DeployCommand::Apps, resume),
        Commands::Status => cmd::deploy::status(&ctx),
        Commands::Teardown { yes } => cmd::deploy::teardown(&ctx, yes),
        Commands::Runs { clear } => cmd::runs::run(&ctx, clear),
        Commands::Tenant { subcommand } => cmd::tenant::run(&ctx, subcommand),
        Commands::Config { subcommand } => cmd::config::run(&ctx, subcommand),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
