use super::Ctx;
use crate::cmd::deploy::print_status;
use crate::output::{print_json, print_table};
use clap::Subcommand;
use kdeploy_core::tenant::{plan_table, CredentialSource, TenantEngine, TenantRequest};

const USAGE: &str = "usage: kdeploy tenant provision --tenant SLUG --plan PLAN (or TENANT=... PLAN=...); \
PLAN must be starter, pro, or enterprise.";

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum TenantSubcommand {
    /// Render the tenant templates and apply them into tenant-<slug>
    Provision {
        /// Tenant slug (lowercase letters, digits and hyphens)
        #[arg(long, env = "TENANT")]
        tenant: Option<String>,
        /// starter, pro or enterprise
        #[arg(long, env = "PLAN")]
        plan: Option<String>,
    },

    /// Print the rendered manifests without applying them (credential redacted)
    Render {
        #[arg(long, env = "TENANT")]
        tenant: Option<String>,
        #[arg(long, env = "PLAN")]
        plan: Option<String>,
    },

    /// Delete a tenant's namespace
    Teardown {
        #[arg(long, env = "TENANT")]
        tenant: String,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Show resources and quota in a tenant's namespace
    Status {
        #[arg(long, env = "TENANT")]
        tenant: String,
    },

    /// List plans and their quotas
    Plans,
}

impl TenantSubcommand {
    pub fn mutates(&self) -> bool {
        matches!(
            self,
            TenantSubcommand::Provision { .. } | TenantSubcommand::Teardown { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(ctx: &Ctx, subcmd: TenantSubcommand) -> anyhow::Result<()> {
    match subcmd {
        TenantSubcommand::Provision { tenant, plan } => provision(ctx, tenant, plan),
        TenantSubcommand::Render { tenant, plan } => render(ctx, tenant, plan),
        TenantSubcommand::Teardown { tenant, yes } => teardown(ctx, &tenant, yes),
        TenantSubcommand::Status { tenant } => status(ctx, &tenant),
        TenantSubcommand::Plans => plans(ctx),
    }
}

/// Both values are required; an empty env var counts as missing.
fn request(tenant: Option<String>, plan: Option<String>) -> anyhow::Result<TenantRequest> {
    let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (Some(tenant), Some(plan)) = (present(tenant), present(plan)) else {
        anyhow::bail!("TENANT and PLAN are required\n{USAGE}");
    };
    Ok(TenantRequest::new(&tenant, &plan)?)
}

// ---------------------------------------------------------------------------
// provision / render
// ---------------------------------------------------------------------------

fn provision(ctx: &Ctx, tenant: Option<String>, plan: Option<String>) -> anyhow::Result<()> {
    let request = request(tenant, plan)?;
    let settings = ctx.settings()?;
    let runner = ctx.runner();
    let report = TenantEngine::new(&settings, runner.as_ref()).provision(&request)?;

    if ctx.json {
        return print_json(&report);
    }
    let verb = if report.dry_run { "Would provision" } else { "Provisioned" };
    println!(
        "{verb} tenant '{}' in namespace '{}' (plan: {}).",
        report.slug, report.namespace, report.plan
    );
    let q = &report.quota;
    println!(
        "Quota: requests.cpu={} requests.memory={} limits.cpu={} limits.memory={} pods={} services={}",
        q.requests_cpu, q.requests_memory, q.limits_cpu, q.limits_memory, q.max_pods, q.max_services
    );
    let credential = match report.credential {
        CredentialSource::Generated => "generated",
        CredentialSource::Reused => "reused",
    };
    println!("Credential: secret '{}' ({credential})", report.secret_name);
    println!("Applied: {}", report.applied.join(", "));
    Ok(())
}

fn render(ctx: &Ctx, tenant: Option<String>, plan: Option<String>) -> anyhow::Result<()> {
    let request = request(tenant, plan)?;
    let settings = ctx.settings()?;
    let runner = ctx.runner();
    let rendered = TenantEngine::new(&settings, runner.as_ref()).render_preview(&request)?;

    if ctx.json {
        return print_json(&rendered);
    }
    for manifest in &rendered {
        println!("# {}", manifest.file);
        print!("{}", manifest.content);
        if !manifest.content.ends_with('\n') {
            println!();
        }
        println!("---");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// teardown / status / plans
// ---------------------------------------------------------------------------

fn teardown(ctx: &Ctx, tenant: &str, yes: bool) -> anyhow::Result<()> {
    let settings = ctx.settings()?;
    let runner = ctx.runner();
    let namespace = TenantEngine::new(&settings, runner.as_ref()).teardown(tenant, yes)?;
    if ctx.json {
        return print_json(&serde_json::json!({
            "tenant": tenant,
            "namespace": namespace,
            "dry_run": ctx.dry_run,
        }));
    }
    if ctx.dry_run {
        println!("Would delete namespace '{namespace}'.");
    } else {
        println!("Deleted namespace '{namespace}'.");
    }
    Ok(())
}

fn status(ctx: &Ctx, tenant: &str) -> anyhow::Result<()> {
    let settings = ctx.settings()?;
    let runner = ctx.runner();
    let report = TenantEngine::new(&settings, runner.as_ref()).status(tenant)?;
    if ctx.json {
        return print_json(&report);
    }
    print_status(&report);
    Ok(())
}

fn plans(ctx: &Ctx) -> anyhow::Result<()> {
    let table = plan_table();
    if ctx.json {
        return print_json(&table);
    }
    let rows = table
        .iter()
        .map(|row| {
            let q = &row.quota;
            vec![
                row.plan.to_string(),
                q.requests_cpu.to_string(),
                q.requests_memory.to_string(),
                q.limits_cpu.to_string(),
                q.limits_memory.to_string(),
                q.max_pods.to_string(),
                q.max_services.to_string(),
            ]
        })
        .collect();
    print_table(
        &["PLAN", "REQ CPU", "REQ MEM", "LIM CPU", "LIM MEM", "PODS", "SERVICES"],
        rows,
    );
    Ok(())
}
