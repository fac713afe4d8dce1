use super::Ctx;
use crate::output::{or_dash, print_json, print_table};
use kdeploy_core::pipeline::{DeployCommand, Orchestrator, RunOptions, RunSummary};
use kdeploy_core::status::StatusReport;

// ---------------------------------------------------------------------------
// all / build / infra / apps
// ---------------------------------------------------------------------------

pub fn run(ctx: &Ctx, command: DeployCommand, resume: bool) -> anyhow::Result<()> {
    let settings = ctx.settings()?;
    let runner = ctx.runner();
    let orchestrator = Orchestrator::new(&settings, runner.as_ref());

    let summary = orchestrator.run(command, RunOptions { resume })?;
    let status = if command == DeployCommand::All {
        Some(orchestrator.status()?)
    } else {
        None
    };

    if ctx.json {
        let value = serde_json::json!({
            "run": summary,
            "status": status,
        });
        return print_json(&value);
    }

    print_summary(&summary);
    if let Some(status) = status {
        println!();
        print_status(&status);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let mode = if summary.dry_run { " (dry run)" } else { "" };
    println!("{} {}{mode}", summary.command, summary.run_id);

    if !summary.images.is_empty() {
        println!();
        let rows = summary
            .images
            .iter()
            .map(|i| vec![i.service.clone(), i.image.clone()])
            .collect();
        print_table(&["SERVICE", "IMAGE"], rows);
    }

    if !summary.phases.is_empty() {
        println!();
        let rows = summary
            .phases
            .iter()
            .map(|p| {
                let result = if p.skipped { "skipped" } else { "ready" };
                let targets = if p.ready.is_empty() {
                    "-".to_string()
                } else {
                    p.ready
                        .iter()
                        .map(|t| t.target.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                vec![
                    p.phase.clone(),
                    p.stage.to_string(),
                    result.to_string(),
                    targets,
                ]
            })
            .collect();
        print_table(&["PHASE", "STAGE", "RESULT", "TARGETS"], rows);
    }
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

pub fn status(ctx: &Ctx) -> anyhow::Result<()> {
    let settings = ctx.settings()?;
    let runner = ctx.runner();
    let report = Orchestrator::new(&settings, runner.as_ref()).status()?;
    if ctx.json {
        return print_json(&report);
    }
    print_status(&report);
    Ok(())
}

pub fn print_status(report: &StatusReport) {
    if !report.exists {
        println!("Namespace '{}' does not exist (0 resources).", report.namespace);
    } else {
        println!(
            "Namespace '{}': {} resources",
            report.namespace,
            report.resource_count()
        );
        if !report.resources.is_empty() {
            let rows = report
                .resources
                .iter()
                .map(|r| vec![r.kind.clone(), r.name.clone(), or_dash(r.ready.as_deref())])
                .collect();
            print_table(&["KIND", "NAME", "READY"], rows);
        }
    }

    if !report.last_runs.is_empty() {
        println!();
        let rows = report
            .last_runs
            .iter()
            .map(|e| {
                vec![
                    e.phase.clone(),
                    e.outcome.to_string(),
                    e.command.clone(),
                    e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                ]
            })
            .collect();
        print_table(&["PHASE", "LAST OUTCOME", "COMMAND", "AT (UTC)"], rows);
    }
}

// ---------------------------------------------------------------------------
// teardown
// ---------------------------------------------------------------------------

pub fn teardown(ctx: &Ctx, yes: bool) -> anyhow::Result<()> {
    let settings = ctx.settings()?;
    let runner = ctx.runner();
    let report = Orchestrator::new(&settings, runner.as_ref()).teardown(yes)?;
    if ctx.json {
        return print_json(&report);
    }
    if report.dry_run {
        println!("Would delete namespace '{}'.", report.namespace);
    } else {
        println!("Deleted namespace '{}'.", report.namespace);
    }
    Ok(())
}
