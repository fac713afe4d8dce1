use super::Ctx;
use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use kdeploy_core::ledger::Ledger;

pub fn run(ctx: &Ctx, clear: bool) -> anyhow::Result<()> {
    if clear {
        let removed = Ledger::clear(&ctx.root).context("failed to clear run ledger")?;
        if ctx.json {
            return print_json(&serde_json::json!({ "cleared": removed }));
        }
        if removed {
            println!("Run ledger cleared.");
        } else {
            println!("No run ledger to clear.");
        }
        return Ok(());
    }

    let ledger = Ledger::load(&ctx.root).context("failed to load run ledger")?;
    if ctx.json {
        return print_json(&ledger.entries);
    }
    if ledger.entries.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    let rows = ledger
        .entries
        .iter()
        .map(|e| {
            let run_id = e.run_id.to_string();
            vec![
                run_id[..8].to_string(),
                e.command.clone(),
                e.phase.clone(),
                e.outcome.to_string(),
                e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                or_dash(e.detail.as_deref()),
            ]
        })
        .collect();
    print_table(&["RUN", "COMMAND", "PHASE", "OUTCOME", "AT (UTC)", "DETAIL"], rows);
    Ok(())
}
