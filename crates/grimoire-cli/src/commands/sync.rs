use crate::commands::common::{flush_queue, CliContext};
use crate::error::CliError;

pub async fn run_sync(ctx: &CliContext) -> Result<(), CliError> {
    if !ctx.remote_configured {
        return Err(CliError::SyncNotConfigured);
    }
    if ctx.offline {
        return Err(CliError::Offline);
    }

    match flush_queue(ctx).await? {
        Some(report) => println!(
            "Sync completed: {} applied, {} retried, {} dropped",
            report.applied, report.retried, report.dropped
        ),
        None => println!("Sync skipped"),
    }

    let pending = ctx.engine.pending_count()?;
    if pending > 0 {
        println!("{pending} changes still pending");
    }
    Ok(())
}
