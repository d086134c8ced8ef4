use serde::Serialize;

use crate::commands::common::CliContext;
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusItem {
    pub owner: String,
    pub online: bool,
    pub remote_configured: bool,
    pub pending_changes: usize,
    pub characters: usize,
    pub db_path: Option<String>,
}

pub fn collect_status(ctx: &CliContext) -> Result<StatusItem, CliError> {
    Ok(StatusItem {
        owner: ctx.owner.to_string(),
        online: ctx.engine.is_online(),
        remote_configured: ctx.remote_configured,
        pending_changes: ctx.engine.pending_count()?,
        characters: ctx.engine.store().count_characters(&ctx.owner)?,
        db_path: ctx.db_path.as_ref().map(|path| path.display().to_string()),
    })
}

pub fn run_status(ctx: &CliContext, as_json: bool) -> Result<(), CliError> {
    let status = collect_status(ctx)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let connectivity = match (status.remote_configured, status.online) {
        (false, _) => "local only",
        (true, true) => "online",
        (true, false) => "offline",
    };
    println!("Owner:      {}", status.owner);
    println!("Remote:     {connectivity}");
    println!("Characters: {}", status.characters);
    println!("Pending:    {}", status.pending_changes);
    if let Some(path) = &status.db_path {
        println!("Database:   {path}");
    }
    Ok(())
}
