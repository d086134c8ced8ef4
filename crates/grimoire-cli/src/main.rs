//! Grimoire CLI - offline-first character sheets from the terminal
//!
//! Every change lands in the local store first and is queued for the remote
//! store; mutating commands flush the queue once before exiting when online.

mod cli;
mod commands;
mod config;
mod error;

use clap::Parser;
use grimoire_core::models::CharacterPatch;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::ability::run_ability;
use crate::commands::common::open_context;
use crate::commands::completions::run_completions;
use crate::commands::condition::run_condition;
use crate::commands::create::{build_create_patch, run_create};
use crate::commands::delete::run_delete;
use crate::commands::hp::{hit_point_changes, run_hp};
use crate::commands::list::run_list;
use crate::commands::save::run_save;
use crate::commands::show::run_show;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::update::run_update;
use crate::config::CliConfig;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("grimoire=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let config = CliConfig::load()?;
    let ctx = open_context(&cli.global, &config)?;

    match cli.command {
        Commands::List { json } => run_list(&ctx, json).await?,
        Commands::Show { id, json } => run_show(&ctx, &id, json).await?,
        Commands::Create {
            name,
            class_name,
            level,
        } => run_create(&ctx, build_create_patch(name, class_name, level)).await?,
        Commands::Update {
            id,
            name,
            class_name,
            level,
            armor_class,
            speed,
        } => {
            let patch = CharacterPatch {
                name,
                class_name,
                level,
                armor_class,
                speed,
                ..CharacterPatch::default()
            };
            run_update(&ctx, &id, &patch).await?;
        }
        Commands::Ability { id, ability, score } => {
            run_ability(&ctx, &id, &ability, score).await?;
        }
        Commands::Hp {
            id,
            current,
            maximum,
            temporary,
        } => run_hp(&ctx, &id, &hit_point_changes(current, maximum, temporary)).await?,
        Commands::Condition {
            id,
            action,
            condition,
            duration,
        } => run_condition(&ctx, &id, action, &condition, duration).await?,
        Commands::Delete { id } => run_delete(&ctx, &id).await?,
        Commands::Save { id } => run_save(&ctx, &id).await?,
        Commands::Sync => run_sync(&ctx).await?,
        Commands::Status { json } => run_status(&ctx, json)?,
        Commands::Completions { .. } => {}
    }

    ctx.engine.dispose();
    Ok(())
}
