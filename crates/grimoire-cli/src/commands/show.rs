use grimoire_core::models::Ability;
use grimoire_core::Character;

use crate::commands::common::{class_summary, format_timestamp, resolve_character, CliContext};
use crate::error::CliError;

pub async fn run_show(ctx: &CliContext, id: &str, as_json: bool) -> Result<(), CliError> {
    let character = resolve_character(ctx, id).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&character.to_document()?)?);
    } else {
        for line in format_character_sheet(&character) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_character_sheet(character: &Character) -> Vec<String> {
    let mut lines = vec![
        format!("{} ({})", character.name, character.id),
        format!("  {}", class_summary(character)),
        format!(
            "  HP {}/{} (+{} temp)  AC {}  Speed {}",
            character.hit_points.current,
            character.hit_points.maximum,
            character.hit_points.temporary,
            character.armor_class,
            character.speed
        ),
    ];

    let scores = Ability::ALL
        .iter()
        .map(|ability| {
            let short = &ability.as_str()[..3];
            format!("{} {}", short.to_uppercase(), character.ability_scores.get(*ability))
        })
        .collect::<Vec<_>>()
        .join("  ");
    lines.push(format!("  {scores}"));

    if !character.active_conditions.is_empty() {
        let conditions = character
            .active_conditions
            .iter()
            .map(|active| match active.duration {
                Some(rounds) => format!("{} ({rounds} rounds)", active.condition),
                None => active.condition.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("  Conditions: {conditions}"));
    }
    if character.exhaustion_level > 0 {
        lines.push(format!("  Exhaustion: {}", character.exhaustion_level));
    }
    if let Some(combat) = character.combat_state {
        let turn = if combat.is_player_turn { "your turn" } else { "waiting" };
        lines.push(format!("  Combat: round {} ({turn})", combat.round));
    }

    let synced = character
        .last_synced_at
        .map_or_else(|| "never".to_string(), format_timestamp);
    lines.push(format!(
        "  Status: {} (last synced {synced})",
        character.sync_status
    ));
    lines
}
