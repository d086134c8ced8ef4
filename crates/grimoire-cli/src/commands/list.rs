use crate::commands::common::{
    character_to_list_item, format_character_lines, CharacterListItem, CliContext,
};
use crate::error::CliError;

pub async fn run_list(ctx: &CliContext, as_json: bool) -> Result<(), CliError> {
    let characters = ctx.engine.characters().fetch_all(&ctx.owner).await?;

    if as_json {
        let json_items = characters
            .iter()
            .map(character_to_list_item)
            .collect::<Vec<CharacterListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if characters.is_empty() {
        println!("No characters yet. Create one with `grimoire create --name <NAME>`.");
    } else {
        for line in format_character_lines(&characters) {
            println!("{line}");
        }
    }

    Ok(())
}
