//! Services shared by every Grimoire front end

mod characters;
mod local_store;

pub use characters::{CharacterService, CharacterView};
pub use local_store::LocalStore;
