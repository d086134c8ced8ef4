pub mod ability;
pub mod common;
pub mod completions;
pub mod condition;
pub mod create;
pub mod delete;
pub mod hp;
pub mod list;
pub mod save;
pub mod show;
pub mod status;
pub mod sync;
pub mod update;
