//! Data models for Grimoire

mod character;
mod owner;
mod queue;
mod rules;

pub use character::{Character, CharacterId, CharacterPatch, SyncStatus, DEFAULT_SKILLS};
pub use owner::OwnerId;
pub use queue::{CoalescePlan, EnqueueOutcome, OperationKind, QueueEntry, QueuedOperation};
pub use rules::{
    Ability, AbilityScores, ActiveCondition, CombatState, Condition, DamageType, HitPointField,
    HitPoints, Resistance, ResistanceKind, SkillProficiency,
};
