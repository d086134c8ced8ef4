//! Character model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::owner::OwnerId;
use super::rules::{
    Ability, AbilityScores, ActiveCondition, CombatState, Condition, HitPoints, Resistance,
    SkillProficiency,
};
use crate::error::{Error, Result};

/// Skills every new character starts with, keyed by their wire name
pub const DEFAULT_SKILLS: [(&str, Ability); 18] = [
    ("acrobatics", Ability::Dexterity),
    ("animalHandling", Ability::Wisdom),
    ("arcana", Ability::Intelligence),
    ("athletics", Ability::Strength),
    ("deception", Ability::Charisma),
    ("history", Ability::Intelligence),
    ("insight", Ability::Wisdom),
    ("intimidation", Ability::Charisma),
    ("investigation", Ability::Intelligence),
    ("medicine", Ability::Wisdom),
    ("nature", Ability::Intelligence),
    ("perception", Ability::Wisdom),
    ("performance", Ability::Charisma),
    ("persuasion", Ability::Charisma),
    ("religion", Ability::Intelligence),
    ("sleightOfHand", Ability::Dexterity),
    ("stealth", Ability::Dexterity),
    ("survival", Ability::Wisdom),
];

/// Client-generated, globally unique character identifier.
///
/// New ids are UUID v7 (time-sortable); ids created by other clients are
/// accepted verbatim as long as they are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(String);

impl CharacterId {
    /// Create a new unique character ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CharacterId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("character id cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Relationship of the local copy to the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local copy known identical to remote as of `last_synced_at`
    #[default]
    Synced,
    /// Local copy has unpushed changes
    Local,
    /// A push is in flight
    Syncing,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Local => "local",
            Self::Syncing => "syncing",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "synced" => Ok(Self::Synced),
            "local" => Ok(Self::Local),
            "syncing" => Ok(Self::Syncing),
            other => Err(Error::InvalidInput(format!("unknown sync status '{other}'"))),
        }
    }
}

/// A character sheet owned by one principal.
///
/// Missing fields decode to the defaults of a freshly created character, so
/// documents written by older clients stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Character {
    pub id: CharacterId,
    #[serde(alias = "userId")]
    pub owner_id: OwnerId,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub subclass: Option<String>,
    pub level: u8,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    pub sync_status: SyncStatus,
    /// Last confirmed remote write (Unix ms)
    pub last_synced_at: Option<i64>,
    /// Conflict-resolution clock, refreshed by every mutation (Unix ms)
    pub last_modified: i64,
    pub inspiration: bool,
    pub combat_mode: bool,
    pub combat_state: Option<CombatState>,
    pub ability_scores: AbilityScores,
    pub hit_points: HitPoints,
    pub armor_class: i32,
    pub speed: i32,
    pub proficient_saving_throws: Vec<Ability>,
    pub skills: BTreeMap<String, SkillProficiency>,
    pub condition_immunities: Vec<Condition>,
    pub active_conditions: Vec<ActiveCondition>,
    pub resistances: Vec<Resistance>,
    pub exhaustion_level: u8,
}

impl Default for Character {
    fn default() -> Self {
        Self {
            id: CharacterId::new(),
            owner_id: OwnerId::default(),
            name: "New Character".to_string(),
            class_name: String::new(),
            subclass: None,
            level: 1,
            created_at: 0,
            updated_at: 0,
            sync_status: SyncStatus::Synced,
            last_synced_at: None,
            last_modified: 0,
            inspiration: false,
            combat_mode: false,
            combat_state: None,
            ability_scores: AbilityScores::default(),
            hit_points: HitPoints::default(),
            armor_class: 10,
            speed: 30,
            proficient_saving_throws: Vec::new(),
            skills: DEFAULT_SKILLS
                .iter()
                .map(|(name, ability)| ((*name).to_string(), SkillProficiency::untrained(*ability)))
                .collect(),
            condition_immunities: Vec::new(),
            active_conditions: Vec::new(),
            resistances: Vec::new(),
            exhaustion_level: 0,
        }
    }
}

impl Character {
    /// Create a new, not yet synced character for `owner` stamped at `now`
    #[must_use]
    pub fn new(owner_id: OwnerId, now: i64) -> Self {
        Self {
            owner_id,
            created_at: now,
            updated_at: now,
            last_modified: now,
            sync_status: SyncStatus::Local,
            last_synced_at: None,
            ..Self::default()
        }
    }

    /// Mark this copy as locally modified at `now`.
    ///
    /// `updated_at` and `last_modified` always share one timestamp.
    pub fn touch(&mut self, now: i64) {
        self.sync_status = SyncStatus::Local;
        self.updated_at = now;
        self.last_modified = now;
    }

    /// Decode a remote document, forcing the id to the document key
    pub fn from_document(id: &str, data: Value) -> Result<Self> {
        let mut character: Self = serde_json::from_value(data)?;
        character.id = id.parse()?;
        Ok(character)
    }

    pub fn to_document(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Top-level JSON fields whose values differ between `self` and `other`,
    /// carrying `other`'s values.
    pub fn changed_fields(&self, other: &Self) -> Result<Map<String, Value>> {
        let Value::Object(before) = serde_json::to_value(self)? else {
            return Err(Error::InvalidInput("character must encode as an object".into()));
        };
        let Value::Object(after) = serde_json::to_value(other)? else {
            return Err(Error::InvalidInput("character must encode as an object".into()));
        };

        Ok(after
            .into_iter()
            .filter(|(key, value)| before.get(key) != Some(value))
            .collect())
    }
}

/// Partial character data accepted by create and update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterPatch {
    pub name: Option<String>,
    pub class_name: Option<String>,
    /// `Some(None)` clears the subclass
    pub subclass: Option<Option<String>>,
    pub level: Option<u8>,
    pub armor_class: Option<i32>,
    pub speed: Option<i32>,
    pub hit_points: Option<HitPoints>,
    pub ability_scores: Option<AbilityScores>,
    pub inspiration: Option<bool>,
}

impl CharacterPatch {
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    #[must_use]
    pub const fn with_level(mut self, level: u8) -> Self {
        self.level = Some(level);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(Error::InvalidInput("character name cannot be empty".into()));
            }
        }
        if let Some(level) = self.level {
            if !(1..=20).contains(&level) {
                return Err(Error::InvalidInput(format!(
                    "level must be between 1 and 20, got {level}"
                )));
            }
        }
        Ok(())
    }

    pub fn apply_to(&self, character: &mut Character) {
        if let Some(name) = &self.name {
            character.name = name.trim().to_string();
        }
        if let Some(class_name) = &self.class_name {
            character.class_name = class_name.trim().to_string();
        }
        if let Some(subclass) = &self.subclass {
            character.subclass.clone_from(subclass);
        }
        if let Some(level) = self.level {
            character.level = level;
        }
        if let Some(armor_class) = self.armor_class {
            character.armor_class = armor_class;
        }
        if let Some(speed) = self.speed {
            character.speed = speed;
        }
        if let Some(hit_points) = self.hit_points {
            character.hit_points = hit_points;
        }
        if let Some(ability_scores) = self.ability_scores {
            character.ability_scores = ability_scores;
        }
        if let Some(inspiration) = self.inspiration {
            character.inspiration = inspiration;
        }
    }
}
