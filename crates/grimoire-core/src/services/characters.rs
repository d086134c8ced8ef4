//! Character operations: CRUD, field-level mutators, fetch and force-sync.
//!
//! Every mutation follows the same path: compute the new character from the
//! current one, stamp it with one timestamp, persist only the changed fields
//! locally, swap it into the in-memory projection, then queue a full-entity
//! `update` for the remote store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::models::{
    Ability, ActiveCondition, Character, CharacterId, CharacterPatch, CombatState, Condition,
    DamageType, HitPointField, OwnerId, QueuedOperation, Resistance, ResistanceKind, SyncStatus,
};
use crate::remote::RemoteStore;
use crate::session::Session;
use crate::sync::{merge, SyncEvent, SyncQueue};
use crate::util::now_millis;
use crate::{Error, Result};

use super::LocalStore;

const MAX_EXHAUSTION_LEVEL: i32 = 10;

/// In-memory projection the front end renders from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterView {
    pub characters: Vec<Character>,
    pub current: Option<Character>,
}

impl CharacterView {
    fn find(&self, id: &CharacterId) -> Option<&Character> {
        self.characters.iter().find(|character| &character.id == id)
    }

    /// Swap in a new copy wherever the character appears
    fn replace(&mut self, updated: &Character) {
        for character in &mut self.characters {
            if character.id == updated.id {
                character.clone_from(updated);
            }
        }
        if let Some(current) = &mut self.current {
            if current.id == updated.id {
                current.clone_from(updated);
            }
        }
    }

    fn remove(&mut self, id: &CharacterId) {
        self.characters.retain(|character| &character.id != id);
        if self.current.as_ref().is_some_and(|current| &current.id == id) {
            self.current = None;
        }
    }
}

/// Which character a mutation applies to
enum Target<'a> {
    Selected,
    Id(&'a CharacterId),
}

pub struct CharacterService {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    session: Arc<Session>,
    connectivity: Arc<ConnectivityMonitor>,
    queue: Arc<SyncQueue>,
    config: EngineConfig,
    view: Mutex<CharacterView>,
}

impl CharacterService {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        session: Arc<Session>,
        connectivity: Arc<ConnectivityMonitor>,
        queue: Arc<SyncQueue>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            remote,
            session,
            connectivity,
            queue,
            config,
            view: Mutex::new(CharacterView::default()),
        }
    }

    fn lock_view(&self) -> MutexGuard<'_, CharacterView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_owner(&self) -> Result<OwnerId> {
        self.session.owner().ok_or(Error::NotAuthenticated)
    }

    fn collection(&self) -> &str {
        &self.config.collection
    }

    pub fn view(&self) -> CharacterView {
        self.lock_view().clone()
    }

    pub fn characters(&self) -> Vec<Character> {
        self.lock_view().characters.clone()
    }

    pub fn current(&self) -> Option<Character> {
        self.lock_view().current.clone()
    }

    pub fn clear_selection(&self) {
        self.lock_view().current = None;
    }

    /// Forget the projection, e.g. when the owner changes
    pub fn clear(&self) {
        *self.lock_view() = CharacterView::default();
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn pending_change_count(&self) -> Result<usize> {
        self.queue.pending_count()
    }

    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.queue.subscribe_pending()
    }

    /// Load an owner's characters, reconciling with the remote when online.
    ///
    /// Remote failures are logged and the local copies are kept.
    pub async fn fetch_all(&self, owner: &OwnerId) -> Result<Vec<Character>> {
        let local = self.store.list_characters(owner)?;
        self.set_characters(local.clone());

        if !self.connectivity.is_online() {
            return Ok(local);
        }

        let documents = match self.remote.query_by_owner(self.collection(), owner).await {
            Ok(documents) => documents,
            Err(error) => {
                tracing::warn!("Failed to fetch characters for {owner} from remote: {error}");
                return Ok(local);
            }
        };

        let fetched_at = now_millis();
        let remote = documents
            .into_iter()
            .filter_map(|document| match Character::from_document(&document.id, document.data) {
                Ok(character) => Some(character),
                Err(error) => {
                    tracing::warn!("Skipping undecodable remote character {}: {error}", document.id);
                    None
                }
            })
            .filter(|character| &character.owner_id == owner)
            .map(|mut character| {
                character.sync_status = SyncStatus::Synced;
                character.last_synced_at = Some(fetched_at);
                character
            })
            .collect::<Vec<_>>();

        // Re-read so edits made while the query was in flight take part
        let local = self.store.list_characters(owner)?;
        let merged = merge(local, remote);
        for character in &merged {
            self.store.put_character(character)?;
        }

        tracing::debug!("Fetched {} characters for {owner}", merged.len());
        self.set_characters(merged.clone());
        Ok(merged)
    }

    fn set_characters(&self, characters: Vec<Character>) {
        let mut view = self.lock_view();
        let current = view
            .current
            .as_ref()
            .and_then(|current| characters.iter().find(|c| c.id == current.id))
            .cloned();
        view.characters = characters;
        view.current = current;
    }

    /// Find one character and make it the current selection
    pub async fn fetch_one(&self, id: &CharacterId) -> Result<Option<Character>> {
        let owner = self.require_owner()?;

        let cached = self.lock_view().find(id).cloned();
        if let Some(character) = cached {
            self.lock_view().current = Some(character.clone());
            return Ok(Some(character));
        }

        if let Some(character) = self.store.get_character(id)? {
            if character.owner_id == owner {
                self.lock_view().current = Some(character.clone());
                return Ok(Some(character));
            }
        }

        if !self.connectivity.is_online() {
            return Ok(None);
        }

        let data = match self.remote.get_document(self.collection(), id.as_str()).await {
            Ok(Some(data)) => data,
            Ok(None) => return Ok(None),
            Err(error) => {
                tracing::warn!("Failed to fetch character {id} from remote: {error}");
                return Ok(None);
            }
        };

        let mut character = match Character::from_document(id.as_str(), data) {
            Ok(character) => character,
            Err(error) => {
                tracing::warn!("Skipping undecodable remote character {id}: {error}");
                return Ok(None);
            }
        };
        if character.owner_id != owner {
            return Ok(None);
        }

        character.sync_status = SyncStatus::Synced;
        character.last_synced_at = Some(now_millis());
        self.store.put_character(&character)?;
        self.lock_view().current = Some(character.clone());
        Ok(Some(character))
    }

    /// Select a character already present in the projection or local store
    pub fn select(&self, id: &CharacterId) -> Result<Character> {
        let character = self.find(id)?;
        self.lock_view().current = Some(character.clone());
        Ok(character)
    }

    fn find(&self, id: &CharacterId) -> Result<Character> {
        if let Some(character) = self.lock_view().find(id).cloned() {
            return Ok(character);
        }
        let owner = self.require_owner()?;
        self.store
            .get_character(id)?
            .filter(|character| character.owner_id == owner)
            .ok_or_else(|| Error::NotFound(format!("character {id}")))
    }

    /// Create a character for the signed-in owner.
    ///
    /// Written locally first, then pushed immediately when online; the push
    /// falls back to the queue on failure.
    pub async fn create(&self, patch: CharacterPatch) -> Result<Character> {
        let owner = self.require_owner()?;
        patch.validate()?;

        let limit = self.config.max_characters;
        if self.store.count_characters(&owner)? >= limit {
            return Err(Error::CapacityExceeded { limit });
        }

        let mut character = Character::new(owner, now_millis());
        patch.apply_to(&mut character);
        self.store.put_character(&character)?;
        {
            let mut view = self.lock_view();
            view.characters.push(character.clone());
            view.current = Some(character.clone());
        }
        tracing::info!("Created character {} ({})", character.id, character.name);

        let document = character.to_document()?;
        if self.connectivity.is_online() {
            match self
                .remote
                .set_document(self.collection(), character.id.as_str(), &document)
                .await
            {
                Ok(()) => return self.confirm_synced(&character, now_millis()),
                Err(error) => {
                    tracing::warn!(
                        "Immediate write of character {} failed, queueing: {error}",
                        character.id
                    );
                }
            }
        }

        self.queue.enqueue(&QueuedOperation::create(
            self.collection(),
            character.id.as_str(),
            document,
        ))?;
        Ok(character)
    }

    /// Mark a pushed character synced unless it changed since the push
    fn confirm_synced(&self, pushed: &Character, synced_at: i64) -> Result<Character> {
        if !self
            .store
            .mark_synced_if_unchanged(&pushed.id, pushed.last_modified, synced_at)?
        {
            return self.find(&pushed.id);
        }

        let synced = self
            .store
            .get_character(&pushed.id)?
            .ok_or_else(|| Error::NotFound(format!("character {}", pushed.id)))?;
        self.lock_view().replace(&synced);
        Ok(synced)
    }

    /// Apply a partial update to a character by id
    pub fn update(&self, id: &CharacterId, patch: &CharacterPatch) -> Result<Character> {
        patch.validate()?;
        self.apply_mutation(Target::Id(id), |character| {
            let mut updated = character.clone();
            patch.apply_to(&mut updated);
            Some(updated)
        })?
        .ok_or_else(|| Error::NotFound(format!("character {id}")))
    }

    /// Delete a character locally, then remotely when possible
    pub async fn delete(&self, id: &CharacterId) -> Result<()> {
        let owner = self.require_owner()?;
        let exists = self
            .store
            .get_character(id)?
            .is_some_and(|character| character.owner_id == owner);
        if !exists {
            return Err(Error::NotFound(format!("character {id}")));
        }

        self.store.delete_character(id)?;
        self.lock_view().remove(id);
        tracing::info!("Deleted character {id}");

        if self.connectivity.is_online() {
            match self.remote.delete_document(self.collection(), id.as_str()).await {
                Ok(()) => {
                    // A stale queued write would otherwise resurrect the document
                    self.store
                        .remove_queued_for_document(&owner, self.collection(), id.as_str())?;
                    self.queue.refresh_pending();
                    return Ok(());
                }
                Err(error) => {
                    tracing::warn!("Immediate delete of character {id} failed, queueing: {error}");
                }
            }
        }

        self.queue
            .enqueue(&QueuedOperation::delete(self.collection(), id.as_str()))?;
        Ok(())
    }

    /// Push a character now, bypassing the queue timer.
    ///
    /// Falls back to queueing an update when offline or when the push fails.
    pub async fn force_sync(&self, id: &CharacterId) -> Result<Character> {
        let owner = self.require_owner()?;
        let mut character = self.find(id)?;

        character.sync_status = SyncStatus::Syncing;
        self.store.set_sync_status(id, SyncStatus::Syncing)?;
        self.lock_view().replace(&character);

        if self.connectivity.is_online() {
            let synced_at = now_millis();
            let mut pushed = character.clone();
            pushed.sync_status = SyncStatus::Synced;
            pushed.last_synced_at = Some(synced_at);

            match self
                .remote
                .set_document(self.collection(), id.as_str(), &pushed.to_document()?)
                .await
            {
                Ok(()) => {
                    let synced = self.confirm_synced(&character, synced_at)?;
                    if synced.sync_status == SyncStatus::Synced {
                        self.store
                            .remove_queued_for_document(&owner, self.collection(), id.as_str())?;
                        self.queue.refresh_pending();
                    }
                    tracing::info!("Force-synced character {id}");
                    return Ok(synced);
                }
                Err(error) => {
                    tracing::warn!("Force sync of character {id} failed, queueing: {error}");
                }
            }
        }

        // Only revert what this call set; a concurrent edit already made it local
        if self.store.get_character(id)?.map(|c| c.sync_status) == Some(SyncStatus::Syncing) {
            self.store.set_sync_status(id, SyncStatus::Local)?;
        }
        let reverted = self.find_stored(id)?;
        self.lock_view().replace(&reverted);

        self.queue.enqueue(&QueuedOperation::update(
            self.collection(),
            id.as_str(),
            reverted.to_document()?,
        ))?;
        Ok(reverted)
    }

    fn find_stored(&self, id: &CharacterId) -> Result<Character> {
        self.store
            .get_character(id)?
            .ok_or_else(|| Error::NotFound(format!("character {id}")))
    }

    /// Fold a queue notification into the projection
    pub fn apply_sync_event(&self, event: &SyncEvent) {
        let SyncEvent::Synced {
            collection,
            document_id,
            last_modified,
            synced_at,
        } = event
        else {
            return;
        };
        if collection != self.collection() {
            return;
        }

        let mut view = self.lock_view();
        let matches = |character: &Character| {
            character.id.as_str() == document_id && character.last_modified == *last_modified
        };
        for character in view.characters.iter_mut().filter(|c| matches(c)) {
            character.sync_status = SyncStatus::Synced;
            character.last_synced_at = Some(*synced_at);
        }
        if let Some(current) = view.current.as_mut().filter(|c| matches(c)) {
            current.sync_status = SyncStatus::Synced;
            current.last_synced_at = Some(*synced_at);
        }
    }

    /// Shared path of every field-level mutation.
    ///
    /// `updater` returns `None` to leave the character untouched. Returns the
    /// updated character, or `None` when nothing was selected or changed.
    fn apply_mutation<F>(&self, target: Target<'_>, updater: F) -> Result<Option<Character>>
    where
        F: FnOnce(&Character) -> Option<Character>,
    {
        let updated = {
            let mut view = self.lock_view();
            let current = match target {
                Target::Selected => match view.current.clone() {
                    Some(current) => current,
                    None => return Ok(None),
                },
                Target::Id(id) => match view.find(id).cloned() {
                    Some(character) => character,
                    None => {
                        drop(view);
                        let found = self.find(id)?;
                        view = self.lock_view();
                        found
                    }
                },
            };

            let Some(mut updated) = updater(&current) else {
                return Ok(None);
            };
            updated.id = current.id.clone();
            updated.owner_id = current.owner_id.clone();
            updated.touch(now_millis());

            let mut changes = current.changed_fields(&updated)?;
            // The stored copy may have been marked synced after the view was loaded
            changes.insert(
                "syncStatus".to_string(),
                serde_json::to_value(updated.sync_status)?,
            );
            let stored = self.store.update_character(&updated.id, &changes)?;
            view.replace(&stored);
            stored
        };

        self.queue.enqueue(&QueuedOperation::update(
            self.collection(),
            updated.id.as_str(),
            updated.to_document()?,
        ))?;
        Ok(Some(updated))
    }

    fn mutate_selected<F>(&self, updater: F) -> Result<Option<Character>>
    where
        F: FnOnce(&mut Character) -> bool,
    {
        self.apply_mutation(Target::Selected, |current| {
            let mut updated = current.clone();
            updater(&mut updated).then_some(updated)
        })
    }

    pub fn update_ability_score(&self, ability: Ability, score: i32) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            character.ability_scores = character.ability_scores.with(ability, score);
            true
        })
    }

    pub fn toggle_saving_throw_proficiency(&self, ability: Ability) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            let saves = &mut character.proficient_saving_throws;
            if let Some(position) = saves.iter().position(|a| *a == ability) {
                saves.remove(position);
            } else {
                saves.push(ability);
            }
            true
        })
    }

    /// Toggle proficiency in a skill; dropping proficiency also drops expertise
    pub fn toggle_skill_proficiency(&self, skill: &str) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            let Some(proficiency) = character.skills.get_mut(skill) else {
                return false;
            };
            proficiency.proficient = !proficiency.proficient;
            proficiency.expertise &= proficiency.proficient;
            true
        })
    }

    /// Toggle expertise; only proficient skills can carry it
    pub fn toggle_skill_expertise(&self, skill: &str) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            let Some(proficiency) = character.skills.get_mut(skill) else {
                return false;
            };
            if !proficiency.proficient {
                return false;
            }
            proficiency.expertise = !proficiency.expertise;
            true
        })
    }

    pub fn update_hit_points(&self, field: HitPointField, value: i32) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            character.hit_points = character.hit_points.with(field, value);
            true
        })
    }

    pub fn update_armor_class(&self, armor_class: i32) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            character.armor_class = armor_class;
            true
        })
    }

    pub fn update_speed(&self, speed: i32) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            character.speed = speed;
            true
        })
    }

    pub fn toggle_inspiration(&self) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            character.inspiration = !character.inspiration;
            true
        })
    }

    pub fn add_condition_immunity(&self, condition: Condition) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            if character.condition_immunities.contains(&condition) {
                return false;
            }
            character.condition_immunities.push(condition);
            true
        })
    }

    pub fn remove_condition_immunity(&self, condition: Condition) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            let before = character.condition_immunities.len();
            character.condition_immunities.retain(|c| *c != condition);
            character.condition_immunities.len() != before
        })
    }

    /// Apply a condition, replacing one of the same type.
    ///
    /// Returns `false` when nothing is selected or the character is immune.
    pub fn add_active_condition(&self, condition: ActiveCondition) -> Result<bool> {
        let applied = self.mutate_selected(|character| {
            if character.condition_immunities.contains(&condition.condition) {
                return false;
            }
            match character
                .active_conditions
                .iter_mut()
                .find(|active| active.condition == condition.condition)
            {
                Some(existing) => *existing = condition,
                None => character.active_conditions.push(condition),
            }
            true
        })?;
        Ok(applied.is_some())
    }

    pub fn remove_active_condition(&self, condition: Condition) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            let before = character.active_conditions.len();
            character
                .active_conditions
                .retain(|active| active.condition != condition);
            character.active_conditions.len() != before
        })
    }

    pub fn add_resistance(&self, resistance: Resistance) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            if character.resistances.contains(&resistance) {
                return false;
            }
            character.resistances.push(resistance);
            true
        })
    }

    pub fn remove_resistance(
        &self,
        damage_type: DamageType,
        kind: ResistanceKind,
    ) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            let before = character.resistances.len();
            character
                .resistances
                .retain(|r| !(r.damage_type == damage_type && r.kind == kind));
            character.resistances.len() != before
        })
    }

    /// Set the exhaustion level, clamped to `0..=10`
    pub fn update_exhaustion_level(&self, level: i32) -> Result<Option<Character>> {
        let level = u8::try_from(level.clamp(0, MAX_EXHAUSTION_LEVEL)).unwrap_or_default();
        self.mutate_selected(|character| {
            character.exhaustion_level = level;
            true
        })
    }

    /// Enter combat at round one, or leave it and clear the combat state
    pub fn toggle_combat_mode(&self) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            character.combat_mode = !character.combat_mode;
            character.combat_state = character.combat_mode.then(CombatState::default);
            true
        })
    }

    pub fn start_turn(&self) -> Result<Option<Character>> {
        self.mutate_combat(|state| state.is_player_turn = true)
    }

    pub fn end_turn(&self) -> Result<Option<Character>> {
        self.mutate_combat(|state| state.is_player_turn = false)
    }

    pub fn next_round(&self) -> Result<Option<Character>> {
        self.mutate_combat(|state| {
            state.round = state.round.saturating_add(1);
            state.is_player_turn = false;
        })
    }

    fn mutate_combat(&self, change: impl FnOnce(&mut CombatState)) -> Result<Option<Character>> {
        self.mutate_selected(|character| {
            if !character.combat_mode {
                return false;
            }
            let Some(state) = character.combat_state.as_mut() else {
                return false;
            };
            change(state);
            true
        })
    }
}
