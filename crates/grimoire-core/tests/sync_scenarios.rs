//! End-to-end behavior of the offline queue, merge and drain.

use std::sync::Arc;

use grimoire_core::config::EngineConfig;
use grimoire_core::models::{
    Ability, CharacterPatch, EnqueueOutcome, OperationKind, QueuedOperation,
};
use grimoire_core::remote::MemoryRemoteStore;
use grimoire_core::services::LocalStore;
use grimoire_core::sync::{merge, SyncEvent};
use grimoire_core::{Character, Engine, Error, OwnerId, SyncStatus};
use pretty_assertions::assert_eq;
use serde_json::json;

const OWNER: &str = "owner-1";
const COLLECTION: &str = "characters";

fn owner() -> OwnerId {
    OwnerId::new(OWNER)
}

fn device(remote: &MemoryRemoteStore, config: EngineConfig, online: bool) -> Engine {
    let engine = Engine::new(
        LocalStore::open_in_memory().unwrap(),
        Arc::new(remote.clone()),
        config,
        online,
    );
    engine.sign_in(owner());
    engine
}

fn seed_remote(remote: &MemoryRemoteStore, last_modified: i64) -> Character {
    let mut character = Character::new(owner(), last_modified);
    character.sync_status = SyncStatus::Synced;
    character.last_synced_at = Some(last_modified);
    remote.insert_document(
        COLLECTION,
        character.id.as_str(),
        character.to_document().unwrap(),
    );
    character
}

#[tokio::test]
async fn offline_mutations_leave_one_update_per_character() {
    let remote = MemoryRemoteStore::new();
    let first = seed_remote(&remote, 100);
    let second = seed_remote(&remote, 100);
    let engine = device(&remote, EngineConfig::default(), true);
    engine.characters().fetch_all(&owner()).await.unwrap();
    engine.set_online(false);

    let characters = engine.characters();
    characters.select(&first.id).unwrap();
    characters.update_ability_score(Ability::Dexterity, 16).unwrap();
    characters.toggle_inspiration().unwrap();
    characters.update_speed(35).unwrap();

    characters.select(&second.id).unwrap();
    characters.toggle_combat_mode().unwrap();
    characters.next_round().unwrap();

    let entries = engine.store().queued_operations(&owner()).unwrap();
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry.kind, OperationKind::Update);
        let id = entry.document_id.parse().unwrap();
        let stored = engine.store().get_character(&id).unwrap().unwrap();
        assert_eq!(entry.data, Some(stored.to_document().unwrap()));
    }

    let stored = engine.store().get_character(&first.id).unwrap().unwrap();
    assert_eq!(stored.ability_scores.dexterity, 16);
    assert!(stored.inspiration);
    assert_eq!(stored.speed, 35);
    assert_eq!(stored.sync_status, SyncStatus::Local);
    assert_eq!(engine.characters().characters().len(), 2);
}

#[tokio::test]
async fn repeated_update_keeps_latest_payload() {
    let remote = MemoryRemoteStore::new();
    let engine = device(&remote, EngineConfig::default(), false);

    let first = engine
        .queue()
        .enqueue(&QueuedOperation::update(COLLECTION, "a", json!({ "speed": 30 })))
        .unwrap();
    let second = engine
        .queue()
        .enqueue(&QueuedOperation::update(COLLECTION, "a", json!({ "speed": 40 })))
        .unwrap();

    let EnqueueOutcome::Appended(id) = first else {
        panic!("expected a new entry, got {first:?}");
    };
    assert_eq!(second, EnqueueOutcome::Coalesced(id));

    let entries = engine.store().queued_operations(&owner()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].data, Some(json!({ "speed": 40 })));
}

#[tokio::test]
async fn update_overrides_pending_delete() {
    let remote = MemoryRemoteStore::new();
    let engine = device(&remote, EngineConfig::default(), false);
    let queue = engine.queue();

    queue
        .enqueue(&QueuedOperation::delete(COLLECTION, "a"))
        .unwrap();
    queue
        .enqueue(&QueuedOperation::delete(COLLECTION, "a"))
        .unwrap();
    queue
        .enqueue(&QueuedOperation::update(COLLECTION, "a", json!({ "level": 2 })))
        .unwrap();

    let entries = engine.store().queued_operations(&owner()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, OperationKind::Update);
    assert_eq!(entries[0].retry_count, 0);
    assert_eq!(entries[0].data, Some(json!({ "level": 2 })));
}

#[test]
fn merge_prefers_unpushed_local_edits() {
    let mut local = Character::new(owner(), 100);
    local.sync_status = SyncStatus::Local;
    let mut remote = local.clone();
    remote.sync_status = SyncStatus::Synced;
    remote.last_modified = 200;
    remote.armor_class = 17;

    let merged = merge(vec![local.clone()], vec![remote]);
    assert_eq!(merged, vec![local]);
}

#[test]
fn merge_prefers_newer_remote_over_synced_local() {
    let mut local = Character::new(owner(), 100);
    local.sync_status = SyncStatus::Synced;
    let mut remote = local.clone();
    remote.last_modified = 200;
    remote.armor_class = 17;

    let merged = merge(vec![local], vec![remote.clone()]);
    assert_eq!(merged, vec![remote]);
}

#[tokio::test]
async fn exhausted_entry_is_dropped_for_good() {
    let remote = MemoryRemoteStore::new();
    let engine = device(&remote, EngineConfig::default().with_max_retries(1), false);
    let mut events = engine.subscribe_events();

    let created = engine
        .characters()
        .create(CharacterPatch::default())
        .await
        .unwrap();
    remote.fail_next_batches(2);
    engine.set_online(true);

    let first = engine.sync_now().await.unwrap();
    assert_eq!(first.retried, 1);
    assert_eq!(
        engine.store().queued_operations(&owner()).unwrap()[0].retry_count,
        1
    );

    let second = engine.sync_now().await.unwrap();
    assert_eq!(second.dropped, 1);
    assert_eq!(engine.pending_count().unwrap(), 0);

    let third = engine.sync_now().await.unwrap();
    assert_eq!(third.applied, 0);
    assert_eq!(remote.batch_count(), 0);
    assert!(remote.document(COLLECTION, created.id.as_str()).is_none());

    let mut dropped = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Dropped {
            document_id,
            retry_count,
            ..
        } = event
        {
            dropped.push((document_id, retry_count));
        }
    }
    assert_eq!(dropped, vec![(created.id.to_string(), 2)]);
}

#[tokio::test]
async fn failed_batch_keeps_every_entry() {
    let remote = MemoryRemoteStore::new();
    let engine = device(&remote, EngineConfig::default(), false);
    for name in ["Vax", "Vex", "Percy"] {
        engine
            .characters()
            .create(CharacterPatch::default().with_name(name))
            .await
            .unwrap();
    }

    remote.fail_next_batches(1);
    engine.set_online(true);
    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.retried, 3);
    assert_eq!(report.cleared, 0);

    let entries = engine.store().queued_operations(&owner()).unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|entry| entry.retry_count == 1));
    assert_eq!(remote.write_count(), 0);

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.applied, 3);
    assert_eq!(engine.pending_count().unwrap(), 0);
}

#[tokio::test]
async fn offline_create_syncs_after_reconnect() {
    let remote = MemoryRemoteStore::new();
    let engine = device(&remote, EngineConfig::default(), false);

    let created = engine
        .characters()
        .create(CharacterPatch::default().with_name("Grog"))
        .await
        .unwrap();
    let entries = engine.store().queued_operations(&owner()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, OperationKind::Create);

    engine.set_online(true);
    engine.sync_now().await.unwrap();

    let stored = engine.store().get_character(&created.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert!(stored.last_synced_at.is_some());
    assert_eq!(engine.pending_count().unwrap(), 0);
    assert_eq!(
        remote.document(COLLECTION, created.id.as_str()).unwrap()["name"],
        "Grog"
    );
}

#[tokio::test]
async fn fourth_character_is_rejected() {
    let remote = MemoryRemoteStore::new();
    let engine = device(&remote, EngineConfig::default(), false);
    for _ in 0..3 {
        engine
            .characters()
            .create(CharacterPatch::default())
            .await
            .unwrap();
    }

    let result = engine.characters().create(CharacterPatch::default()).await;
    assert!(matches!(result, Err(Error::CapacityExceeded { limit: 3 })));
    assert_eq!(engine.store().count_characters(&owner()).unwrap(), 3);
    assert_eq!(engine.pending_count().unwrap(), 3);
}

#[tokio::test]
async fn offline_edit_wins_over_other_device() {
    let remote = MemoryRemoteStore::new();
    let shared = seed_remote(&remote, 100);

    let laptop = device(&remote, EngineConfig::default(), true);
    let phone = device(&remote, EngineConfig::default(), true);
    laptop.characters().fetch_all(&owner()).await.unwrap();
    phone.characters().fetch_all(&owner()).await.unwrap();

    laptop.set_online(false);
    laptop.characters().select(&shared.id).unwrap();
    laptop.characters().update_speed(40).unwrap();

    phone.characters().select(&shared.id).unwrap();
    phone.characters().update_armor_class(15).unwrap();
    phone.sync_now().await.unwrap();
    assert_eq!(
        remote.document(COLLECTION, shared.id.as_str()).unwrap()["armorClass"],
        15
    );

    laptop.set_online(true);
    let merged = laptop.characters().fetch_all(&owner()).await.unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].sync_status, SyncStatus::Local);
    assert_eq!(merged[0].speed, 40);
    assert_eq!(merged[0].armor_class, 10);

    laptop.sync_now().await.unwrap();
    let document = remote.document(COLLECTION, shared.id.as_str()).unwrap();
    assert_eq!(document["speed"], 40);
    assert_eq!(document["armorClass"], 10);
    assert_eq!(
        laptop
            .store()
            .get_character(&shared.id)
            .unwrap()
            .unwrap()
            .sync_status,
        SyncStatus::Synced
    );
}
