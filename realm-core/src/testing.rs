//! Testing utilities for the world core.
//!
//! This module provides tools for integration testing:
//! - `sample_catalog` with a small two-chapter story
//! - `TestWorld` for scripted scenarios against a live module
//! - Assertion helpers for verifying ownership and placement

use crate::area::Placeable;
use crate::config::ModuleConfig;
use crate::content::{AreaData, ChapterData, CharacterData, ContentCatalog, ObjectData};
use crate::effect::{Effect, EffectId, Modifier};
use crate::migration::MigrationReport;
use crate::module::Module;
use crate::object::{AreaObject, Character, Entity};
use crate::serial::EntityKey;

/// Content for a small story.
///
/// - `prologue` starts in `forest` and preloads `forest` and `village`.
/// - `forest` holds the player `hero#0`, goblins `#0` and `#1`, a wolf, and
///   a `clearing` subarea with a chest.
/// - `cave` (with a bat) exists only as content and loads on demand.
/// - `act_one` starts in `city`.
pub fn sample_catalog() -> ContentCatalog {
    ContentCatalog::new()
        .with_chapter(ChapterData::new("prologue", "forest").with_areas(["forest", "village"]))
        .with_chapter(ChapterData::new("act_one", "city"))
        .with_area(
            AreaData::new("forest")
                .with_character(CharacterData::new("hero", "Hero").as_player())
                .with_character(CharacterData::new("goblin", "Goblin").with_serial("0"))
                .with_character(CharacterData::new("goblin", "Goblin").with_serial("1"))
                .with_character(CharacterData::new("wolf", "Wolf"))
                .with_subarea(AreaData::new("clearing").with_object(ObjectData::new("chest", "Chest"))),
        )
        .with_area(AreaData::new("cave").with_character(CharacterData::new("bat", "Bat")))
        .with_area(AreaData::new("village"))
        .with_area(AreaData::new("city"))
        .with_character(CharacterData::new("goblin", "Goblin"))
        .with_character(CharacterData::new("bat", "Bat"))
        .with_object(ObjectData::new("chest", "Chest"))
}

/// Config matching [`sample_catalog`].
pub fn sample_config() -> ModuleConfig {
    ModuleConfig::new("Test Module").with_chapters(["prologue", "act_one"])
}

/// Test harness for running world scenarios.
pub struct TestWorld {
    pub module: Module,
}

impl TestWorld {
    /// Create a world from the sample content.
    pub fn new() -> Self {
        Self::with_config(sample_config())
    }

    /// Create a world from the sample content with a custom config.
    pub fn with_config(config: ModuleConfig) -> Self {
        match Module::new(config, sample_catalog()) {
            Ok(module) => Self { module },
            Err(err) => panic!("sample content failed to load: {err}"),
        }
    }

    /// Run one tick.
    pub fn tick(&mut self, delta: u64) -> MigrationReport {
        self.module.update(delta)
    }

    /// Declare a new area for a character, as a feature would.
    pub fn send(&mut self, key: &EntityKey, area_id: &str) -> &mut Self {
        match self.module.chapter_mut().find_mut::<Character>(key) {
            Some(character) => character.set_area_id(area_id),
            None => panic!("no character {key} to send to {area_id}"),
        }
        self
    }

    /// Give a character an effect that moves it on its next update.
    pub fn push(&mut self, key: &EntityKey, area_id: &str) -> EffectId {
        let effect = Effect::new("Push").with_modifier(Modifier::AreaChange {
            area_id: area_id.to_string(),
        });
        match self.module.chapter_mut().find_mut::<Character>(key) {
            Some(character) => character.add_effect(effect),
            None => panic!("no character {key} to push"),
        }
    }

    pub fn character(&self, key: &EntityKey) -> Option<&Character> {
        self.module.chapter().find(key)
    }

    pub fn object(&self, key: &EntityKey) -> Option<&AreaObject> {
        self.module.chapter().find(key)
    }

    /// Id of the area directly owning `key`.
    pub fn area_of(&self, key: &EntityKey) -> Option<&str> {
        self.module.chapter().object_area(key).map(|a| a.id())
    }

    /// Number of areas that directly own `key` as an entity of kind `E`.
    pub fn owner_count<E: Placeable>(&self, key: &EntityKey) -> usize {
        self.module
            .chapter()
            .all_areas()
            .into_iter()
            .filter(|a| a.contains::<E>(key))
            .count()
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for an entity key.
pub fn key(id: &str, serial: &str) -> EntityKey {
    EntityKey::new(id, serial)
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that `key` is directly owned by the area `area_id`.
#[track_caller]
pub fn assert_in_area(world: &TestWorld, key: &EntityKey, area_id: &str) {
    assert_eq!(
        world.area_of(key),
        Some(area_id),
        "Expected {key} to be in '{area_id}'"
    );
}

/// Assert that exactly one area owns `key`.
#[track_caller]
pub fn assert_single_owner(world: &TestWorld, key: &EntityKey) {
    let owners = world.owner_count::<Character>(key) + world.owner_count::<AreaObject>(key);
    assert_eq!(owners, 1, "Expected {key} to have exactly one owner, found {owners}");
}

/// Assert that no two live entities share a key.
#[track_caller]
pub fn assert_unique_keys(world: &TestWorld) {
    let chapter = world.module.chapter();
    let mut keys: Vec<EntityKey> = chapter
        .characters()
        .iter()
        .map(|c| c.key())
        .chain(chapter.objects().iter().map(|o| o.key()))
        .collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total, "Expected every live entity key to be unique");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Relocation;

    #[test]
    fn test_sample_world_loads() {
        let world = TestWorld::new();

        assert_in_area(&world, &key("hero", "0"), "forest");
        assert_in_area(&world, &key("goblin", "1"), "forest");
        assert_in_area(&world, &key("chest", "0"), "clearing");
        assert!(world.module.chapter().area("cave").is_none());
        assert_unique_keys(&world);
    }

    #[test]
    fn test_send_and_tick() {
        let mut world = TestWorld::new();
        let wolf = key("wolf", "0");

        world.send(&wolf, "village");
        assert_eq!(
            world.character(&wolf).unwrap().relocation(),
            &Relocation::Pending
        );
        world.tick(16);

        assert_in_area(&world, &wolf, "village");
        assert_single_owner(&world, &wolf);
    }

    #[test]
    fn test_push_moves_on_next_tick() {
        let mut world = TestWorld::new();
        let goblin = key("goblin", "0");

        world.push(&goblin, "cave");
        let report = world.tick(16);

        assert_eq!(report.moved(), 1);
        assert_in_area(&world, &goblin, "cave");
        assert_in_area(&world, &key("bat", "0"), "cave");
    }

    #[test]
    #[should_panic(expected = "exactly one owner")]
    fn test_single_owner_detects_missing_entity() {
        let world = TestWorld::new();
        assert_single_owner(&world, &key("dragon", "0"));
    }
}
