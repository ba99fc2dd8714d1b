//! The module: top-level owner of the running world.
//!
//! One module per process. It owns the serial registry, the active chapter,
//! the content source and the configuration, and is the only place that
//! creates entities after startup.

use crate::area::Placeable;
use crate::chapter::Chapter;
use crate::config::ModuleConfig;
use crate::content::{ContentError, ContentSource};
use crate::migration::MigrationReport;
use crate::object::{AreaObject, Character};
use crate::persist::{save_path, ImportReport, PersistError, SavedModule};
use crate::serial::{EntityKey, SerialRegistry};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from module operations.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Chapter not found: {0}")]
    ChapterNotFound(String),

    #[error("Area not found: {0}")]
    AreaNotFound(String),

    #[error("No character content for: {0}")]
    CharacterNotFound(String),

    #[error("No object content for: {0}")]
    ObjectNotFound(String),

    #[error("No chapters configured")]
    NoChapters,

    #[error("No chapter follows {0}")]
    NoNextChapter(String),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Content error: {0}")]
    Content(#[from] ContentError),
}

/// The running world.
pub struct Module {
    config: ModuleConfig,
    registry: SerialRegistry,
    chapter: Chapter,
    content: Box<dyn ContentSource>,
    /// Simulated time in milliseconds.
    elapsed: u64,
}

impl Module {
    /// Start a module in its configured start chapter.
    pub fn new(
        config: ModuleConfig,
        content: impl ContentSource + 'static,
    ) -> Result<Self, ModuleError> {
        let content: Box<dyn ContentSource> = Box::new(content);
        let start = config.start_chapter().ok_or(ModuleError::NoChapters)?;
        let mut registry = SerialRegistry::new();
        let chapter = build_chapter(start, content.as_ref(), &mut registry)?;

        info!(module = %config.name, chapter = %chapter.id(), "module started");

        Ok(Self {
            config,
            registry,
            chapter,
            content,
            elapsed: 0,
        })
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn registry(&self) -> &SerialRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SerialRegistry {
        &mut self.registry
    }

    pub fn chapter(&self) -> &Chapter {
        &self.chapter
    }

    pub fn chapter_mut(&mut self) -> &mut Chapter {
        &mut self.chapter
    }

    pub fn content(&self) -> &dyn ContentSource {
        self.content.as_ref()
    }

    /// Simulated time in milliseconds.
    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    /// Advance the world by `delta` milliseconds: update every entity, then
    /// reconcile locations.
    pub fn update(&mut self, delta: u64) -> MigrationReport {
        self.elapsed = self.elapsed.saturating_add(delta);
        self.chapter
            .update(delta, self.content.as_ref(), &mut self.registry)
    }

    // ========================================================================
    // Chapters
    // ========================================================================

    /// Replace the active chapter. Player characters move to the new
    /// chapter's start area with their serials intact; everything else in
    /// the old chapter is released.
    ///
    /// The current chapter is left untouched if the new one cannot be built.
    pub fn change_chapter(&mut self, id: &str) -> Result<(), ModuleError> {
        let mut next = build_chapter(id, self.content.as_ref(), &mut self.registry)?;
        let start = next.config().start_area.clone();
        let area = next
            .area_path(&start)
            .and_then(|path| next.area_at_mut(&path))
            .ok_or(ModuleError::AreaNotFound(start))?;

        let previous = self.chapter.id().to_string();
        let players = self.chapter.take_players();
        let carried = players.len();
        for player in players {
            area.insert(player);
        }

        self.chapter = next;
        info!(from = %previous, to = %id, players = carried, "chapter changed");
        Ok(())
    }

    /// Move to the chapter after the current one in the configured order.
    pub fn next_chapter(&mut self) -> Result<(), ModuleError> {
        let current = self.chapter.id();
        let next = self
            .config
            .chapter_after(current)
            .ok_or_else(|| ModuleError::NoNextChapter(current.to_string()))?
            .to_string();
        self.change_chapter(&next)
    }

    // ========================================================================
    // Spawning
    // ========================================================================

    /// Create a character from content and place it in `area_id`, loading
    /// the area from content if needed.
    pub fn spawn_character(
        &mut self,
        base_id: &str,
        area_id: &str,
    ) -> Result<EntityKey, ModuleError> {
        let data = self
            .content
            .character_data(base_id)
            .ok_or_else(|| ModuleError::CharacterNotFound(base_id.to_string()))?;
        self.register(Character::from_data(&data), area_id)
    }

    pub fn spawn_object(&mut self, base_id: &str, area_id: &str) -> Result<EntityKey, ModuleError> {
        let data = self
            .content
            .object_data(base_id)
            .ok_or_else(|| ModuleError::ObjectNotFound(base_id.to_string()))?;
        self.register(AreaObject::from_data(&data), area_id)
    }

    /// Register a character built by the caller and place it.
    pub fn register_character(
        &mut self,
        character: Character,
        area_id: &str,
    ) -> Result<EntityKey, ModuleError> {
        self.register(character, area_id)
    }

    pub fn register_object(
        &mut self,
        object: AreaObject,
        area_id: &str,
    ) -> Result<EntityKey, ModuleError> {
        self.register(object, area_id)
    }

    fn register<E: Placeable>(&mut self, mut entity: E, area_id: &str) -> Result<EntityKey, ModuleError> {
        let path = self
            .chapter
            .materialize(area_id, self.content.as_ref(), &mut self.registry)
            .ok_or_else(|| ModuleError::AreaNotFound(area_id.to_string()))?;
        let area = self
            .chapter
            .area_at_mut(&path)
            .ok_or_else(|| ModuleError::AreaNotFound(area_id.to_string()))?;

        let assignment = self.registry.assign(entity.identity_mut());
        if assignment.is_collision() {
            warn!(id = %entity.base_id(), serial = %entity.serial(), "spawned entity serial reassigned");
        }
        let key = entity.key();
        area.insert(entity);
        Ok(key)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Capture the module for saving.
    pub fn export(&self) -> SavedModule {
        SavedModule::new(
            self.config.name.clone(),
            &self.chapter,
            &self.registry,
            self.elapsed,
        )
    }

    /// Replace the world with a saved one.
    ///
    /// The import runs against a fresh registry, so saved serials are kept
    /// unless the save itself contains duplicates. Serials the saved registry
    /// had recorded stay reserved after the load. On error the current world
    /// is left untouched.
    pub fn restore(&mut self, saved: &SavedModule) -> Result<ImportReport, ModuleError> {
        let mut registry = SerialRegistry::new();
        let (chapter, mut report) =
            crate::persist::import_chapter(&saved.chapter, &mut registry, self.config.collision_policy)?;
        report.reserved += registry.reserve_snapshot(&saved.registry);

        self.registry = registry;
        self.chapter = chapter;
        self.elapsed = saved.metadata.elapsed_ms;
        Ok(report)
    }

    /// Path of the save file for `slot` in the configured save directory.
    pub fn save_path(&self, slot: &str) -> PathBuf {
        save_path(&self.config.save_dir, &self.config.name, slot)
    }

    /// Save to a named slot in the configured save directory.
    pub async fn save(&self, slot: &str) -> Result<PathBuf, ModuleError> {
        let path = self.save_path(slot);
        self.save_to(&path).await?;
        Ok(path)
    }

    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ModuleError> {
        let path = path.as_ref();
        self.export().save_json(path).await?;
        info!(path = %path.display(), chapter = %self.chapter.id(), "module saved");
        Ok(())
    }

    /// Load a named slot from the configured save directory.
    pub async fn load(&mut self, slot: &str) -> Result<ImportReport, ModuleError> {
        let path = self.save_path(slot);
        self.load_from(&path).await
    }

    pub async fn load_from(&mut self, path: impl AsRef<Path>) -> Result<ImportReport, ModuleError> {
        let path = path.as_ref();
        let saved = SavedModule::load_json(path).await?;
        let report = self.restore(&saved)?;
        info!(path = %path.display(), chapter = %self.chapter.id(), "module loaded");
        Ok(report)
    }
}

/// Build a chapter from content with its start area materialized.
fn build_chapter(
    id: &str,
    content: &dyn ContentSource,
    registry: &mut SerialRegistry,
) -> Result<Chapter, ModuleError> {
    let data = content
        .chapter_data(id)
        .ok_or_else(|| ModuleError::ChapterNotFound(id.to_string()))?;
    let mut chapter = Chapter::from_data(&data, content, registry);
    chapter
        .materialize(&data.start_area, content, registry)
        .ok_or_else(|| ModuleError::AreaNotFound(data.start_area.clone()))?;
    Ok(chapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{AreaData, ChapterData, CharacterData, ContentCatalog, ObjectData};

    fn catalog() -> ContentCatalog {
        ContentCatalog::new()
            .with_chapter(ChapterData::new("prologue", "forest").with_areas(["forest"]))
            .with_chapter(ChapterData::new("act_one", "city"))
            .with_chapter(ChapterData::new("broken", "void"))
            .with_area(
                AreaData::new("forest")
                    .with_character(CharacterData::new("hero", "Hero").as_player())
                    .with_character(CharacterData::new("goblin", "Goblin").with_serial("0")),
            )
            .with_area(AreaData::new("city"))
            .with_area(AreaData::new("cave"))
            .with_character(CharacterData::new("goblin", "Goblin"))
            .with_object(ObjectData::new("chest", "Chest"))
    }

    fn module() -> Module {
        let config = ModuleConfig::new("Border Keep").with_chapters(["prologue", "act_one"]);
        Module::new(config, catalog()).unwrap()
    }

    #[test]
    fn test_new_requires_chapters() {
        assert!(matches!(
            Module::new(ModuleConfig::new("Empty"), catalog()),
            Err(ModuleError::NoChapters)
        ));
        assert!(matches!(
            Module::new(
                ModuleConfig::new("Missing").with_chapters(["epilogue"]),
                catalog()
            ),
            Err(ModuleError::ChapterNotFound(id)) if id == "epilogue"
        ));
    }

    #[test]
    fn test_spawn_uses_registry() {
        let mut module = module();

        let key = module.spawn_character("goblin", "forest").unwrap();

        assert_eq!(key, EntityKey::new("goblin", "1"));
        assert!(module.chapter().character("goblin", "0").is_some());
        assert!(module.chapter().character("goblin", "1").is_some());
    }

    #[test]
    fn test_spawn_materializes_area() {
        let mut module = module();

        let key = module.spawn_object("chest", "cave").unwrap();

        assert_eq!(module.chapter().object_area(&key).unwrap().id(), "cave");
        assert!(matches!(
            module.spawn_object("chest", "void"),
            Err(ModuleError::AreaNotFound(_))
        ));
        assert!(matches!(
            module.spawn_character("dragon", "forest"),
            Err(ModuleError::CharacterNotFound(_))
        ));
    }

    #[test]
    fn test_register_reassigns_duplicate_serial() {
        let mut module = module();

        let key = module
            .register_character(Character::new("goblin", "Impostor").with_serial("0"), "forest")
            .unwrap();

        assert_ne!(key.serial, "0");
        assert_eq!(module.chapter().character("goblin", "0").unwrap().name, "Goblin");
    }

    #[test]
    fn test_change_chapter_carries_players() {
        let mut module = module();
        let hero = EntityKey::new("hero", "0");

        module.next_chapter().unwrap();

        assert_eq!(module.chapter().id(), "act_one");
        assert_eq!(module.chapter().object_area(&hero).unwrap().id(), "city");
        assert!(module.chapter().character("goblin", "0").is_none());
        assert!(matches!(
            module.next_chapter(),
            Err(ModuleError::NoNextChapter(id)) if id == "act_one"
        ));
    }

    #[test]
    fn test_failed_chapter_change_keeps_current() {
        let mut module = module();

        assert!(matches!(
            module.change_chapter("broken"),
            Err(ModuleError::AreaNotFound(_))
        ));
        assert_eq!(module.chapter().id(), "prologue");
        assert!(module.chapter().character("hero", "0").is_some());
    }

    #[test]
    fn test_update_tracks_elapsed() {
        let mut module = module();
        module.update(16);
        module.update(16);
        assert_eq!(module.elapsed(), 32);
    }

    #[test]
    fn test_restore_replaces_world() {
        let mut module = module();
        module.update(100);
        let saved = module.export();

        module.spawn_character("goblin", "forest").unwrap();
        module.update(50);
        let report = module.restore(&saved).unwrap();

        assert_eq!(report.entities, 2);
        assert_eq!(module.elapsed(), 100);
        assert!(module.chapter().character("goblin", "1").is_none());
        assert_eq!(module.registry().issued_count("goblin"), 1);
    }

    #[test]
    fn test_restore_keeps_stale_serials_reserved() {
        let mut module = module();
        module.spawn_character("goblin", "forest").unwrap();
        module
            .chapter_mut()
            .area_mut("forest")
            .unwrap()
            .remove_character(&EntityKey::new("goblin", "1"));
        let saved = module.export();

        let report = module.restore(&saved).unwrap();

        assert_eq!(report.reserved, 1);
        assert!(module.registry().is_issued("goblin", "1"));
        let key = module.spawn_character("goblin", "forest").unwrap();
        assert_eq!(key, EntityKey::new("goblin", "2"));
    }
}
