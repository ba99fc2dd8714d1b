//! Chapter persistence for save/load.
//!
//! A chapter is exported into a record tree that mirrors area ownership
//! one to one. Cross-entity links are flattened into `(field, id, serial)`
//! triples on the owning entity's record.
//!
//! Import runs in two strict passes. The first rebuilds areas top-down and
//! pushes every entity through the [`SerialRegistry`]; the second binds every
//! stored reference by whole-chapter lookup. Nothing is resolved until every
//! entity exists, so forward references work.

use crate::area::{Area, Placeable};
use crate::chapter::{Chapter, ChapterConfig};
use crate::config::CollisionPolicy;
use crate::effect::{Effect, EffectId, Modifier};
use crate::object::{AreaObject, Attitude, Character, Entity, Health, Memory};
use crate::reference::{resolve_references, Reference, ReferenceField, ResolutionReport};
use crate::serial::{Assignment, RegistrySnapshot, SerialRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, warn};

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Serial collision: {id}#{serial} is already held by another entity")]
    SerialCollision { id: String, serial: String },
}

/// Current save file version.
pub const SAVE_VERSION: u32 = 1;

// ============================================================================
// Records
// ============================================================================

/// A stored link from one entity field to another entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub field: String,
    pub id: String,
    pub serial: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRecord {
    pub id: EffectId,
    pub name: String,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub elapsed: u64,
    #[serde(default)]
    pub applied: bool,
}

impl From<&Effect> for EffectRecord {
    fn from(effect: &Effect) -> Self {
        Self {
            id: effect.id,
            name: effect.name.clone(),
            modifiers: effect.modifiers.clone(),
            duration: effect.duration,
            elapsed: effect.elapsed,
            applied: effect.applied,
        }
    }
}

impl EffectRecord {
    /// Rebuild the effect without its source; the source comes back through
    /// the entity's reference list.
    fn to_effect(&self) -> Effect {
        Effect {
            id: self.id,
            name: self.name.clone(),
            source: None,
            modifiers: self.modifiers.clone(),
            duration: self.duration,
            elapsed: self.elapsed,
            applied: self.applied,
        }
    }
}

/// A memory record. Its target is stored in the owner's reference list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub attitude: Attitude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub id: String,
    pub serial: String,
    /// Declared area at save time.
    pub area_id: String,
    pub name: String,
    pub health: Health,
    #[serde(default)]
    pub player: bool,
    #[serde(default)]
    pub flags: BTreeSet<String>,
    #[serde(default)]
    pub effects: Vec<EffectRecord>,
    #[serde(default)]
    pub memory: Vec<MemoryRecord>,
    #[serde(default)]
    pub references: Vec<ReferenceRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: String,
    pub serial: String,
    pub area_id: String,
    pub name: String,
    pub health: Health,
    #[serde(default)]
    pub flags: BTreeSet<String>,
    #[serde(default)]
    pub effects: Vec<EffectRecord>,
    #[serde(default)]
    pub references: Vec<ReferenceRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaRecord {
    pub id: String,
    #[serde(default)]
    pub characters: Vec<CharacterRecord>,
    #[serde(default)]
    pub objects: Vec<ObjectRecord>,
    #[serde(default)]
    pub subareas: Vec<AreaRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub id: String,
    pub start_area: String,
    #[serde(default)]
    pub areas: Vec<AreaRecord>,
}

// ============================================================================
// Export
// ============================================================================

/// Flatten a chapter into a record tree.
pub fn export_chapter(chapter: &Chapter) -> ChapterRecord {
    ChapterRecord {
        id: chapter.id().to_string(),
        start_area: chapter.config().start_area.clone(),
        areas: chapter.areas().map(export_area).collect(),
    }
}

fn export_area(area: &Area) -> AreaRecord {
    AreaRecord {
        id: area.id().to_string(),
        characters: area.characters().map(export_character).collect(),
        objects: area.objects().map(export_object).collect(),
        subareas: area.subareas().map(export_area).collect(),
    }
}

fn export_character(character: &Character) -> CharacterRecord {
    CharacterRecord {
        id: character.base_id().to_string(),
        serial: character.serial().to_string(),
        area_id: character.area_id().to_string(),
        name: character.name.clone(),
        health: character.health,
        player: character.player,
        flags: character.flags.clone(),
        effects: character.effects().iter().map(EffectRecord::from).collect(),
        memory: character
            .memory()
            .iter()
            .map(|m| MemoryRecord {
                attitude: m.attitude,
            })
            .collect(),
        references: export_references(character),
    }
}

fn export_object(object: &AreaObject) -> ObjectRecord {
    ObjectRecord {
        id: object.base_id().to_string(),
        serial: object.serial().to_string(),
        area_id: object.area_id().to_string(),
        name: object.name.clone(),
        health: object.health,
        flags: object.flags.clone(),
        effects: object.effects().iter().map(EffectRecord::from).collect(),
        references: export_references(object),
    }
}

fn export_references<E: Entity>(entity: &E) -> Vec<ReferenceRecord> {
    entity
        .references()
        .into_iter()
        .map(|(field, reference)| ReferenceRecord {
            field: field.to_string(),
            id: reference.key().id.clone(),
            serial: reference.key().serial.clone(),
        })
        .collect()
}

// ============================================================================
// Import
// ============================================================================

/// A serial that had to be replaced while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialCollision {
    pub id: String,
    pub saved: String,
    pub assigned: String,
}

/// What happened during an import.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Entities created and placed.
    pub entities: usize,
    pub collisions: Vec<SerialCollision>,
    /// Subareas skipped because their parent already had one with that id.
    pub dropped_areas: Vec<String>,
    /// Serials named only by stored references, now reserved.
    pub reserved: usize,
    pub resolution: ResolutionReport,
}

/// Rebuild a chapter from its record tree.
///
/// Every entity goes through `registry`. A serial collision is fatal under
/// [`CollisionPolicy::Reject`]; under [`CollisionPolicy::Reassign`] the
/// entity keeps loading with a fresh serial and the collision is reported.
pub fn import_chapter(
    record: &ChapterRecord,
    registry: &mut SerialRegistry,
    policy: CollisionPolicy,
) -> Result<(Chapter, ImportReport), PersistError> {
    let mut chapter = Chapter::new(ChapterConfig::new(
        record.id.clone(),
        record.start_area.clone(),
    ));
    let mut report = ImportReport::default();

    // Pass 1: areas and entities
    for area in &record.areas {
        let area = import_area(area, registry, policy, &mut report)?;
        chapter.add_area(area);
    }
    report.reserved = reserve_referenced(&record.areas, registry);

    // Pass 2: cross-references
    report.resolution = resolve_references(&mut chapter);

    info!(
        chapter = %record.id,
        entities = report.entities,
        collisions = report.collisions.len(),
        reserved = report.reserved,
        resolved = report.resolution.resolved,
        dangling = report.resolution.dangling.len(),
        "chapter imported"
    );

    Ok((chapter, report))
}

fn import_area(
    record: &AreaRecord,
    registry: &mut SerialRegistry,
    policy: CollisionPolicy,
    report: &mut ImportReport,
) -> Result<Area, PersistError> {
    let mut area = Area::new(record.id.clone());

    for character in &record.characters {
        let restored = restore_character(character);
        let restored = register(restored, registry, policy, report)?;
        place(&mut area, restored, &character.area_id);
    }
    for object in &record.objects {
        let restored = restore_object(object);
        let restored = register(restored, registry, policy, report)?;
        place(&mut area, restored, &object.area_id);
    }
    for subarea in &record.subareas {
        let subarea = import_area(subarea, registry, policy, report)?;
        if let Err(dropped) = area.add_subarea(subarea) {
            let lost = dropped.all_characters().len() + dropped.all_objects().len();
            report.entities -= lost;
            report.dropped_areas.push(dropped.id().to_string());
        }
    }

    Ok(area)
}

/// Reserve every serial a stored reference names, so entities that were
/// gone at save time never lend their serial to a newcomer.
fn reserve_referenced(areas: &[AreaRecord], registry: &mut SerialRegistry) -> usize {
    let mut reserved = 0;
    for area in areas {
        let references = area
            .characters
            .iter()
            .flat_map(|c| &c.references)
            .chain(area.objects.iter().flat_map(|o| &o.references));
        for reference in references {
            if registry.reserve(&reference.id, &reference.serial) {
                debug!(id = %reference.id, serial = %reference.serial, "reserved referenced serial");
                reserved += 1;
            }
        }
        reserved += reserve_referenced(&area.subareas, registry);
    }
    reserved
}

fn register<E: Entity>(
    mut entity: E,
    registry: &mut SerialRegistry,
    policy: CollisionPolicy,
    report: &mut ImportReport,
) -> Result<E, PersistError> {
    if let Assignment::Reassigned { previous } = registry.assign(entity.identity_mut()) {
        error!(
            id = %entity.base_id(),
            saved = %previous,
            assigned = %entity.serial(),
            "serial collision while loading"
        );
        if policy == CollisionPolicy::Reject {
            return Err(PersistError::SerialCollision {
                id: entity.base_id().to_string(),
                serial: previous,
            });
        }
        report.collisions.push(SerialCollision {
            id: entity.base_id().to_string(),
            saved: previous,
            assigned: entity.serial().to_string(),
        });
    }
    report.entities += 1;
    Ok(entity)
}

/// Attach `entity` to `area`, then restore its declared area if it was
/// waiting to move when saved.
fn place<E: Placeable>(area: &mut Area, entity: E, saved_area: &str) {
    let key = entity.key();
    area.insert(entity);
    if saved_area != area.id() {
        if let Some(entity) = area.get_mut::<E>(&key) {
            entity.set_area_id(saved_area);
        }
    }
}

fn restore_character(record: &CharacterRecord) -> Character {
    let mut character = Character::new(record.id.clone(), record.name.clone())
        .with_serial(record.serial.clone())
        .with_health(record.health);
    character.player = record.player;
    character.flags = record.flags.clone();
    for effect in &record.effects {
        character.push_effect(effect.to_effect());
    }

    let mut references = parse_references(record, &record.references);
    for (index, memory) in record.memory.iter().enumerate() {
        let field = ReferenceField::MemoryTarget(index);
        match references.iter().position(|(f, _)| *f == field) {
            Some(position) => {
                let (_, target) = references.remove(position);
                character.push_memory(Memory {
                    target,
                    attitude: memory.attitude,
                });
            }
            None => warn!(
                id = %record.id,
                serial = %record.serial,
                memory = index,
                "memory record without a target dropped"
            ),
        }
    }

    restore_references(&mut character, references);
    character
}

fn restore_object(record: &ObjectRecord) -> AreaObject {
    let mut object =
        AreaObject::new(record.id.clone(), record.name.clone()).with_serial(record.serial.clone());
    object.health = record.health;
    object.flags = record.flags.clone();
    for effect in &record.effects {
        object.push_effect(effect.to_effect());
    }

    let references = parse_references(record, &record.references);
    restore_references(&mut object, references);
    object
}

/// Identity fields shared by entity records, used for log context.
trait RecordKey {
    fn key(&self) -> (&str, &str);
}

impl RecordKey for CharacterRecord {
    fn key(&self) -> (&str, &str) {
        (&self.id, &self.serial)
    }
}

impl RecordKey for ObjectRecord {
    fn key(&self) -> (&str, &str) {
        (&self.id, &self.serial)
    }
}

/// Turn stored triples into unresolved references, dropping unknown fields.
fn parse_references(
    owner: &impl RecordKey,
    records: &[ReferenceRecord],
) -> Vec<(ReferenceField, Reference)> {
    let (id, serial) = owner.key();
    records
        .iter()
        .filter_map(|r| match r.field.parse::<ReferenceField>() {
            Ok(field) => Some((field, Reference::unresolved(r.id.clone(), r.serial.clone()))),
            Err(err) => {
                warn!(id = %id, serial = %serial, error = %err, "skipping stored reference");
                None
            }
        })
        .collect()
}

fn restore_references<E: Entity>(entity: &mut E, references: Vec<(ReferenceField, Reference)>) {
    for (field, reference) in references {
        if !entity.restore_reference(field, reference) {
            warn!(
                owner = %entity.key(),
                field = %field,
                "stored reference names a field the entity does not have"
            );
        }
    }
}

// ============================================================================
// Save Files
// ============================================================================

/// A saved module with everything needed to resume play.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedModule {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created.
    pub saved_at: String,

    pub metadata: SaveMetadata,

    /// The active chapter.
    pub chapter: ChapterRecord,

    /// Every serial recorded when the save was made, live or stale.
    #[serde(default)]
    pub registry: RegistrySnapshot,
}

/// Summary of a save file, readable without loading the chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub module_name: String,
    pub chapter_id: String,
    pub characters: usize,
    pub objects: usize,

    /// Simulated time in milliseconds.
    #[serde(default)]
    pub elapsed_ms: u64,

    /// When the save was created (duplicated from parent for peek access).
    #[serde(default)]
    pub saved_at: String,
}

impl SavedModule {
    /// Capture a chapter and the registry that issued its serials.
    pub fn new(
        module_name: impl Into<String>,
        chapter: &Chapter,
        registry: &SerialRegistry,
        elapsed_ms: u64,
    ) -> Self {
        let saved_at = chrono_now();
        let metadata = SaveMetadata {
            module_name: module_name.into(),
            chapter_id: chapter.id().to_string(),
            characters: chapter.characters().len(),
            objects: chapter.objects().len(),
            elapsed_ms,
            saved_at: saved_at.clone(),
        };

        Self {
            version: SAVE_VERSION,
            saved_at,
            metadata,
            chapter: export_chapter(chapter),
            registry: registry.snapshot(),
        }
    }

    /// Save to a JSON file, creating parent directories as needed.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        Ok(saved)
    }

    /// Read a save file's metadata without loading the full state.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<SaveMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;

        // Parse just enough to get metadata
        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: SaveMetadata,
        }

        let partial: Partial = serde_json::from_str(&content)?;

        if partial.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: partial.version,
            });
        }

        Ok(partial.metadata)
    }
}

/// Information about a save file.
#[derive(Debug, Clone)]
pub struct SaveInfo {
    pub path: PathBuf,
    pub metadata: SaveMetadata,
}

/// List readable save files in a directory, newest first.
pub async fn list_saves(dir: impl AsRef<Path>) -> Result<Vec<SaveInfo>, PersistError> {
    let mut saves = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            match SavedModule::peek_metadata(&path).await {
                Ok(metadata) => saves.push(SaveInfo { path, metadata }),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable save"),
            }
        }
    }

    saves.sort_by(|a, b| {
        b.metadata
            .saved_at
            .cmp(&a.metadata.saved_at)
            .then_with(|| b.path.cmp(&a.path))
    });
    Ok(saves)
}

/// Save file path for a named slot.
pub fn save_path(base_dir: impl AsRef<Path>, module_name: &str, slot: &str) -> PathBuf {
    base_dir
        .as_ref()
        .join(format!("{}_{}.json", sanitize(module_name), sanitize(slot)))
}

/// Save file path for the rolling auto-save.
pub fn auto_save_path(base_dir: impl AsRef<Path>, module_name: &str) -> PathBuf {
    save_path(base_dir, module_name, "autosave")
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Current time as seconds since the Unix epoch.
fn chrono_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    format!("{}", now.as_secs())
}
