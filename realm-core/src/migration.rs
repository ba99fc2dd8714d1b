//! Location reconciliation.
//!
//! Features never move entities between areas directly; they rewrite the
//! entity's declared area. Once per tick, after every entity has updated,
//! [`reconcile_locations`] moves each entity whose declared area differs from
//! the area that owns it:
//!
//! 1. Look for the declared area in the materialized tree.
//! 2. Failing that, materialize it from content as a new top-level area.
//! 3. Failing that, roll the declared area back to the owner and mark the
//!    entity [`Relocation::Reverted`](crate::object::Relocation::Reverted).
//!
//! Failures are isolated per entity; the pass always completes.

use crate::area::{Area, Placeable};
use crate::chapter::Chapter;
use crate::content::ContentSource;
use crate::object::{AreaObject, Character};
use crate::reference::EntityKind;
use crate::serial::{EntityKey, SerialRegistry};
use tracing::{debug, error};

/// What happened to one misplaced entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Moved {
        key: EntityKey,
        kind: EntityKind,
        from: String,
        to: String,
        /// The destination had to be loaded from content.
        materialized: bool,
    },
    Reverted {
        key: EntityKey,
        kind: EntityKind,
        current: String,
        rejected: String,
    },
    /// No area owned the entity when it was due to move.
    Missing { key: EntityKey, kind: EntityKind },
    /// The destination already holds a different entity with the same key.
    Blocked {
        key: EntityKey,
        kind: EntityKind,
        target: String,
    },
}

impl MigrationOutcome {
    pub fn key(&self) -> &EntityKey {
        match self {
            MigrationOutcome::Moved { key, .. }
            | MigrationOutcome::Reverted { key, .. }
            | MigrationOutcome::Missing { key, .. }
            | MigrationOutcome::Blocked { key, .. } => key,
        }
    }
}

/// Outcomes of one reconciliation pass, one per misplaced entity.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub outcomes: Vec<MigrationOutcome>,
}

impl MigrationReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn moved(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MigrationOutcome::Moved { .. }))
            .count()
    }

    pub fn reverted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MigrationOutcome::Reverted { .. }))
            .count()
    }

    pub fn outcome_for(&self, key: &EntityKey) -> Option<&MigrationOutcome> {
        self.outcomes.iter().find(|o| o.key() == key)
    }
}

/// An entity whose declared area differs from its owner.
struct Misplaced {
    key: EntityKey,
    owner_path: Vec<String>,
    declared: String,
}

/// Run the migration pass over every character and area object.
pub fn reconcile_locations(
    chapter: &mut Chapter,
    content: &dyn ContentSource,
    registry: &mut SerialRegistry,
) -> MigrationReport {
    let characters = misplaced::<Character>(chapter);
    let objects = misplaced::<AreaObject>(chapter);

    let mut report = MigrationReport::default();
    for entry in characters {
        report
            .outcomes
            .push(relocate::<Character>(chapter, content, registry, entry));
    }
    for entry in objects {
        report
            .outcomes
            .push(relocate::<AreaObject>(chapter, content, registry, entry));
    }
    report
}

fn misplaced<E: Placeable>(chapter: &Chapter) -> Vec<Misplaced> {
    let mut out = Vec::new();
    for area in chapter.areas() {
        let mut path = Vec::new();
        collect_misplaced::<E>(area, &mut path, &mut out);
    }
    out
}

fn collect_misplaced<E: Placeable>(area: &Area, path: &mut Vec<String>, out: &mut Vec<Misplaced>) {
    path.push(area.id().to_string());
    for entity in E::members(area).values() {
        if entity.area_id() != area.id() {
            out.push(Misplaced {
                key: entity.key(),
                owner_path: path.clone(),
                declared: entity.area_id().to_string(),
            });
        }
    }
    for subarea in area.subareas() {
        collect_misplaced::<E>(subarea, path, out);
    }
    path.pop();
}

fn relocate<E: Placeable>(
    chapter: &mut Chapter,
    content: &dyn ContentSource,
    registry: &mut SerialRegistry,
    entry: Misplaced,
) -> MigrationOutcome {
    let Misplaced {
        key,
        owner_path,
        declared,
    } = entry;
    let current = owner_path.last().cloned().unwrap_or_default();

    let existed = chapter.area_path(&declared).is_some();
    let Some(target_path) = chapter.materialize(&declared, content, registry) else {
        error!(
            key = %key,
            kind = %E::KIND,
            current = %current,
            declared = %declared,
            "migration target not found; reverting declared area"
        );
        match chapter
            .area_at_mut(&owner_path)
            .and_then(|a| a.get_mut::<E>(&key))
        {
            Some(entity) => entity.placement_mut().revert(&current),
            None => {
                error!(key = %key, kind = %E::KIND, "misplaced entity has no owning area");
                return MigrationOutcome::Missing { key, kind: E::KIND };
            }
        }
        return MigrationOutcome::Reverted {
            key,
            kind: E::KIND,
            current,
            rejected: declared,
        };
    };

    if chapter
        .area_at(&target_path)
        .map(|a| a.contains::<E>(&key))
        .unwrap_or(false)
    {
        error!(key = %key, kind = %E::KIND, target = %declared, "destination already holds this key");
        return MigrationOutcome::Blocked {
            key,
            kind: E::KIND,
            target: declared,
        };
    }

    // Exclusive access to the chapter means nothing can observe the entity
    // between these two steps.
    let Some(entity) = chapter
        .area_at_mut(&owner_path)
        .and_then(|a| a.take::<E>(&key))
    else {
        error!(key = %key, kind = %E::KIND, "misplaced entity has no owning area");
        return MigrationOutcome::Missing { key, kind: E::KIND };
    };

    match chapter.area_at_mut(&target_path) {
        Some(target) => {
            target.insert(entity);
        }
        None => {
            // The destination path was resolved a moment ago; put the entity
            // back rather than drop it.
            error!(key = %key, target = %declared, "destination vanished during migration");
            if let Some(origin) = chapter.area_at_mut(&owner_path) {
                let mut entity = entity;
                entity.placement_mut().revert(&current);
                origin.insert(entity);
            }
            return MigrationOutcome::Reverted {
                key,
                kind: E::KIND,
                current,
                rejected: declared,
            };
        }
    }

    debug!(key = %key, kind = %E::KIND, from = %current, to = %declared, "entity migrated");
    MigrationOutcome::Moved {
        key,
        kind: E::KIND,
        from: current,
        to: declared,
        materialized: !existed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapter::ChapterConfig;
    use crate::content::{AreaData, CharacterData, ContentCatalog, ObjectData};
    use crate::object::{Entity, Relocation};

    fn forest_chapter(registry: &mut SerialRegistry) -> Chapter {
        let mut chapter = Chapter::new(ChapterConfig::new("prologue", "forest"));
        chapter.add_area(Area::from_data(
            &AreaData::new("forest")
                .with_character(CharacterData::new("goblin", "Goblin").with_serial("0"))
                .with_object(ObjectData::new("barrel", "Barrel"))
                .with_subarea(AreaData::new("clearing")),
            registry,
        ));
        chapter.add_area(Area::new("village"));
        chapter
    }

    fn goblin() -> EntityKey {
        EntityKey::new("goblin", "0")
    }

    #[test]
    fn test_settled_entities_are_ignored() {
        let mut registry = SerialRegistry::new();
        let mut chapter = forest_chapter(&mut registry);

        let report = reconcile_locations(&mut chapter, &ContentCatalog::new(), &mut registry);
        assert!(report.is_empty());
    }

    #[test]
    fn test_moves_to_existing_area() {
        let mut registry = SerialRegistry::new();
        let mut chapter = forest_chapter(&mut registry);
        chapter
            .character_mut("goblin", "0")
            .unwrap()
            .set_area_id("village");

        let report = reconcile_locations(&mut chapter, &ContentCatalog::new(), &mut registry);

        assert_eq!(report.moved(), 1);
        assert_eq!(chapter.object_area(&goblin()).unwrap().id(), "village");
        assert!(chapter.area("forest").unwrap().character(&goblin()).is_none());
        assert_eq!(
            chapter.character("goblin", "0").unwrap().relocation(),
            &Relocation::Settled
        );
    }

    #[test]
    fn test_moves_into_nested_area() {
        let mut registry = SerialRegistry::new();
        let mut chapter = forest_chapter(&mut registry);
        chapter
            .character_mut("goblin", "0")
            .unwrap()
            .set_area_id("clearing");

        reconcile_locations(&mut chapter, &ContentCatalog::new(), &mut registry);

        assert_eq!(chapter.object_area(&goblin()).unwrap().id(), "clearing");
    }

    #[test]
    fn test_materializes_missing_area() {
        let mut registry = SerialRegistry::new();
        let mut chapter = forest_chapter(&mut registry);
        let content = ContentCatalog::new().with_area(AreaData::new("cave"));
        chapter
            .character_mut("goblin", "0")
            .unwrap()
            .set_area_id("cave");

        let report = reconcile_locations(&mut chapter, &content, &mut registry);

        assert!(matches!(
            report.outcome_for(&goblin()),
            Some(MigrationOutcome::Moved {
                materialized: true,
                ..
            })
        ));
        assert_eq!(chapter.object_area(&goblin()).unwrap().id(), "cave");
        assert!(chapter.areas().any(|a| a.id() == "cave"));
    }

    #[test]
    fn test_unknown_destination_reverts() {
        let mut registry = SerialRegistry::new();
        let mut chapter = forest_chapter(&mut registry);
        chapter
            .character_mut("goblin", "0")
            .unwrap()
            .set_area_id("nowhere");

        let report = reconcile_locations(&mut chapter, &ContentCatalog::new(), &mut registry);

        assert_eq!(report.reverted(), 1);
        let goblin_entity = chapter.character("goblin", "0").unwrap();
        assert_eq!(goblin_entity.area_id(), "forest");
        assert_eq!(
            goblin_entity.relocation(),
            &Relocation::Reverted {
                rejected: "nowhere".to_string()
            }
        );
        assert_eq!(chapter.object_area(&goblin()).unwrap().id(), "forest");

        // A reverted entity is settled again and is not reconsidered
        let report = reconcile_locations(&mut chapter, &ContentCatalog::new(), &mut registry);
        assert!(report.is_empty());
    }

    #[test]
    fn test_objects_migrate_too() {
        let mut registry = SerialRegistry::new();
        let mut chapter = forest_chapter(&mut registry);
        let barrel = EntityKey::new("barrel", "0");
        chapter
            .area_object_mut("barrel", "0")
            .unwrap()
            .set_area_id("village");

        reconcile_locations(&mut chapter, &ContentCatalog::new(), &mut registry);

        assert_eq!(chapter.object_area(&barrel).unwrap().id(), "village");
    }

    #[test]
    fn test_one_failure_does_not_block_others() {
        let mut registry = SerialRegistry::new();
        let mut chapter = forest_chapter(&mut registry);
        chapter
            .character_mut("goblin", "0")
            .unwrap()
            .set_area_id("nowhere");
        chapter
            .area_object_mut("barrel", "0")
            .unwrap()
            .set_area_id("village");

        let report = reconcile_locations(&mut chapter, &ContentCatalog::new(), &mut registry);

        assert_eq!(report.reverted(), 1);
        assert_eq!(report.moved(), 1);
    }
}
