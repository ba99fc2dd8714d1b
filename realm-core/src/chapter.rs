//! Chapters: the active segment of the story and its area tree.
//!
//! A chapter owns the top-level areas and answers whole-chapter queries.
//! Its tick is split into two named stages: [`Chapter::advance_entities`]
//! updates every entity, then [`Chapter::reconcile_locations`] runs the
//! migration pass over the post-update state.

use crate::area::{Area, Placeable};
use crate::content::{ChapterData, ContentSource};
use crate::effect::Effect;
use crate::migration::{self, MigrationReport};
use crate::object::{AreaObject, Character, Entity};
use crate::reference::{EntityKind, EntityRef, Reference};
use crate::serial::{EntityKey, SerialRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info, warn};

/// Chapter-scoped configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterConfig {
    pub id: String,
    pub start_area: String,
}

impl ChapterConfig {
    pub fn new(id: impl Into<String>, start_area: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_area: start_area.into(),
        }
    }
}

/// The active chapter and its top-level areas.
#[derive(Debug)]
pub struct Chapter {
    config: ChapterConfig,
    areas: BTreeMap<String, Area>,
}

impl Chapter {
    pub fn new(config: ChapterConfig) -> Self {
        Self {
            config,
            areas: BTreeMap::new(),
        }
    }

    /// Build a chapter from content, materializing its listed areas.
    /// Listed areas missing from content are skipped and may still load on
    /// demand later.
    pub fn from_data(
        data: &ChapterData,
        content: &dyn ContentSource,
        registry: &mut SerialRegistry,
    ) -> Self {
        let mut chapter = Chapter::new(ChapterConfig::new(data.id.clone(), data.start_area.clone()));
        for area_id in &data.areas {
            match content.area_data(area_id) {
                Some(area) => chapter.add_area(Area::from_data(&area, registry)),
                None => warn!(chapter = %data.id, area = %area_id, "chapter lists unknown area"),
            }
        }
        chapter
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ChapterConfig {
        &self.config
    }

    // ========================================================================
    // Areas
    // ========================================================================

    /// Register top-level areas by id. An existing area with the same id is
    /// replaced.
    pub fn add_areas(&mut self, areas: impl IntoIterator<Item = Area>) {
        for area in areas {
            self.add_area(area);
        }
    }

    pub fn add_area(&mut self, area: Area) {
        let id = area.id().to_string();
        if let Some(replaced) = self.areas.insert(id.clone(), area) {
            warn!(
                chapter = %self.config.id,
                area = %id,
                dropped = replaced.all_characters().len(),
                "top-level area replaced"
            );
        }
    }

    /// Top-level areas.
    pub fn areas(&self) -> impl Iterator<Item = &Area> {
        self.areas.values()
    }

    /// Every area in the chapter, top-level and nested.
    pub fn all_areas(&self) -> Vec<&Area> {
        let mut out = Vec::new();
        for area in self.areas.values() {
            out.push(area);
            out.extend(area.all_subareas());
        }
        out
    }

    /// First area with `id`, searching top-level areas in order and then
    /// their descendants depth first.
    pub fn area(&self, id: &str) -> Option<&Area> {
        let path = self.area_path(id)?;
        self.area_at(&path)
    }

    pub fn area_mut(&mut self, id: &str) -> Option<&mut Area> {
        let path = self.area_path(id)?;
        self.area_at_mut(&path)
    }

    /// Path of ids from a top-level area down to the first area with `id`.
    pub fn area_path(&self, id: &str) -> Option<Vec<String>> {
        self.areas.values().find_map(|a| a.path_to(id))
    }

    pub fn area_at(&self, path: &[String]) -> Option<&Area> {
        let (head, rest) = path.split_first()?;
        self.areas.get(head)?.descend(rest)
    }

    pub fn area_at_mut(&mut self, path: &[String]) -> Option<&mut Area> {
        let (head, rest) = path.split_first()?;
        self.areas.get_mut(head)?.descend_mut(rest)
    }

    /// Find `id` in the tree or materialize it from content as a new
    /// top-level area. Returns the area's path.
    pub fn materialize(
        &mut self,
        id: &str,
        content: &dyn ContentSource,
        registry: &mut SerialRegistry,
    ) -> Option<Vec<String>> {
        if let Some(path) = self.area_path(id) {
            return Some(path);
        }

        let data = content.area_data(id)?;
        if data.id != id {
            error!(requested = %id, found = %data.id, "content returned area with different id");
            return None;
        }

        let area = Area::from_data(&data, registry);
        info!(
            chapter = %self.config.id,
            area = %id,
            characters = area.all_characters().len(),
            "materialized area on demand"
        );
        self.add_area(area);
        Some(vec![id.to_string()])
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn character(&self, id: &str, serial: &str) -> Option<&Character> {
        self.find(&EntityKey::new(id, serial))
    }

    pub fn character_mut(&mut self, id: &str, serial: &str) -> Option<&mut Character> {
        self.find_mut(&EntityKey::new(id, serial))
    }

    pub fn area_object(&self, id: &str, serial: &str) -> Option<&AreaObject> {
        self.find(&EntityKey::new(id, serial))
    }

    pub fn area_object_mut(&mut self, id: &str, serial: &str) -> Option<&mut AreaObject> {
        self.find_mut(&EntityKey::new(id, serial))
    }

    /// Any entity with the given key.
    pub fn object(&self, key: &EntityKey) -> Option<EntityRef<'_>> {
        self.find::<Character>(key)
            .map(EntityRef::Character)
            .or_else(|| self.find::<AreaObject>(key).map(EntityRef::Object))
    }

    pub fn find<E: Placeable>(&self, key: &EntityKey) -> Option<&E> {
        self.areas.values().find_map(|a| a.find(key))
    }

    pub fn find_mut<E: Placeable>(&mut self, key: &EntityKey) -> Option<&mut E> {
        self.areas.values_mut().find_map(|a| a.find_mut(key))
    }

    /// The area that directly owns the entity with `key`.
    pub fn object_area(&self, key: &EntityKey) -> Option<&Area> {
        self.owner::<Character>(key)
            .or_else(|| self.owner::<AreaObject>(key))
    }

    pub fn owner<E: Placeable>(&self, key: &EntityKey) -> Option<&Area> {
        self.areas.values().find_map(|a| a.owner_of::<E>(key))
    }

    pub fn owner_path<E: Placeable>(&self, key: &EntityKey) -> Option<Vec<String>> {
        self.areas.values().find_map(|a| a.owner_path::<E>(key))
    }

    /// Every character in the chapter.
    pub fn characters(&self) -> Vec<&Character> {
        self.areas.values().flat_map(|a| a.all_characters()).collect()
    }

    /// Every area object in the chapter.
    pub fn objects(&self) -> Vec<&AreaObject> {
        self.areas.values().flat_map(|a| a.all_objects()).collect()
    }

    pub(crate) fn characters_mut(&mut self) -> Vec<&mut Character> {
        let mut out = Vec::new();
        for area in self.areas.values_mut() {
            area.collect_characters_mut(&mut out);
        }
        out
    }

    pub(crate) fn objects_mut(&mut self) -> Vec<&mut AreaObject> {
        let mut out = Vec::new();
        for area in self.areas.values_mut() {
            area.collect_objects_mut(&mut out);
        }
        out
    }

    /// Look up the live entity a reference points at. Unresolved references
    /// and references to entities no longer in the chapter yield `None`.
    pub fn resolve(&self, reference: &Reference) -> Option<EntityRef<'_>> {
        match reference {
            Reference::Unresolved(_) => None,
            Reference::Resolved { key, kind } => match kind {
                EntityKind::Character => self.find::<Character>(key).map(EntityRef::Character),
                EntityKind::Object => self.find::<AreaObject>(key).map(EntityRef::Object),
            },
        }
    }

    /// The entity that caused `effect`, if it is still in the chapter.
    pub fn effect_source(&self, effect: &Effect) -> Option<EntityRef<'_>> {
        effect.live_source().and_then(|source| self.resolve(source))
    }

    /// Kind of every live entity, by key.
    pub fn identity_index(&self) -> HashMap<EntityKey, EntityKind> {
        let characters = self
            .characters()
            .into_iter()
            .map(|c| (c.key(), EntityKind::Character));
        let objects = self
            .objects()
            .into_iter()
            .map(|o| (o.key(), EntityKind::Object));
        characters.chain(objects).collect()
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// First tick stage: update every entity in every area.
    pub fn advance_entities(&mut self, delta: u64) {
        for area in self.areas.values_mut() {
            area.update(delta);
        }
    }

    /// Second tick stage: move entities whose declared area differs from
    /// their owner.
    pub fn reconcile_locations(
        &mut self,
        content: &dyn ContentSource,
        registry: &mut SerialRegistry,
    ) -> MigrationReport {
        migration::reconcile_locations(self, content, registry)
    }

    /// Run both tick stages in order.
    pub fn update(
        &mut self,
        delta: u64,
        content: &dyn ContentSource,
        registry: &mut SerialRegistry,
    ) -> MigrationReport {
        self.advance_entities(delta);
        let report = self.reconcile_locations(content, registry);
        if !report.is_empty() {
            debug!(
                chapter = %self.config.id,
                moved = report.moved(),
                reverted = report.reverted(),
                "locations reconciled"
            );
        }
        report
    }

    /// Remove every player character from the chapter.
    pub(crate) fn take_players(&mut self) -> Vec<Character> {
        let mut players = Vec::new();
        for area in self.areas.values_mut() {
            area.take_players(&mut players);
        }
        players
    }
}
