//! Areas: the nested partitions that own entities.
//!
//! Each area owns the characters and objects directly inside it plus its
//! subareas. An entity is a direct member of at most one area in the whole
//! tree; moving it always goes through [`Area::take`] and [`Area::insert`].

use crate::content::AreaData;
use crate::object::{AreaObject, Character, Entity};
use crate::serial::{EntityKey, SerialRegistry};
use std::collections::BTreeMap;
use tracing::{error, warn};

/// Entities an area can own, with access to the matching collection.
pub trait Placeable: Entity + Sized {
    fn members(area: &Area) -> &BTreeMap<EntityKey, Self>;
    fn members_mut(area: &mut Area) -> &mut BTreeMap<EntityKey, Self>;
}

impl Placeable for Character {
    fn members(area: &Area) -> &BTreeMap<EntityKey, Self> {
        &area.characters
    }

    fn members_mut(area: &mut Area) -> &mut BTreeMap<EntityKey, Self> {
        &mut area.characters
    }
}

impl Placeable for AreaObject {
    fn members(area: &Area) -> &BTreeMap<EntityKey, Self> {
        &area.objects
    }

    fn members_mut(area: &mut Area) -> &mut BTreeMap<EntityKey, Self> {
        &mut area.objects
    }
}

/// A partition of the world.
#[derive(Debug, Default)]
pub struct Area {
    id: String,
    characters: BTreeMap<EntityKey, Character>,
    objects: BTreeMap<EntityKey, AreaObject>,
    subareas: BTreeMap<String, Area>,
}

impl Area {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Build an area and its subareas from content, registering every
    /// entity with `registry`.
    pub fn from_data(data: &AreaData, registry: &mut SerialRegistry) -> Self {
        let mut area = Area::new(data.id.clone());

        for character in &data.characters {
            let mut character = Character::from_data(character);
            registry.assign(character.identity_mut());
            area.add_character(character);
        }
        for object in &data.objects {
            let mut object = AreaObject::from_data(object);
            registry.assign(object.identity_mut());
            area.add_object(object);
        }
        for subarea in &data.subareas {
            area.add_subarea(Area::from_data(subarea, registry)).ok();
        }

        area
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty() && self.objects.is_empty()
    }

    // ========================================================================
    // Generic membership
    // ========================================================================

    /// Take ownership of `entity`, stamping its declared area with this
    /// area's id. A different entity already stored under the same key is
    /// displaced and handed back.
    pub fn insert<E: Placeable>(&mut self, mut entity: E) -> Option<E> {
        entity.placement_mut().settle(&self.id);
        let key = entity.key();
        let displaced = E::members_mut(self).insert(key.clone(), entity);
        if displaced.is_some() {
            error!(area = %self.id, key = %key, kind = %E::KIND, "entity key already present in area");
        }
        displaced
    }

    /// Release ownership of the entity stored under `key`.
    pub fn take<E: Placeable>(&mut self, key: &EntityKey) -> Option<E> {
        E::members_mut(self).remove(key)
    }

    pub fn get<E: Placeable>(&self, key: &EntityKey) -> Option<&E> {
        E::members(self).get(key)
    }

    pub fn get_mut<E: Placeable>(&mut self, key: &EntityKey) -> Option<&mut E> {
        E::members_mut(self).get_mut(key)
    }

    pub fn contains<E: Placeable>(&self, key: &EntityKey) -> bool {
        E::members(self).contains_key(key)
    }

    /// Search this area and every descendant.
    pub fn find<E: Placeable>(&self, key: &EntityKey) -> Option<&E> {
        self.get(key)
            .or_else(|| self.subareas.values().find_map(|s| s.find(key)))
    }

    pub fn find_mut<E: Placeable>(&mut self, key: &EntityKey) -> Option<&mut E> {
        if E::members(self).contains_key(key) {
            return E::members_mut(self).get_mut(key);
        }
        self.subareas.values_mut().find_map(|s| s.find_mut(key))
    }

    /// Entities of one kind in this area and every descendant.
    pub fn all<E: Placeable>(&self) -> Vec<&E> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a, E: Placeable>(&'a self, out: &mut Vec<&'a E>) {
        out.extend(E::members(self).values());
        for subarea in self.subareas.values() {
            subarea.collect(out);
        }
    }

    pub(crate) fn collect_characters_mut<'a>(&'a mut self, out: &mut Vec<&'a mut Character>) {
        out.extend(self.characters.values_mut());
        for subarea in self.subareas.values_mut() {
            subarea.collect_characters_mut(out);
        }
    }

    pub(crate) fn collect_objects_mut<'a>(&'a mut self, out: &mut Vec<&'a mut AreaObject>) {
        out.extend(self.objects.values_mut());
        for subarea in self.subareas.values_mut() {
            subarea.collect_objects_mut(out);
        }
    }

    // ========================================================================
    // Characters
    // ========================================================================

    pub fn add_character(&mut self, character: Character) -> Option<Character> {
        self.insert(character)
    }

    pub fn remove_character(&mut self, key: &EntityKey) -> Option<Character> {
        self.take(key)
    }

    pub fn character(&self, key: &EntityKey) -> Option<&Character> {
        self.get(key)
    }

    pub fn character_mut(&mut self, key: &EntityKey) -> Option<&mut Character> {
        self.get_mut(key)
    }

    /// Characters directly in this area.
    pub fn characters(&self) -> impl Iterator<Item = &Character> {
        self.characters.values()
    }

    /// Characters in this area and all subareas.
    pub fn all_characters(&self) -> Vec<&Character> {
        self.all()
    }

    pub fn find_character(&self, key: &EntityKey) -> Option<&Character> {
        self.find(key)
    }

    // ========================================================================
    // Objects
    // ========================================================================

    pub fn add_object(&mut self, object: AreaObject) -> Option<AreaObject> {
        self.insert(object)
    }

    pub fn remove_object(&mut self, key: &EntityKey) -> Option<AreaObject> {
        self.take(key)
    }

    pub fn object(&self, key: &EntityKey) -> Option<&AreaObject> {
        self.get(key)
    }

    pub fn object_mut(&mut self, key: &EntityKey) -> Option<&mut AreaObject> {
        self.get_mut(key)
    }

    pub fn objects(&self) -> impl Iterator<Item = &AreaObject> {
        self.objects.values()
    }

    pub fn all_objects(&self) -> Vec<&AreaObject> {
        self.all()
    }

    pub fn find_object(&self, key: &EntityKey) -> Option<&AreaObject> {
        self.find(key)
    }

    // ========================================================================
    // Subareas
    // ========================================================================

    /// Add a child area. A child with the same id is never replaced; the
    /// rejected area is handed back.
    pub fn add_subarea(&mut self, subarea: Area) -> Result<(), Area> {
        if self.subareas.contains_key(&subarea.id) {
            error!(area = %self.id, subarea = %subarea.id, "duplicate subarea id rejected");
            return Err(subarea);
        }
        self.subareas.insert(subarea.id.clone(), subarea);
        Ok(())
    }

    pub fn subareas(&self) -> impl Iterator<Item = &Area> {
        self.subareas.values()
    }

    pub fn subarea(&self, id: &str) -> Option<&Area> {
        self.subareas.get(id)
    }

    pub fn subarea_mut(&mut self, id: &str) -> Option<&mut Area> {
        self.subareas.get_mut(id)
    }

    /// Every descendant area, depth first.
    pub fn all_subareas(&self) -> Vec<&Area> {
        let mut out = Vec::new();
        for subarea in self.subareas.values() {
            out.push(subarea);
            out.extend(subarea.all_subareas());
        }
        out
    }

    /// This area or the first descendant with the given id.
    pub fn find_area(&self, id: &str) -> Option<&Area> {
        if self.id == id {
            return Some(self);
        }
        self.subareas.values().find_map(|s| s.find_area(id))
    }

    /// Path of ids from this area down to the first area with `id`.
    pub fn path_to(&self, id: &str) -> Option<Vec<String>> {
        if self.id == id {
            return Some(vec![self.id.clone()]);
        }
        self.subareas.values().find_map(|s| {
            s.path_to(id).map(|mut path| {
                path.insert(0, self.id.clone());
                path
            })
        })
    }

    /// Path from this area down to the area directly owning `key`.
    pub fn owner_path<E: Placeable>(&self, key: &EntityKey) -> Option<Vec<String>> {
        if self.contains::<E>(key) {
            return Some(vec![self.id.clone()]);
        }
        self.subareas.values().find_map(|s| {
            s.owner_path::<E>(key).map(|mut path| {
                path.insert(0, self.id.clone());
                path
            })
        })
    }

    /// The area directly owning `key`, this one included.
    pub fn owner_of<E: Placeable>(&self, key: &EntityKey) -> Option<&Area> {
        if self.contains::<E>(key) {
            return Some(self);
        }
        self.subareas.values().find_map(|s| s.owner_of::<E>(key))
    }

    /// Follow `path` (relative to this area's children) downward.
    pub fn descend_mut(&mut self, path: &[String]) -> Option<&mut Area> {
        match path.split_first() {
            None => Some(self),
            Some((head, rest)) => self.subareas.get_mut(head)?.descend_mut(rest),
        }
    }

    pub fn descend(&self, path: &[String]) -> Option<&Area> {
        match path.split_first() {
            None => Some(self),
            Some((head, rest)) => self.subareas.get(head)?.descend(rest),
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Update every entity here and in all subareas.
    pub fn update(&mut self, delta: u64) {
        for character in self.characters.values_mut() {
            character.update(delta);
        }
        for object in self.objects.values_mut() {
            object.update(delta);
        }
        for subarea in self.subareas.values_mut() {
            subarea.update(delta);
        }
    }

    /// Remove every player character from this area and its descendants.
    pub(crate) fn take_players(&mut self, out: &mut Vec<Character>) {
        let keys: Vec<EntityKey> = self
            .characters
            .values()
            .filter(|c| c.player)
            .map(|c| c.key())
            .collect();
        for key in keys {
            match self.characters.remove(&key) {
                Some(player) => out.push(player),
                None => warn!(area = %self.id, key = %key, "player vanished while leaving chapter"),
            }
        }
        for subarea in self.subareas.values_mut() {
            subarea.take_players(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{CharacterData, ObjectData};

    fn registered(registry: &mut SerialRegistry, id: &str) -> Character {
        let mut character = Character::new(id, id);
        registry.assign(character.identity_mut());
        character
    }

    #[test]
    fn test_add_stamps_declared_area() {
        let mut registry = SerialRegistry::new();
        let mut forest = Area::new("forest");
        let goblin = registered(&mut registry, "goblin");
        let key = goblin.key();

        assert!(forest.add_character(goblin).is_none());
        assert_eq!(forest.character(&key).unwrap().area_id(), "forest");
    }

    #[test]
    fn test_remove_releases_ownership() {
        let mut registry = SerialRegistry::new();
        let mut forest = Area::new("forest");
        let goblin = registered(&mut registry, "goblin");
        let key = goblin.key();
        forest.add_character(goblin);

        let removed = forest.remove_character(&key).unwrap();
        assert_eq!(removed.key(), key);
        assert!(forest.character(&key).is_none());
        assert!(forest.remove_character(&key).is_none());
    }

    #[test]
    fn test_duplicate_key_displaces() {
        let mut forest = Area::new("forest");
        forest.add_character(Character::new("goblin", "First").with_serial("0"));
        let displaced = forest
            .add_character(Character::new("goblin", "Second").with_serial("0"))
            .unwrap();

        assert_eq!(displaced.name, "First");
        assert_eq!(forest.characters().count(), 1);
    }

    #[test]
    fn test_direct_vs_recursive_queries() {
        let mut registry = SerialRegistry::new();
        let mut square = Area::new("square");
        let mut tavern = Area::new("tavern");
        let mut cellar = Area::new("cellar");

        square.add_character(registered(&mut registry, "guard"));
        tavern.add_character(registered(&mut registry, "barkeep"));
        let rat = registered(&mut registry, "rat");
        let rat_key = rat.key();
        cellar.add_character(rat);

        tavern.add_subarea(cellar).unwrap();
        square.add_subarea(tavern).unwrap();

        assert_eq!(square.characters().count(), 1);
        assert_eq!(square.all_characters().len(), 3);
        assert!(square.character(&rat_key).is_none());
        assert_eq!(square.find_character(&rat_key).unwrap().base_id(), "rat");
        assert_eq!(square.all_subareas().len(), 2);
    }

    #[test]
    fn test_duplicate_subarea_rejected() {
        let mut town = Area::new("town");
        town.add_subarea(Area::new("inn")).unwrap();

        let rejected = town.add_subarea(Area::new("inn")).unwrap_err();
        assert_eq!(rejected.id(), "inn");
        assert_eq!(town.subareas().count(), 1);
    }

    #[test]
    fn test_paths() {
        let mut registry = SerialRegistry::new();
        let mut town = Area::new("town");
        let mut inn = Area::new("inn");
        let mut room = Area::new("room");
        let sleeper = registered(&mut registry, "sleeper");
        let key = sleeper.key();
        room.add_character(sleeper);
        inn.add_subarea(room).unwrap();
        town.add_subarea(inn).unwrap();

        assert_eq!(
            town.path_to("room"),
            Some(vec!["town".to_string(), "inn".to_string(), "room".to_string()])
        );
        assert_eq!(town.path_to("castle"), None);
        assert_eq!(
            town.owner_path::<Character>(&key),
            Some(vec!["town".to_string(), "inn".to_string(), "room".to_string()])
        );
        assert_eq!(town.owner_of::<Character>(&key).unwrap().id(), "room");

        let path = ["inn".to_string(), "room".to_string()];
        assert_eq!(town.descend(&path).unwrap().id(), "room");
        assert!(town.descend(&["cellar".to_string()]).is_none());
    }

    #[test]
    fn test_from_data_registers_entities() {
        let mut registry = SerialRegistry::new();
        let data = AreaData::new("forest")
            .with_character(CharacterData::new("goblin", "Goblin").with_serial("0"))
            .with_character(CharacterData::new("goblin", "Goblin"))
            .with_object(ObjectData::new("chest", "Chest"))
            .with_subarea(
                AreaData::new("clearing").with_character(CharacterData::new("goblin", "Goblin")),
            );

        let forest = Area::from_data(&data, &mut registry);

        let mut serials: Vec<_> = forest
            .all_characters()
            .iter()
            .map(|c| c.serial().to_string())
            .collect();
        serials.sort();
        assert_eq!(serials, vec!["0", "1", "2"]);
        assert_eq!(forest.objects().count(), 1);
        assert_eq!(registry.issued_count("goblin"), 3);
    }

    #[test]
    fn test_update_reaches_subareas() {
        use crate::effect::{Effect, Modifier};

        let mut registry = SerialRegistry::new();
        let mut town = Area::new("town");
        let mut inn = Area::new("inn");
        let mut drunk = registered(&mut registry, "drunk");
        drunk.add_effect(Effect::new("Ale").with_modifier(Modifier::Flag {
            flag: "tipsy".to_string(),
        }));
        let key = drunk.key();
        inn.add_character(drunk);
        town.add_subarea(inn).unwrap();

        town.update(16);

        assert!(town.find_character(&key).unwrap().flags.contains("tipsy"));
    }
}
