//! Identity-bearing world entities: characters and area objects.
//!
//! Both kinds embed an [`Identity`] (base id + serial) and a [`Placement`]
//! (the area the entity declares it belongs in). Entities never move
//! themselves between areas; they only rewrite their declared area and the
//! migration pass does the rest.

use crate::content::{CharacterData, ObjectData};
use crate::effect::{effect_references, effect_references_mut, update_effects, Effect, EffectId, ModifierTarget};
use crate::reference::{EntityKind, Reference, ReferenceField};
use crate::serial::{EntityKey, Identity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Placement
// ============================================================================

/// Where an entity stands with respect to its declared area.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Relocation {
    /// Declared area matches the owning area.
    #[default]
    Settled,
    /// Declared area differs from the owning area; waiting for migration.
    Pending,
    /// The last declared area could not be resolved and was rolled back.
    Reverted { rejected: String },
}

/// An entity's declared area plus the area that last took ownership of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    area_id: String,
    owner_id: String,
    relocation: Relocation,
}

impl Placement {
    pub fn new(area_id: impl Into<String>) -> Self {
        Self {
            area_id: area_id.into(),
            owner_id: String::new(),
            relocation: Relocation::Settled,
        }
    }

    /// The area the entity should be in.
    pub fn area_id(&self) -> &str {
        &self.area_id
    }

    /// The id of the area that last took ownership of the entity.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn relocation(&self) -> &Relocation {
        &self.relocation
    }

    /// Declare a new destination. Takes effect at the next migration pass.
    pub fn declare(&mut self, area_id: impl Into<String>) {
        self.area_id = area_id.into();
        self.relocation = if self.area_id == self.owner_id {
            Relocation::Settled
        } else {
            Relocation::Pending
        };
    }

    pub(crate) fn settle(&mut self, area_id: &str) {
        self.area_id = area_id.to_string();
        self.owner_id = area_id.to_string();
        self.relocation = Relocation::Settled;
    }

    pub(crate) fn revert(&mut self, current: &str) {
        let rejected = std::mem::replace(&mut self.area_id, current.to_string());
        self.owner_id = current.to_string();
        self.relocation = Relocation::Reverted { rejected };
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub current: i32,
    pub maximum: i32,
}

impl Health {
    pub fn new(maximum: i32) -> Self {
        Self {
            current: maximum,
            maximum,
        }
    }

    /// Add `amount` (negative for damage), clamped to `0..=maximum`.
    pub fn adjust(&mut self, amount: i32) {
        self.current = self.current.saturating_add(amount).clamp(0, self.maximum);
    }

    pub fn is_alive(&self) -> bool {
        self.current > 0
    }
}

// ============================================================================
// Entity Trait
// ============================================================================

/// Common behavior of everything an area can own.
pub trait Entity {
    const KIND: EntityKind;

    fn identity(&self) -> &Identity;
    fn identity_mut(&mut self) -> &mut Identity;
    fn placement(&self) -> &Placement;
    fn placement_mut(&mut self) -> &mut Placement;

    /// Advance the entity by `delta` milliseconds.
    fn update(&mut self, delta: u64);

    /// Every cross-reference field the entity holds.
    fn references(&self) -> Vec<(ReferenceField, &Reference)>;
    fn references_mut(&mut self) -> Vec<(ReferenceField, &mut Reference)>;

    /// Install a reference read back from storage. Returns `false` when the
    /// field does not exist on this entity.
    fn restore_reference(&mut self, field: ReferenceField, reference: Reference) -> bool;

    fn key(&self) -> EntityKey {
        self.identity().key()
    }

    fn base_id(&self) -> &str {
        self.identity().base_id()
    }

    fn serial(&self) -> &str {
        self.identity().serial()
    }

    fn area_id(&self) -> &str {
        self.placement().area_id()
    }

    fn set_area_id(&mut self, area_id: impl Into<String>)
    where
        Self: Sized,
    {
        self.placement_mut().declare(area_id);
    }

    fn relocation(&self) -> &Relocation {
        self.placement().relocation()
    }
}

// ============================================================================
// Characters
// ============================================================================

/// How a character feels about another entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attitude {
    Friendly,
    Neutral,
    Hostile,
}

impl fmt::Display for Attitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Attitude::Friendly => "friendly",
            Attitude::Neutral => "neutral",
            Attitude::Hostile => "hostile",
        };
        write!(f, "{name}")
    }
}

/// A remembered attitude toward another entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    pub target: Reference,
    pub attitude: Attitude,
}

/// A character in the world.
#[derive(Debug)]
pub struct Character {
    identity: Identity,
    placement: Placement,
    pub name: String,
    pub health: Health,
    /// Player-controlled characters follow the story across chapters.
    pub player: bool,
    pub flags: BTreeSet<String>,
    effects: Vec<Effect>,
    memory: Vec<Memory>,
    target: Option<Reference>,
}

impl Character {
    pub fn new(base_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identity: Identity::new(base_id),
            placement: Placement::new(""),
            name: name.into(),
            health: Health::new(10),
            player: false,
            flags: BTreeSet::new(),
            effects: Vec::new(),
            memory: Vec::new(),
            target: None,
        }
    }

    /// Build an unregistered character from content data.
    pub fn from_data(data: &CharacterData) -> Self {
        let mut character = Self::new(data.id.clone(), data.name.clone())
            .with_health(Health::new(data.max_health));
        if let Some(serial) = &data.serial {
            character = character.with_serial(serial.clone());
        }
        character.player = data.player;
        character.flags = data.flags.iter().cloned().collect();
        character
    }

    /// Set a provisional serial, subject to registration.
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.identity.set_serial(serial);
        self
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = health;
        self
    }

    pub fn as_player(mut self) -> Self {
        self.player = true;
        self
    }

    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn add_effect(&mut self, effect: Effect) -> EffectId {
        let id = effect.id;
        self.effects.push(effect);
        id
    }

    pub fn remove_effect(&mut self, id: EffectId) -> Option<Effect> {
        let index = self.effects.iter().position(|e| e.id == id)?;
        Some(self.effects.remove(index))
    }

    pub fn effect(&self, id: EffectId) -> Option<&Effect> {
        self.effects.iter().find(|e| e.id == id)
    }

    pub fn memory(&self) -> &[Memory] {
        &self.memory
    }

    /// Remember an attitude toward `target`, replacing any earlier record for
    /// the same key.
    pub fn remember(&mut self, target: Reference, attitude: Attitude) {
        match self.memory.iter_mut().find(|m| m.target.key() == target.key()) {
            Some(memory) => {
                memory.target = target;
                memory.attitude = attitude;
            }
            None => self.memory.push(Memory { target, attitude }),
        }
    }

    pub fn attitude_toward(&self, key: &EntityKey) -> Option<Attitude> {
        self.memory
            .iter()
            .find(|m| m.target.key() == key)
            .map(|m| m.attitude)
    }

    pub fn target(&self) -> Option<&Reference> {
        self.target.as_ref()
    }

    pub fn set_target(&mut self, target: Option<Reference>) {
        self.target = target;
    }

    pub(crate) fn push_effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub(crate) fn push_memory(&mut self, memory: Memory) {
        self.memory.push(memory);
    }
}

impl Entity for Character {
    const KIND: EntityKind = EntityKind::Character;

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }

    fn placement(&self) -> &Placement {
        &self.placement
    }

    fn placement_mut(&mut self) -> &mut Placement {
        &mut self.placement
    }

    fn update(&mut self, delta: u64) {
        update_effects(
            &mut self.effects,
            delta,
            ModifierTarget {
                placement: &mut self.placement,
                health: &mut self.health,
                flags: &mut self.flags,
            },
        );
    }

    fn references(&self) -> Vec<(ReferenceField, &Reference)> {
        let mut fields = Vec::new();
        if let Some(target) = &self.target {
            fields.push((ReferenceField::Target, target));
        }
        fields.extend(effect_references(&self.effects));
        fields.extend(
            self.memory
                .iter()
                .enumerate()
                .map(|(i, m)| (ReferenceField::MemoryTarget(i), &m.target)),
        );
        fields
    }

    fn references_mut(&mut self) -> Vec<(ReferenceField, &mut Reference)> {
        let mut fields = Vec::new();
        if let Some(target) = self.target.as_mut() {
            fields.push((ReferenceField::Target, target));
        }
        fields.extend(effect_references_mut(&mut self.effects));
        fields.extend(
            self.memory
                .iter_mut()
                .enumerate()
                .map(|(i, m)| (ReferenceField::MemoryTarget(i), &mut m.target)),
        );
        fields
    }

    fn restore_reference(&mut self, field: ReferenceField, reference: Reference) -> bool {
        match field {
            ReferenceField::Target => {
                self.target = Some(reference);
                true
            }
            ReferenceField::EffectSource(id) => match self.effects.iter_mut().find(|e| e.id == id) {
                Some(effect) => {
                    effect.source = Some(reference);
                    true
                }
                None => false,
            },
            ReferenceField::MemoryTarget(index) => match self.memory.get_mut(index) {
                Some(memory) => {
                    memory.target = reference;
                    true
                }
                None => false,
            },
        }
    }
}

// ============================================================================
// Area Objects
// ============================================================================

/// A non-character object placed in an area (chests, doors, traps).
#[derive(Debug)]
pub struct AreaObject {
    identity: Identity,
    placement: Placement,
    pub name: String,
    pub health: Health,
    pub flags: BTreeSet<String>,
    effects: Vec<Effect>,
}

impl AreaObject {
    pub fn new(base_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identity: Identity::new(base_id),
            placement: Placement::new(""),
            name: name.into(),
            health: Health::new(1),
            flags: BTreeSet::new(),
            effects: Vec::new(),
        }
    }

    /// Build an unregistered object from content data.
    pub fn from_data(data: &ObjectData) -> Self {
        let mut object = Self::new(data.id.clone(), data.name.clone());
        object.health = Health::new(data.max_health);
        if let Some(serial) = &data.serial {
            object.identity.set_serial(serial.clone());
        }
        object
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.identity.set_serial(serial);
        self
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn add_effect(&mut self, effect: Effect) -> EffectId {
        let id = effect.id;
        self.effects.push(effect);
        id
    }

    pub fn remove_effect(&mut self, id: EffectId) -> Option<Effect> {
        let index = self.effects.iter().position(|e| e.id == id)?;
        Some(self.effects.remove(index))
    }

    pub(crate) fn push_effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }
}

impl Entity for AreaObject {
    const KIND: EntityKind = EntityKind::Object;

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }

    fn placement(&self) -> &Placement {
        &self.placement
    }

    fn placement_mut(&mut self) -> &mut Placement {
        &mut self.placement
    }

    fn update(&mut self, delta: u64) {
        update_effects(
            &mut self.effects,
            delta,
            ModifierTarget {
                placement: &mut self.placement,
                health: &mut self.health,
                flags: &mut self.flags,
            },
        );
    }

    fn references(&self) -> Vec<(ReferenceField, &Reference)> {
        effect_references(&self.effects)
    }

    fn references_mut(&mut self) -> Vec<(ReferenceField, &mut Reference)> {
        effect_references_mut(&mut self.effects)
    }

    fn restore_reference(&mut self, field: ReferenceField, reference: Reference) -> bool {
        match field {
            ReferenceField::EffectSource(id) => match self.effects.iter_mut().find(|e| e.id == id) {
                Some(effect) => {
                    effect.source = Some(reference);
                    true
                }
                None => false,
            },
            ReferenceField::Target | ReferenceField::MemoryTarget(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Modifier;

    #[test]
    fn test_declare_marks_pending() {
        let mut placement = Placement::new("");
        placement.settle("forest");
        assert_eq!(placement.relocation(), &Relocation::Settled);

        placement.declare("cave");
        assert_eq!(placement.area_id(), "cave");
        assert_eq!(placement.relocation(), &Relocation::Pending);

        // Declaring the owning area again settles it
        placement.declare("forest");
        assert_eq!(placement.relocation(), &Relocation::Settled);
    }

    #[test]
    fn test_revert_records_rejected_destination() {
        let mut placement = Placement::new("");
        placement.settle("forest");
        placement.declare("nowhere");
        placement.revert("forest");

        assert_eq!(placement.area_id(), "forest");
        assert_eq!(
            placement.relocation(),
            &Relocation::Reverted {
                rejected: "nowhere".to_string()
            }
        );
    }

    #[test]
    fn test_health_is_clamped() {
        let mut health = Health::new(10);
        health.adjust(-15);
        assert_eq!(health.current, 0);
        assert!(!health.is_alive());

        health.adjust(50);
        assert_eq!(health.current, 10);
    }

    #[test]
    fn test_area_change_effect_declares_on_update() {
        let mut hero = Character::new("hero", "Hero");
        hero.placement_mut().settle("forest");
        hero.add_effect(Effect::new("Teleport").with_modifier(Modifier::AreaChange {
            area_id: "cave".to_string(),
        }));

        assert_eq!(hero.area_id(), "forest");
        hero.update(16);
        assert_eq!(hero.area_id(), "cave");
        assert_eq!(hero.relocation(), &Relocation::Pending);
    }

    #[test]
    fn test_character_references_cover_every_field() {
        let mut hero = Character::new("hero", "Hero");
        hero.set_target(Some(Reference::unresolved("goblin", "0")));
        let effect_id =
            hero.add_effect(Effect::new("Burn").with_source(Reference::unresolved("imp", "2")));
        hero.remember(Reference::unresolved("wolf", "1"), Attitude::Hostile);

        let fields: Vec<_> = hero.references().into_iter().map(|(f, _)| f).collect();
        assert_eq!(
            fields,
            vec![
                ReferenceField::Target,
                ReferenceField::EffectSource(effect_id),
                ReferenceField::MemoryTarget(0),
            ]
        );
    }

    #[test]
    fn test_remember_replaces_existing_record() {
        let mut hero = Character::new("hero", "Hero");
        hero.remember(Reference::unresolved("wolf", "1"), Attitude::Hostile);
        hero.remember(Reference::unresolved("wolf", "1"), Attitude::Friendly);

        assert_eq!(hero.memory().len(), 1);
        assert_eq!(
            hero.attitude_toward(&EntityKey::new("wolf", "1")),
            Some(Attitude::Friendly)
        );
    }

    #[test]
    fn test_object_rejects_character_fields() {
        let mut chest = AreaObject::new("chest", "Chest");
        assert!(!chest.restore_reference(
            ReferenceField::Target,
            Reference::unresolved("goblin", "0")
        ));
    }
}
