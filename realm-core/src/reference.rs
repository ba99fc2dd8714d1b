//! Cross-references between entities.
//!
//! A reference is a non-owning pointer stored on an entity field, expressed as
//! the `(base id, serial)` of its target. It is either unresolved (just the
//! pair) or resolved (bound to a live entity of a known kind). Resolution
//! runs over a whole chapter through [`resolve_references`].

use crate::chapter::Chapter;
use crate::effect::EffectId;
use crate::object::{AreaObject, Character, Entity};
use crate::serial::EntityKey;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Kinds of entities a reference can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EntityKind {
    Character,
    Object,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Character => "character",
            EntityKind::Object => "object",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A stored pointer to another entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Known only by name.
    Unresolved(EntityKey),
    /// Bound to a live entity found in the chapter.
    Resolved { key: EntityKey, kind: EntityKind },
}

impl Reference {
    pub fn unresolved(id: impl Into<String>, serial: impl Into<String>) -> Self {
        Reference::Unresolved(EntityKey::new(id, serial))
    }

    /// A reference bound to a live entity.
    pub fn to<E: Entity>(entity: &E) -> Self {
        Reference::Resolved {
            key: entity.key(),
            kind: E::KIND,
        }
    }

    pub fn key(&self) -> &EntityKey {
        match self {
            Reference::Unresolved(key) => key,
            Reference::Resolved { key, .. } => key,
        }
    }

    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            Reference::Unresolved(_) => None,
            Reference::Resolved { kind, .. } => Some(*kind),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Reference::Resolved { .. })
    }

    fn bind(&mut self, kind: EntityKind) {
        let key = self.key().clone();
        *self = Reference::Resolved { key, kind };
    }

    fn unbind(&mut self) {
        let key = self.key().clone();
        *self = Reference::Unresolved(key);
    }
}

// ============================================================================
// Reference Fields
// ============================================================================

/// The entity field a reference lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceField {
    /// A character's current combat target.
    Target,
    /// The source of one of the entity's effects.
    EffectSource(EffectId),
    /// The target of the entity's n-th memory record.
    MemoryTarget(usize),
}

impl fmt::Display for ReferenceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceField::Target => write!(f, "target"),
            ReferenceField::EffectSource(id) => write!(f, "effect:{id}:source"),
            ReferenceField::MemoryTarget(index) => write!(f, "memory:{index}:target"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown reference field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for ReferenceField {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownField(s.to_string());
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            ["target"] => Ok(ReferenceField::Target),
            ["effect", id, "source"] => id
                .parse()
                .map(ReferenceField::EffectSource)
                .map_err(|_| unknown()),
            ["memory", index, "target"] => index
                .parse()
                .map(ReferenceField::MemoryTarget)
                .map_err(|_| unknown()),
            _ => Err(unknown()),
        }
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// A borrowed live entity of either kind.
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Character(&'a Character),
    Object(&'a AreaObject),
}

impl<'a> EntityRef<'a> {
    pub fn key(&self) -> EntityKey {
        match self {
            EntityRef::Character(c) => c.key(),
            EntityRef::Object(o) => o.key(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Character(_) => EntityKind::Character,
            EntityRef::Object(_) => EntityKind::Object,
        }
    }

    pub fn name(&self) -> &'a str {
        match self {
            EntityRef::Character(c) => &c.name,
            EntityRef::Object(o) => &o.name,
        }
    }

    pub fn area_id(&self) -> &'a str {
        match self {
            EntityRef::Character(c) => c.area_id(),
            EntityRef::Object(o) => o.area_id(),
        }
    }

    pub fn as_character(&self) -> Option<&'a Character> {
        match self {
            EntityRef::Character(c) => Some(c),
            EntityRef::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&'a AreaObject> {
        match self {
            EntityRef::Object(o) => Some(o),
            EntityRef::Character(_) => None,
        }
    }
}

/// A reference whose target could not be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    pub owner: EntityKey,
    pub field: ReferenceField,
    pub target: EntityKey,
}

/// Outcome of a resolution pass.
#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    pub resolved: usize,
    pub dangling: Vec<DanglingReference>,
}

impl ResolutionReport {
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty()
    }
}

/// Bind every reference in the chapter to the live entity carrying the same
/// key. References with no live target are logged and left unresolved.
pub fn resolve_references(chapter: &mut Chapter) -> ResolutionReport {
    let index = chapter.identity_index();
    let mut report = ResolutionReport::default();

    for character in chapter.characters_mut() {
        let owner = character.key();
        resolve_fields(&index, owner, character.references_mut(), &mut report);
    }
    for object in chapter.objects_mut() {
        let owner = object.key();
        resolve_fields(&index, owner, object.references_mut(), &mut report);
    }

    report
}

fn resolve_fields(
    index: &HashMap<EntityKey, EntityKind>,
    owner: EntityKey,
    fields: Vec<(ReferenceField, &mut Reference)>,
    report: &mut ResolutionReport,
) {
    for (field, reference) in fields {
        match index.get(reference.key()) {
            Some(kind) => {
                reference.bind(*kind);
                report.resolved += 1;
            }
            None => {
                warn!(
                    owner = %owner,
                    field = %field,
                    target = %reference.key(),
                    "dangling reference left unresolved"
                );
                reference.unbind();
                report.dangling.push(DanglingReference {
                    owner: owner.clone(),
                    field,
                    target: reference.key().clone(),
                });
            }
        }
    }
}
