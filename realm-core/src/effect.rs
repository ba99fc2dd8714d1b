//! Timed effects and their modifiers.
//!
//! Effects are the main way features outside the core move entities around:
//! a [`Modifier::AreaChange`] only rewrites the owner's declared area, and
//! the migration pass performs the actual relocation after the tick.

use crate::object::{Health, Placement};
use crate::reference::{Reference, ReferenceField};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

/// Unique identifier for an effect instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectId(pub Uuid);

impl EffectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EffectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(EffectId)
    }
}

/// What an effect does to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Modifier {
    /// Declare a new area for the owner.
    AreaChange { area_id: String },
    /// Adjust current health (negative for damage).
    Health { amount: i32 },
    /// Set a named flag on the owner.
    Flag { flag: String },
}

/// The parts of an entity a modifier may touch.
pub struct ModifierTarget<'a> {
    pub placement: &'a mut Placement,
    pub health: &'a mut Health,
    pub flags: &'a mut BTreeSet<String>,
}

/// Apply a single modifier to its target.
pub fn apply_modifier(modifier: &Modifier, target: &mut ModifierTarget<'_>) {
    match modifier {
        Modifier::AreaChange { area_id } => target.placement.declare(area_id.clone()),
        Modifier::Health { amount } => target.health.adjust(*amount),
        Modifier::Flag { flag } => {
            target.flags.insert(flag.clone());
        }
    }
}

/// An effect attached to a character or area object.
#[derive(Debug, Clone)]
pub struct Effect {
    pub id: EffectId,
    pub name: String,
    /// Who caused the effect, if anyone.
    pub source: Option<Reference>,
    pub modifiers: Vec<Modifier>,
    /// Total duration in milliseconds; `None` lasts until removed.
    pub duration: Option<u64>,
    pub elapsed: u64,
    /// Whether the modifiers already ran.
    pub applied: bool,
}

impl Effect {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EffectId::new(),
            name: name.into(),
            source: None,
            modifiers: Vec::new(),
            duration: None,
            elapsed: 0,
            applied: false,
        }
    }

    pub fn with_source(mut self, source: Reference) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn with_duration(mut self, millis: u64) -> Self {
        self.duration = Some(millis);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.duration.map(|d| self.elapsed >= d).unwrap_or(false)
    }

    pub fn remaining(&self) -> Option<u64> {
        self.duration.map(|d| d.saturating_sub(self.elapsed))
    }

    /// The source, if the last resolution pass bound it. The entity may have
    /// left the chapter since; [`Chapter::effect_source`] checks that.
    ///
    /// [`Chapter::effect_source`]: crate::chapter::Chapter::effect_source
    pub fn live_source(&self) -> Option<&Reference> {
        self.source.as_ref().filter(|s| s.is_resolved())
    }
}

/// Advance every effect by `delta` milliseconds, applying pending modifiers
/// and dropping expired effects.
pub(crate) fn update_effects(effects: &mut Vec<Effect>, delta: u64, mut target: ModifierTarget<'_>) {
    for effect in effects.iter_mut() {
        if !effect.applied {
            for modifier in &effect.modifiers {
                apply_modifier(modifier, &mut target);
            }
            effect.applied = true;
        }
        effect.elapsed = effect.elapsed.saturating_add(delta);
    }

    effects.retain(|effect| {
        if effect.is_expired() {
            debug!(effect = %effect.name, id = %effect.id, "effect expired");
            false
        } else {
            true
        }
    });
}

pub(crate) fn effect_references(effects: &[Effect]) -> Vec<(ReferenceField, &Reference)> {
    effects
        .iter()
        .filter_map(|e| {
            e.source
                .as_ref()
                .map(|s| (ReferenceField::EffectSource(e.id), s))
        })
        .collect()
}

pub(crate) fn effect_references_mut(
    effects: &mut [Effect],
) -> Vec<(ReferenceField, &mut Reference)> {
    effects
        .iter_mut()
        .filter_map(|e| {
            let id = e.id;
            e.source
                .as_mut()
                .map(|s| (ReferenceField::EffectSource(id), s))
        })
        .collect()
}
