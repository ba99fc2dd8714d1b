//! Serial registry for entity identities.
//!
//! Every entity carries a base id shared by all instances of its kind
//! ("goblin", "chest") and a serial that is unique within that base id.
//! The registry hands out serials and remembers every serial it has ever
//! recorded, so a destroyed entity's serial is never issued to a newcomer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

// ============================================================================
// Keys and Identity
// ============================================================================

/// Process-local token that tells two entity values apart even when they
/// carry the same base id and serial. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

/// The `(base id, serial)` pair naming one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub id: String,
    pub serial: String,
}

impl EntityKey {
    pub fn new(id: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            serial: serial.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.id, self.serial)
    }
}

/// Identity fields embedded in every entity.
///
/// The serial starts out empty or provisional (from content data or a save
/// file) and is fixed by [`SerialRegistry::assign`].
#[derive(Debug)]
pub struct Identity {
    base_id: String,
    serial: String,
    instance: InstanceId,
}

impl Identity {
    pub fn new(base_id: impl Into<String>) -> Self {
        Self {
            base_id: base_id.into(),
            serial: String::new(),
            instance: InstanceId::new(),
        }
    }

    /// Identity carrying a provisional serial, kept by the registry if unique.
    pub fn with_serial(base_id: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            ..Self::new(base_id)
        }
    }

    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn has_serial(&self) -> bool {
        !self.serial.is_empty()
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.base_id.clone(), self.serial.clone())
    }

    pub(crate) fn set_serial(&mut self, serial: impl Into<String>) {
        self.serial = serial.into();
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Which branch [`SerialRegistry::assign`] took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// The entity had no serial and received a new one.
    Fresh,
    /// The entity's serial was unique (or already recorded for this same
    /// entity) and was kept.
    Kept,
    /// The entity's serial collided with another holder and was replaced.
    Reassigned { previous: String },
}

impl Assignment {
    pub fn is_collision(&self) -> bool {
        matches!(self, Assignment::Reassigned { .. })
    }
}

/// Serials issued for one base id. A serial with no holder is reserved:
/// its entity is gone or not loaded, but references may still name it.
#[derive(Debug, Default)]
struct SerialGroup {
    issued: HashMap<String, Option<InstanceId>>,
    next: u64,
}

impl SerialGroup {
    fn next_free(&mut self) -> String {
        loop {
            let candidate = self.next.to_string();
            self.next += 1;
            if !self.issued.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

/// Issues and records serials per base id.
///
/// Owned by the module and passed explicitly to everything that creates
/// entities. Recorded serials are never released.
#[derive(Debug, Default)]
pub struct SerialRegistry {
    groups: HashMap<String, SerialGroup>,
}

impl SerialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the serial of `identity`, recording it for its base id.
    ///
    /// Safe to call repeatedly for the same entity: a serial already recorded
    /// for this instance is kept.
    pub fn assign(&mut self, identity: &mut Identity) -> Assignment {
        let group = self.groups.entry(identity.base_id.clone()).or_default();

        if identity.has_serial() {
            match group.issued.get(identity.serial()) {
                None => {
                    group
                        .issued
                        .insert(identity.serial.clone(), Some(identity.instance()));
                    return Assignment::Kept;
                }
                Some(Some(holder)) if *holder == identity.instance() => return Assignment::Kept,
                Some(_) => {}
            }
        }

        let serial = group.next_free();
        group.issued.insert(serial.clone(), Some(identity.instance()));
        let previous = std::mem::replace(&mut identity.serial, serial);

        debug!(
            id = %identity.base_id,
            serial = %identity.serial,
            previous = %previous,
            "assigned serial"
        );

        if previous.is_empty() {
            Assignment::Fresh
        } else {
            Assignment::Reassigned { previous }
        }
    }

    /// Record `base_id#serial` as taken without a holder, so it is never
    /// handed to a new entity. Returns `false` if it was already recorded.
    pub fn reserve(&mut self, base_id: &str, serial: &str) -> bool {
        if serial.is_empty() {
            return false;
        }
        let group = self.groups.entry(base_id.to_string()).or_default();
        if group.issued.contains_key(serial) {
            return false;
        }
        group.issued.insert(serial.to_string(), None);
        true
    }

    /// Every recorded serial and allocation counter, for saving.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let groups = self
            .groups
            .iter()
            .map(|(base_id, group)| {
                let snapshot = GroupSnapshot {
                    issued: group.issued.keys().cloned().collect(),
                    next: group.next,
                };
                (base_id.clone(), snapshot)
            })
            .collect();
        RegistrySnapshot { groups }
    }

    /// Reserve every serial in `snapshot` and advance counters to at least
    /// the saved values. Serials already held stay with their holders.
    pub fn reserve_snapshot(&mut self, snapshot: &RegistrySnapshot) -> usize {
        let mut reserved = 0;
        for (base_id, saved) in &snapshot.groups {
            for serial in &saved.issued {
                if self.reserve(base_id, serial) {
                    reserved += 1;
                }
            }
            let group = self.groups.entry(base_id.clone()).or_default();
            group.next = group.next.max(saved.next);
        }
        reserved
    }

    /// Whether `serial` has ever been recorded for `base_id`.
    pub fn is_issued(&self, base_id: &str, serial: &str) -> bool {
        self.groups
            .get(base_id)
            .map(|g| g.issued.contains_key(serial))
            .unwrap_or(false)
    }

    /// Number of serials recorded for `base_id`, live or stale.
    pub fn issued_count(&self, base_id: &str) -> usize {
        self.groups.get(base_id).map(|g| g.issued.len()).unwrap_or(0)
    }

    /// The instance currently recorded as holding `base_id#serial`.
    pub fn holder(&self, base_id: &str, serial: &str) -> Option<InstanceId> {
        self.groups
            .get(base_id)
            .and_then(|g| g.issued.get(serial))
            .copied()
            .flatten()
    }
}

/// Saved form of a [`SerialRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub groups: BTreeMap<String, GroupSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    #[serde(default)]
    pub issued: BTreeSet<String>,
    #[serde(default)]
    pub next: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_entity_gets_fresh_serial() {
        let mut registry = SerialRegistry::new();
        let mut goblin = Identity::new("goblin");

        assert_eq!(registry.assign(&mut goblin), Assignment::Fresh);
        assert_eq!(goblin.serial(), "0");
        assert!(registry.is_issued("goblin", "0"));
    }

    #[test]
    fn test_second_goblin_does_not_reuse_serial() {
        let mut registry = SerialRegistry::new();
        let mut first = Identity::with_serial("goblin", "0");
        let mut second = Identity::new("goblin");

        assert_eq!(registry.assign(&mut first), Assignment::Kept);
        assert_eq!(registry.assign(&mut second), Assignment::Fresh);

        assert_eq!(first.serial(), "0");
        assert_ne!(second.serial(), "0");
        assert_eq!(second.serial(), "1");
    }

    #[test]
    fn test_unique_provisional_serial_is_kept() {
        let mut registry = SerialRegistry::new();
        let mut troll = Identity::with_serial("troll", "7");

        assert_eq!(registry.assign(&mut troll), Assignment::Kept);
        assert_eq!(troll.serial(), "7");
    }

    #[test]
    fn test_colliding_serial_is_reassigned() {
        let mut registry = SerialRegistry::new();
        let mut first = Identity::with_serial("goblin", "0");
        let mut twin = Identity::with_serial("goblin", "0");

        registry.assign(&mut first);
        let result = registry.assign(&mut twin);

        assert_eq!(
            result,
            Assignment::Reassigned {
                previous: "0".to_string()
            }
        );
        assert!(result.is_collision());
        assert_ne!(twin.serial(), first.serial());
    }

    #[test]
    fn test_assign_is_idempotent_for_same_entity() {
        let mut registry = SerialRegistry::new();
        let mut goblin = Identity::new("goblin");

        registry.assign(&mut goblin);
        let serial = goblin.serial().to_string();

        assert_eq!(registry.assign(&mut goblin), Assignment::Kept);
        assert_eq!(registry.assign(&mut goblin), Assignment::Kept);
        assert_eq!(goblin.serial(), serial);
        assert_eq!(registry.issued_count("goblin"), 1);
    }

    #[test]
    fn test_destroyed_serial_stays_reserved() {
        let mut registry = SerialRegistry::new();
        let mut doomed = Identity::new("goblin");
        registry.assign(&mut doomed);
        let old_serial = doomed.serial().to_string();
        drop(doomed);

        // A newcomer claiming the dead goblin's serial must not get it
        let mut newcomer = Identity::with_serial("goblin", old_serial.clone());
        assert!(registry.assign(&mut newcomer).is_collision());
        assert_ne!(newcomer.serial(), old_serial);
    }

    #[test]
    fn test_fresh_serials_skip_preserved_ones() {
        let mut registry = SerialRegistry::new();
        let mut loaded = Identity::with_serial("wolf", "1");
        registry.assign(&mut loaded);

        let mut a = Identity::new("wolf");
        let mut b = Identity::new("wolf");
        registry.assign(&mut a);
        registry.assign(&mut b);

        assert_eq!(a.serial(), "0");
        assert_eq!(b.serial(), "2");
    }

    #[test]
    fn test_groups_are_independent() {
        let mut registry = SerialRegistry::new();
        let mut goblin = Identity::new("goblin");
        let mut wolf = Identity::new("wolf");

        registry.assign(&mut goblin);
        registry.assign(&mut wolf);

        assert_eq!(goblin.serial(), "0");
        assert_eq!(wolf.serial(), "0");
        assert_ne!(goblin.key(), wolf.key());
    }

    #[test]
    fn test_many_entities_are_unique() {
        let mut registry = SerialRegistry::new();
        let mut identities: Vec<Identity> = (0..50).map(|_| Identity::new("rat")).collect();
        for identity in &mut identities {
            registry.assign(identity);
        }

        let mut serials: Vec<_> = identities.iter().map(|i| i.serial().to_string()).collect();
        serials.sort();
        serials.dedup();
        assert_eq!(serials.len(), 50);
    }

    #[test]
    fn test_holder_tracks_instance() {
        let mut registry = SerialRegistry::new();
        let mut goblin = Identity::new("goblin");
        registry.assign(&mut goblin);

        assert_eq!(registry.holder("goblin", "0"), Some(goblin.instance()));
        assert_eq!(registry.holder("goblin", "9"), None);
    }

    #[test]
    fn test_reserved_serial_is_never_issued() {
        let mut registry = SerialRegistry::new();
        assert!(registry.reserve("goblin", "0"));
        assert!(!registry.reserve("goblin", "0"));

        let mut goblin = Identity::new("goblin");
        assert_eq!(registry.assign(&mut goblin), Assignment::Fresh);
        assert_eq!(goblin.serial(), "1");

        let mut claimant = Identity::with_serial("goblin", "0");
        assert!(registry.assign(&mut claimant).is_collision());
        assert_eq!(registry.holder("goblin", "0"), None);
    }

    #[test]
    fn test_snapshot_carries_stale_serials() {
        let mut registry = SerialRegistry::new();
        let mut kept = Identity::new("goblin");
        let mut doomed = Identity::new("goblin");
        registry.assign(&mut kept);
        registry.assign(&mut doomed);
        drop(doomed);
        let snapshot = registry.snapshot();

        // Reload: only the surviving goblin is placed again
        let mut reloaded = SerialRegistry::new();
        let mut survivor = Identity::with_serial("goblin", kept.serial());
        assert_eq!(reloaded.assign(&mut survivor), Assignment::Kept);
        assert_eq!(reloaded.reserve_snapshot(&snapshot), 1);

        assert_eq!(reloaded.holder("goblin", "0"), Some(survivor.instance()));
        assert!(reloaded.is_issued("goblin", "1"));
        let mut newcomer = Identity::new("goblin");
        reloaded.assign(&mut newcomer);
        assert_eq!(newcomer.serial(), "2");
    }

    #[test]
    fn test_entity_key_display() {
        let key = EntityKey::new("goblin", "1");
        assert_eq!(key.to_string(), "goblin#1");
    }
}
