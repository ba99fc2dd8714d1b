//! World core for a persistent role-playing simulation.
//!
//! This crate provides:
//! - A serial registry that keeps `(id, serial)` keys unique per base id
//! - A nested area tree that owns characters and area objects
//! - A per-tick migration pass that moves entities to their declared area
//! - Two-pass save/load that rebuilds the same identity graph and re-binds
//!   every cross-entity reference
//!
//! # Quick Start
//!
//! ```ignore
//! use realm_core::{ContentCatalog, Module, ModuleConfig, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let content = ContentCatalog::load_json("content.json").await?;
//!     let config = ModuleConfig::load_json("module.json").await?;
//!
//!     let session = Session::new(Module::new(config, content)?);
//!     session.write(|m| m.spawn_character("goblin", "cave")).await?;
//!
//!     for _ in 0..60 {
//!         session.tick(16).await;
//!     }
//!
//!     session.save("quicksave").await?;
//!     Ok(())
//! }
//! ```

pub mod area;
pub mod chapter;
pub mod config;
pub mod content;
pub mod effect;
pub mod migration;
pub mod module;
pub mod object;
pub mod persist;
pub mod reference;
pub mod serial;
pub mod session;
pub mod testing;

// Primary public API
pub use area::{Area, Placeable};
pub use chapter::{Chapter, ChapterConfig};
pub use config::{CollisionPolicy, ConfigError, ModuleConfig};
pub use content::{
    AreaData, ChapterData, CharacterData, ContentCatalog, ContentError, ContentSource, ObjectData,
};
pub use effect::{Effect, EffectId, Modifier};
pub use migration::{reconcile_locations, MigrationOutcome, MigrationReport};
pub use module::{Module, ModuleError};
pub use object::{AreaObject, Attitude, Character, Entity, Health, Memory, Relocation};
pub use persist::{
    export_chapter, import_chapter, ImportReport, PersistError, SaveMetadata, SavedModule,
};
pub use reference::{resolve_references, EntityKind, EntityRef, Reference, ResolutionReport};
pub use serial::{Assignment, EntityKey, RegistrySnapshot, SerialRegistry};
pub use session::Session;
pub use testing::{sample_catalog, TestWorld};
