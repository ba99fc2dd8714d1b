//! Static content consumed by the core.
//!
//! The data layer is an external collaborator: it answers lookups by id and
//! reports absence as `None`, never as an error. [`ContentCatalog`] is an
//! in-memory implementation that can be loaded from a JSON file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Errors from loading a content catalog.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_health() -> i32 {
    10
}

/// Base data for a character kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterData {
    pub id: String,
    /// Provisional serial; kept by the registry if unique.
    #[serde(default)]
    pub serial: Option<String>,
    pub name: String,
    #[serde(default = "default_health")]
    pub max_health: i32,
    #[serde(default)]
    pub player: bool,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl CharacterData {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            serial: None,
            name: name.into(),
            max_health: default_health(),
            player: false,
            flags: Vec::new(),
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn as_player(mut self) -> Self {
        self.player = true;
        self
    }
}

/// Base data for an area object kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    pub id: String,
    #[serde(default)]
    pub serial: Option<String>,
    pub name: String,
    #[serde(default = "default_health")]
    pub max_health: i32,
}

impl ObjectData {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            serial: None,
            name: name.into(),
            max_health: default_health(),
        }
    }
}

/// An area with its initial population and nested subareas.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AreaData {
    pub id: String,
    #[serde(default)]
    pub characters: Vec<CharacterData>,
    #[serde(default)]
    pub objects: Vec<ObjectData>,
    #[serde(default)]
    pub subareas: Vec<AreaData>,
}

impl AreaData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_character(mut self, character: CharacterData) -> Self {
        self.characters.push(character);
        self
    }

    pub fn with_object(mut self, object: ObjectData) -> Self {
        self.objects.push(object);
        self
    }

    pub fn with_subarea(mut self, subarea: AreaData) -> Self {
        self.subareas.push(subarea);
        self
    }
}

/// A chapter's configuration: where it starts and which areas exist up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterData {
    pub id: String,
    pub start_area: String,
    /// Areas materialized when the chapter starts. Others load on demand.
    #[serde(default)]
    pub areas: Vec<String>,
}

impl ChapterData {
    pub fn new(id: impl Into<String>, start_area: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_area: start_area.into(),
            areas: Vec::new(),
        }
    }

    pub fn with_areas(mut self, areas: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.areas.extend(areas.into_iter().map(Into::into));
        self
    }
}

/// Source of static content, keyed by id.
pub trait ContentSource: Send + Sync {
    fn chapter_data(&self, id: &str) -> Option<ChapterData>;
    fn area_data(&self, id: &str) -> Option<AreaData>;
    fn character_data(&self, id: &str) -> Option<CharacterData>;
    fn object_data(&self, id: &str) -> Option<ObjectData>;
}

/// On-disk layout of a catalog file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    chapters: Vec<ChapterData>,
    #[serde(default)]
    areas: Vec<AreaData>,
    #[serde(default)]
    characters: Vec<CharacterData>,
    #[serde(default)]
    objects: Vec<ObjectData>,
}

/// In-memory content indexed by id.
#[derive(Debug, Clone, Default)]
pub struct ContentCatalog {
    chapters: HashMap<String, ChapterData>,
    areas: HashMap<String, AreaData>,
    characters: HashMap<String, CharacterData>,
    objects: HashMap<String, ObjectData>,
}

impl ContentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chapter(mut self, chapter: ChapterData) -> Self {
        self.chapters.insert(chapter.id.clone(), chapter);
        self
    }

    pub fn with_area(mut self, area: AreaData) -> Self {
        self.areas.insert(area.id.clone(), area);
        self
    }

    pub fn with_character(mut self, character: CharacterData) -> Self {
        self.characters.insert(character.id.clone(), character);
        self
    }

    pub fn with_object(mut self, object: ObjectData) -> Self {
        self.objects.insert(object.id.clone(), object);
        self
    }

    /// Parse a catalog from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, ContentError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let catalog = file
            .chapters
            .into_iter()
            .fold(Self::new(), |c, data| c.with_chapter(data));
        let catalog = file
            .areas
            .into_iter()
            .fold(catalog, |c, data| c.with_area(data));
        let catalog = file
            .characters
            .into_iter()
            .fold(catalog, |c, data| c.with_character(data));
        Ok(file
            .objects
            .into_iter()
            .fold(catalog, |c, data| c.with_object(data)))
    }

    /// Load a catalog from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, ContentError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json_str(&content)
    }
}

impl ContentSource for ContentCatalog {
    fn chapter_data(&self, id: &str) -> Option<ChapterData> {
        self.chapters.get(id).cloned()
    }

    fn area_data(&self, id: &str) -> Option<AreaData> {
        self.areas.get(id).cloned()
    }

    fn character_data(&self, id: &str) -> Option<CharacterData> {
        self.characters.get(id).cloned()
    }

    fn object_data(&self, id: &str) -> Option<ObjectData> {
        self.objects.get(id).cloned()
    }
}
