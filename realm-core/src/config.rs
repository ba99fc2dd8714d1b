//! Module configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors from loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What to do when a loaded entity's serial is already held by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Give the newcomer a fresh serial and keep loading.
    #[default]
    Reassign,
    /// Abort the load.
    Reject,
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("saves")
}

/// Configuration for a running module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Module name, also used to name save files.
    pub name: String,

    /// Chapter ids in story order.
    #[serde(default)]
    pub chapters: Vec<String>,

    /// Chapter to start in. Defaults to the first listed chapter.
    #[serde(default)]
    pub start_chapter: Option<String>,

    /// Directory for save files.
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,

    #[serde(default)]
    pub collision_policy: CollisionPolicy,
}

impl ModuleConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chapters: Vec::new(),
            start_chapter: None,
            save_dir: default_save_dir(),
            collision_policy: CollisionPolicy::default(),
        }
    }

    /// Set the chapter order.
    pub fn with_chapters(mut self, chapters: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.chapters = chapters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_start_chapter(mut self, chapter: impl Into<String>) -> Self {
        self.start_chapter = Some(chapter.into());
        self
    }

    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = dir.into();
        self
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    /// The chapter a fresh module starts in.
    pub fn start_chapter(&self) -> Option<&str> {
        self.start_chapter
            .as_deref()
            .or_else(|| self.chapters.first().map(String::as_str))
    }

    /// The chapter listed after `current`, if any.
    pub fn chapter_after(&self, current: &str) -> Option<&str> {
        let index = self.chapters.iter().position(|c| c == current)?;
        self.chapters.get(index + 1).map(String::as_str)
    }

    /// Load configuration from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}
