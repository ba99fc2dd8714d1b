//! Async session around a running module.
//!
//! The session is the one place where async callers meet the world. Every
//! operation takes the same lock, so a tick and a save or load never
//! overlap.

use crate::migration::MigrationReport;
use crate::module::{Module, ModuleError};
use crate::persist::ImportReport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Shared handle to a running module.
#[derive(Clone)]
pub struct Session {
    module: Arc<Mutex<Module>>,
}

impl Session {
    pub fn new(module: Module) -> Self {
        Self {
            module: Arc::new(Mutex::new(module)),
        }
    }

    /// Advance the world by `delta` milliseconds.
    pub async fn tick(&self, delta: u64) -> MigrationReport {
        let mut module = self.module.lock().await;
        let report = module.update(delta);
        debug!(elapsed = module.elapsed(), moved = report.moved(), "tick");
        report
    }

    /// Save to a named slot. The world is frozen until the file is written.
    pub async fn save(&self, slot: &str) -> Result<PathBuf, ModuleError> {
        let module = self.module.lock().await;
        module.save(slot).await
    }

    /// Load a named slot, replacing the world.
    pub async fn load(&self, slot: &str) -> Result<ImportReport, ModuleError> {
        let mut module = self.module.lock().await;
        module.load(slot).await
    }

    /// Run a read-only query against the module.
    pub async fn read<R>(&self, f: impl FnOnce(&Module) -> R) -> R {
        let module = self.module.lock().await;
        f(&module)
    }

    /// Run a mutation against the module between ticks.
    pub async fn write<R>(&self, f: impl FnOnce(&mut Module) -> R) -> R {
        let mut module = self.module.lock().await;
        f(&mut module)
    }
}
