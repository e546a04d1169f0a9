//! Model persistence
//!
//! The store is written verbatim as nested JSON maps keyed by string bucket
//! labels, so any collaborator can read it without this crate.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ModelResult;
use crate::model::ModelStore;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// `None` when nothing has been saved yet.
    async fn load(&self) -> ModelResult<Option<ModelStore>>;
    async fn save(&self, store: &ModelStore) -> ModelResult<()>;
}

/// Single JSON file, replaced atomically on every save.
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ModelRepository for JsonFileRepository {
    async fn load(&self) -> ModelResult<Option<ModelStore>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved model state");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let store: ModelStore = serde_json::from_str(&raw)?;
        info!(
            path = %self.path.display(),
            global_base_cells = store.global_base.cell_count(),
            units = store.unit_base.len(),
            "Loaded model state"
        );
        Ok(Some(store))
    }

    async fn save(&self, store: &ModelStore) -> ModelResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(store)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "Saved model state");
        Ok(())
    }
}

/// In-process repository for tests and dry runs.
#[derive(Default)]
pub struct MemoryRepository {
    saved: RwLock<Option<ModelStore>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: ModelStore) -> Self {
        Self {
            saved: RwLock::new(Some(store)),
        }
    }
}

#[async_trait]
impl ModelRepository for MemoryRepository {
    async fn load(&self) -> ModelResult<Option<ModelStore>> {
        Ok(self.saved.read().await.clone())
    }

    async fn save(&self, store: &ModelStore) -> ModelResult<()> {
        *self.saved.write().await = Some(store.clone());
        Ok(())
    }
}
