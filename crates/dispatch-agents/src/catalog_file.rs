//! Catalog read from a JSON file on every fetch, so edits to the file
//! reach the next turn without a restart.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use funnel::{CatalogError, CatalogProvider, ServiceScenario};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CatalogProvider for FileCatalog {
    async fn scenarios(&self) -> Result<Vec<ServiceScenario>, CatalogError> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CatalogError::Unavailable(format!("{}: {e}", self.path.display()))
        })?;
        let scenarios: Vec<ServiceScenario> = serde_json::from_str(&text)
            .map_err(|e| CatalogError::Malformed(format!("{}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), count = scenarios.len(), "Loaded catalog");
        Ok(scenarios)
    }
}
