//! Local file-based state storage backend.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ProvisionError, Result, StateError};

use super::store::StateStore;
use super::types::ProvisionState;

/// Directory name under the data directory.
const STATE_DIR: &str = "odoo-provision";

/// Used when the platform has no per-user data directory.
const FALLBACK_STATE_DIR: &str = "/var/lib/odoo-provision";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Returns the default state directory.
#[must_use]
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir().map_or_else(|| PathBuf::from(FALLBACK_STATE_DIR), |d| d.join(STATE_DIR))
}

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store in the default state directory.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_dir(default_state_dir())
    }

    /// Creates a store in a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        Self {
            base_dir,
            state_path,
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| write_failed(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }
}

impl Default for LocalStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn write_failed(message: String) -> ProvisionError {
    ProvisionError::State(StateError::WriteFailed { message })
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<ProvisionState>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        debug!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| {
            ProvisionError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;

        let state: ProvisionState = serde_json::from_str(&content).map_err(|e| {
            ProvisionError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;
        state.check_version()?;

        Ok(Some(state))
    }

    async fn save(&self, state: &ProvisionState) -> Result<()> {
        self.ensure_dir().await?;

        info!("Saving run log to: {}", self.state_path.display());

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.state_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| write_failed(format!("Failed to create temp state file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| write_failed(format!("Failed to write state file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| write_failed(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| write_failed(format!("Failed to rename state file: {e}")))?;

        debug!("State saved successfully");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path)
                .await
                .map_err(|e| write_failed(format!("Failed to delete state file: {e}")))?;
        }
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }
}
