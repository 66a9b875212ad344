//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;

use crate::error::Result;
use super::types::ProvisionState;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the provisioning state.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<ProvisionState>>;

    /// Saves the provisioning state.
    async fn save(&self, state: &ProvisionState) -> Result<()>;

    /// Deletes the provisioning state.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;
}
