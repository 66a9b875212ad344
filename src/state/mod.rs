//! State management for the provisioning run log.
//!
//! Every `apply` run appends its report to a JSON file in the state
//! directory, so `history` can show what earlier runs changed.

mod local;
mod store;
mod types;

pub use local::{LocalStateStore, default_state_dir};
pub use store::StateStore;
pub use types::{MAX_HISTORY, ProvisionState, STATE_VERSION};
