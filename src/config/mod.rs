//! Project configuration: datafile data model, the indexed immutable snapshot, and the store
//! holding the active snapshot.
mod configuration_store;
mod models;
mod project_config;

pub use configuration_store::ConfigurationStore;
pub use models::*;
pub use project_config::{ProjectConfig, Rollout};
