//! A thread-safe in-memory holder for the currently active [`ProjectConfig`]. Readers (decision
//! calls) and writers (whatever delivers new datafiles) can access it concurrently.
use std::sync::{Arc, RwLock};

use super::ProjectConfig;

/// `ConfigurationStore` provides a thread-safe (`Sync`) storage for the project configuration.
///
/// `ProjectConfig` itself is always immutable and can only be replaced completely. A decision
/// call should grab one snapshot and use it throughout.
#[derive(Default)]
pub struct ConfigurationStore {
    configuration: RwLock<Option<Arc<ProjectConfig>>>,
}

impl ConfigurationStore {
    /// Create a new empty configuration store.
    pub fn new() -> Self {
        ConfigurationStore::default()
    }

    /// Get currently-active configuration. Returns None if no configuration has been stored yet.
    pub fn get_configuration(&self) -> Option<Arc<ProjectConfig>> {
        // Err() is possible only if the lock is poisoned (writer panicked while holding the lock),
        // which should never happen.
        let configuration = self
            .configuration
            .read()
            .expect("thread holding configuration lock should not panic");

        configuration.clone()
    }

    /// Set new configuration.
    pub fn set_configuration(&self, config: Arc<ProjectConfig>) {
        let mut configuration_slot = self
            .configuration
            .write()
            .expect("thread holding configuration lock should not panic");

        log::debug!(target: "decision_engine", revision:display = config.revision; "activating new project configuration");
        *configuration_slot = Some(config);
    }
}
