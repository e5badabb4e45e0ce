use std::collections::HashMap;
use std::sync::RwLock;

/// Variations forced through the API: user id to experiment id to variation id.
///
/// Lives as long as the owning decision service.
#[derive(Debug, Default)]
pub(crate) struct ForcedVariations {
    by_user: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl ForcedVariations {
    pub(crate) fn get(&self, user_id: &str, experiment_id: &str) -> Option<String> {
        let by_user = self
            .by_user
            .read()
            .expect("thread holding forced variations lock should not panic");
        by_user.get(user_id)?.get(experiment_id).cloned()
    }

    pub(crate) fn set(&self, user_id: &str, experiment_id: &str, variation_id: &str) {
        let mut by_user = self
            .by_user
            .write()
            .expect("thread holding forced variations lock should not panic");
        by_user
            .entry(user_id.to_owned())
            .or_default()
            .insert(experiment_id.to_owned(), variation_id.to_owned());
    }

    /// Returns `true` if a forced variation was removed.
    pub(crate) fn remove(&self, user_id: &str, experiment_id: &str) -> bool {
        let mut by_user = self
            .by_user
            .write()
            .expect("thread holding forced variations lock should not panic");
        let Some(experiments) = by_user.get_mut(user_id) else {
            return false;
        };
        let removed = experiments.remove(experiment_id).is_some();
        if experiments.is_empty() {
            by_user.remove(user_id);
        }
        removed
    }
}
