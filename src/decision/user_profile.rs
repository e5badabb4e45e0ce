//! Sticky bucketing: remembering earlier bucketing decisions per user.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::attributes::STICKY_BUCKET_MAP_ATTRIBUTE;
use crate::{AttributeValue, Result, UserContext};

use super::{DecisionReasons, ExecutionMode};

/// A remembered bucketing decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDecision {
    pub variation_id: String,
}

/// Sticky bucketing decisions of one user, keyed by experiment id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub experiment_bucket_map: HashMap<String, BucketDecision>,
}

/// Blocking profile store.
pub trait UserProfileService: Send + Sync {
    /// Returns `Ok(None)` if the user has no stored profile.
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>>;
    fn save(&self, profile: &UserProfile) -> Result<()>;
}

/// Profile store that suspends while performing I/O. Usable from `*_async` decision calls only.
#[async_trait]
pub trait AsyncUserProfileService: Send + Sync {
    /// Returns `Ok(None)` if the user has no stored profile.
    async fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>>;
    async fn save(&self, profile: &UserProfile) -> Result<()>;
}

/// The profile store of a decision service. A service has at most one.
#[derive(Clone)]
pub enum UserProfileStore {
    Blocking(Arc<dyn UserProfileService>),
    Async(Arc<dyn AsyncUserProfileService>),
}

impl std::fmt::Debug for UserProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserProfileStore::Blocking(_) => f.write_str("UserProfileStore::Blocking"),
            UserProfileStore::Async(_) => f.write_str("UserProfileStore::Async"),
        }
    }
}

/// Sticky decisions for the duration of one top-level decision call.
///
/// The profile is looked up once on [`load`](UserProfileTracker::load), new decisions are
/// [recorded](UserProfileTracker::record) in memory, and [`save`](UserProfileTracker::save)
/// writes them back at most once.
#[derive(Debug)]
pub(crate) struct UserProfileTracker {
    store: Option<UserProfileStore>,
    /// Decisions supplied through the reserved attribute. Take precedence over the store.
    from_attributes: HashMap<String, BucketDecision>,
    profile: UserProfile,
    changed: bool,
}

impl UserProfileTracker {
    /// A tracker that never returns or saves anything.
    pub(crate) fn disabled(user_id: &str) -> UserProfileTracker {
        UserProfileTracker {
            store: None,
            from_attributes: HashMap::new(),
            profile: UserProfile {
                user_id: user_id.to_owned(),
                ..UserProfile::default()
            },
            changed: false,
        }
    }

    pub(crate) async fn load(
        store: Option<&UserProfileStore>,
        mode: ExecutionMode,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> UserProfileTracker {
        let mut tracker = UserProfileTracker::disabled(user.user_id());
        tracker.from_attributes = attribute_bucket_map(user, reasons);

        let store = match (store, mode) {
            (Some(UserProfileStore::Async(_)), ExecutionMode::Immediate) => {
                reasons.push(
                    "Asynchronous user profile service cannot be used by immediate decisions.",
                );
                None
            }
            (store, _) => store,
        };
        let Some(store) = store else {
            return tracker;
        };

        let user_id = user.user_id();
        let lookup = match store {
            UserProfileStore::Blocking(service) => service.lookup(user_id),
            UserProfileStore::Async(service) => service.lookup(user_id).await,
        };
        match lookup {
            Ok(Some(profile)) => tracker.profile.experiment_bucket_map = profile.experiment_bucket_map,
            Ok(None) => {}
            Err(err) => {
                log::warn!(target: "decision_engine", user_id; "failed to look up user profile: {err}");
                reasons.push(format!("Error while looking up user profile for user ID \"{user_id}\": {err}."));
            }
        }
        tracker.store = Some(store.clone());
        tracker
    }

    /// Remembered variation id for `experiment_id`.
    pub(crate) fn lookup(&self, experiment_id: &str) -> Option<&str> {
        self.from_attributes
            .get(experiment_id)
            .or_else(|| self.profile.experiment_bucket_map.get(experiment_id))
            .map(|it| it.variation_id.as_str())
    }

    /// Remember a new bucketing decision. Ignored when there is no store to save it to.
    pub(crate) fn record(&mut self, experiment_id: &str, variation_id: &str) {
        if self.store.is_none() {
            return;
        }
        let previous = self.profile.experiment_bucket_map.insert(
            experiment_id.to_owned(),
            BucketDecision {
                variation_id: variation_id.to_owned(),
            },
        );
        if previous.as_ref().map(|it| it.variation_id.as_str()) != Some(variation_id) {
            self.changed = true;
        }
    }

    /// Write recorded decisions back, if there are any.
    pub(crate) async fn save(self, reasons: &mut DecisionReasons) {
        let (Some(store), true) = (&self.store, self.changed) else {
            return;
        };
        let result = match store {
            UserProfileStore::Blocking(service) => service.save(&self.profile),
            UserProfileStore::Async(service) => service.save(&self.profile).await,
        };
        let user_id = self.profile.user_id.as_str();
        match result {
            Ok(()) => {
                log::debug!(target: "decision_engine", user_id; "saved user profile");
            }
            Err(err) => {
                log::warn!(target: "decision_engine", user_id; "failed to save user profile: {err}");
                reasons.push(format!("Error while saving user profile for user ID \"{user_id}\": {err}."));
            }
        }
    }
}

fn attribute_bucket_map(
    user: &UserContext,
    reasons: &mut DecisionReasons,
) -> HashMap<String, BucketDecision> {
    let Some(AttributeValue::Json(value)) = user.attribute(STICKY_BUCKET_MAP_ATTRIBUTE) else {
        return HashMap::new();
    };
    match HashMap::<String, BucketDecision>::deserialize(value) {
        Ok(map) => map,
        Err(err) => {
            log::warn!(target: "decision_engine",
                       user_id = user.user_id();
                       "ignoring malformed {STICKY_BUCKET_MAP_ATTRIBUTE} attribute: {err}");
            reasons.push(format!("Ignoring malformed {STICKY_BUCKET_MAP_ATTRIBUTE} attribute."));
            HashMap::new()
        }
    }
}
