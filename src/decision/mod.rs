//! Experiment and feature flag decisions.
mod executor;
mod forced_variations;
mod options;
mod reasons;
mod result;
mod service;
mod user_profile;

pub use executor::ExecutionMode;
pub use options::{DecideOption, DecideOptions};
pub use reasons::{DecisionReasons, DecisionResponse};
pub use result::{DecisionSource, ExperimentDecision, FeatureDecision};
pub use service::{DecisionService, DecisionServiceConfig};
pub use user_profile::{
    AsyncUserProfileService, BucketDecision, UserProfile, UserProfileService, UserProfileStore,
};
