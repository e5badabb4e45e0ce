use std::sync::Arc;

/// Represents a result type for decision operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur while computing decisions.
///
/// Single-experiment decisions fail only with [`Error::InvalidBucketingInput`] or
/// [`Error::InvalidGroupId`]. Feature decisions never fail: recoverable conditions such as CMAB or
/// profile store failures are turned into decision reasons.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The composite bucketing key could not be hashed.
    #[error("invalid bucketing input {key:?}")]
    InvalidBucketingInput {
        /// The offending key.
        key: String,
        /// Underlying hashing failure.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// An experiment references a group that is absent from the configuration.
    #[error("invalid group id {group_id:?}")]
    InvalidGroupId {
        /// The unknown group id.
        group_id: String,
    },

    /// An experiment key is not present in the configuration.
    #[error("experiment key {experiment_key:?} is not in datafile")]
    InvalidExperimentKey {
        /// The unknown experiment key.
        experiment_key: String,
    },

    /// A variation key is not present in the experiment.
    #[error("variation key {variation_key:?} is not in experiment {experiment_key:?}")]
    InvalidVariationKey {
        /// Experiment the variation was looked up in.
        experiment_key: String,
        /// The unknown variation key.
        variation_key: String,
    },

    /// The remote CMAB decision endpoint failed.
    #[error("failed to fetch CMAB decision for rule {rule_id:?}: {message}")]
    CmabFetchFailed {
        /// Rule the decision was requested for.
        rule_id: String,
        /// Human readable cause.
        message: String,
    },

    /// CMAB decisions require a suspending call and cannot be served in immediate mode.
    #[error("CMAB rule {rule_id:?} is not supported by immediate decisions")]
    CmabUnsupported {
        /// Rule that was skipped.
        rule_id: String,
    },

    /// The user profile store failed to look up or save a profile.
    #[error("user profile store error: {message}")]
    UserProfile {
        /// Human readable cause.
        message: String,
    },

    /// No project configuration has been stored yet.
    #[error("project configuration has not been set")]
    ConfigurationMissing,

    /// Configuration JSON could not be parsed.
    #[error("error parsing configuration: {0}")]
    ConfigurationParseError(Arc<serde_json::Error>),

    /// Invalid base URL configuration.
    #[error("invalid prediction endpoint configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::ConfigurationParseError(Arc::new(value))
    }
}
