use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Type alias for a HashMap representing key-value pairs of user attributes.
///
/// Keys are attribute keys as declared in the project configuration.
///
/// # Examples
/// ```
/// # use decision_engine::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30.0.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("browser".to_owned(), "firefox".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Reserved attribute that overrides the id used for bucketing.
pub const BUCKETING_ID_ATTRIBUTE: &str = "$opt_bucketing_id";

/// Reserved attribute carrying sticky bucketing decisions supplied by the caller.
pub const STICKY_BUCKET_MAP_ATTRIBUTE: &str = "$opt_experiment_bucket_map";

/// Enum representing possible values of a user attribute.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, and `bool` types.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value or absence of value.
    Null,
    /// Nested JSON, only meaningful for reserved attributes such as
    /// [`STICKY_BUCKET_MAP_ATTRIBUTE`].
    #[from(ignore)]
    Json(serde_json::Value),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        if let AttributeValue::Number(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Number(value as f64)
    }
}
