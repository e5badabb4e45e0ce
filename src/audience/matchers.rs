//! Matcher registry and the built-in matchers.
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::{AttributeValue, UserContext};

use super::{semver::compare_versions, Condition};

/// Largest magnitude a number may have to take part in numeric comparisons (2^53).
const MAX_SAFE_NUMBER: f64 = 9_007_199_254_740_992.0;

/// Evaluates one matcher leaf against a user.
///
/// Returns `None` ("unknown") when the condition cannot be applied, e.g. the attribute is
/// missing or has an incompatible type.
pub trait Matcher: Send + Sync {
    fn evaluate(&self, condition: &Condition, user: &UserContext) -> Option<bool>;
}

impl<F> Matcher for F
where
    F: Fn(&Condition, &UserContext) -> Option<bool> + Send + Sync,
{
    fn evaluate(&self, condition: &Condition, user: &UserContext) -> Option<bool> {
        self(condition, user)
    }
}

/// Condition type of leaves matched against user attributes.
pub const CUSTOM_ATTRIBUTE: &str = "custom_attribute";

/// Condition type of leaves matched against the user's qualified segments.
pub const THIRD_PARTY_DIMENSION: &str = "third_party_dimension";

/// Open map from a leaf's condition type (`type`) and matcher name (`match`) to a matcher.
///
/// [`MatcherRegistry::default`] contains every built-in matcher: `custom_attribute` leaves
/// support `exact`, `exists`, `substring`, the numeric and the `semver_*` matchers, and
/// `third_party_dimension` leaves support `qualified` only. Any other pairing has no matcher
/// and evaluates to unknown. Embedding applications may [register](MatcherRegistry::register)
/// more, or replace built-ins.
#[derive(Clone)]
pub struct MatcherRegistry {
    matchers: HashMap<String, HashMap<String, Arc<dyn Matcher>>>,
}

impl MatcherRegistry {
    /// A registry with no matchers at all.
    pub fn empty() -> MatcherRegistry {
        MatcherRegistry {
            matchers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        condition_type: impl Into<String>,
        name: impl Into<String>,
        matcher: impl Matcher + 'static,
    ) -> &mut Self {
        self.matchers
            .entry(condition_type.into())
            .or_default()
            .insert(name.into(), Arc::new(matcher));
        self
    }

    pub fn get(&self, condition_type: &str, name: &str) -> Option<&dyn Matcher> {
        self.matchers
            .get(condition_type)?
            .get(name)
            .map(|it| it.as_ref())
    }
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        let mut registry = MatcherRegistry::empty();
        registry
            .register(CUSTOM_ATTRIBUTE, "exact", exact)
            .register(CUSTOM_ATTRIBUTE, "exists", exists)
            .register(CUSTOM_ATTRIBUTE, "substring", substring)
            .register(CUSTOM_ATTRIBUTE, "gt", numeric(|user, target| user > target))
            .register(CUSTOM_ATTRIBUTE, "ge", numeric(|user, target| user >= target))
            .register(CUSTOM_ATTRIBUTE, "lt", numeric(|user, target| user < target))
            .register(CUSTOM_ATTRIBUTE, "le", numeric(|user, target| user <= target))
            .register(CUSTOM_ATTRIBUTE, "semver_eq", semver(|ord| ord == Ordering::Equal))
            .register(CUSTOM_ATTRIBUTE, "semver_gt", semver(|ord| ord == Ordering::Greater))
            .register(CUSTOM_ATTRIBUTE, "semver_ge", semver(|ord| ord != Ordering::Less))
            .register(CUSTOM_ATTRIBUTE, "semver_lt", semver(|ord| ord == Ordering::Less))
            .register(CUSTOM_ATTRIBUTE, "semver_le", semver(|ord| ord != Ordering::Greater))
            .register(THIRD_PARTY_DIMENSION, "qualified", qualified);
        registry
    }
}

impl fmt::Debug for MatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self
            .matchers
            .iter()
            .flat_map(|(condition_type, matchers)| {
                matchers.keys().map(move |name| format!("{condition_type}/{name}"))
            })
            .collect();
        names.sort();
        f.debug_struct("MatcherRegistry").field("matchers", &names).finish()
    }
}

fn is_safe_number(n: f64) -> bool {
    n.is_finite() && n.abs() <= MAX_SAFE_NUMBER
}

fn unexpected_condition_value(condition: &Condition) {
    log::warn!(target: "decision_engine",
               attribute = condition.name.as_str(),
               match_type = condition.match_name();
               "audience condition has an unsupported condition value: {}", condition.value);
}

/// The user's value for the condition attribute, or `None` if it is missing or null.
fn user_value<'a>(condition: &Condition, user: &'a UserContext) -> Option<&'a AttributeValue> {
    match user.attribute(&condition.name) {
        None => {
            log::debug!(target: "decision_engine",
                        attribute = condition.name.as_str();
                        "audience condition evaluated to UNKNOWN because no value was passed for the attribute");
            None
        }
        Some(AttributeValue::Null) => {
            log::debug!(target: "decision_engine",
                        attribute = condition.name.as_str();
                        "audience condition evaluated to UNKNOWN because a null value was passed for the attribute");
            None
        }
        Some(value) => Some(value),
    }
}

fn mismatched_type(condition: &Condition, value: &AttributeValue) {
    log::warn!(target: "decision_engine",
               attribute = condition.name.as_str(),
               match_type = condition.match_name();
               "audience condition evaluated to UNKNOWN because a value of unexpected type was passed: {value:?}");
}

fn user_number(condition: &Condition, user: &UserContext) -> Option<f64> {
    match user_value(condition, user)? {
        AttributeValue::Number(n) if is_safe_number(*n) => Some(*n),
        other => {
            mismatched_type(condition, other);
            None
        }
    }
}

fn user_string<'a>(condition: &Condition, user: &'a UserContext) -> Option<&'a str> {
    match user_value(condition, user)? {
        AttributeValue::String(s) => Some(s),
        other => {
            mismatched_type(condition, other);
            None
        }
    }
}

fn condition_number(condition: &Condition) -> Option<f64> {
    let n = condition.value.as_f64().filter(|n| is_safe_number(*n));
    if n.is_none() {
        unexpected_condition_value(condition);
    }
    n
}

fn condition_string(condition: &Condition) -> Option<&str> {
    let s = condition.value.as_str();
    if s.is_none() {
        unexpected_condition_value(condition);
    }
    s
}

fn exact(condition: &Condition, user: &UserContext) -> Option<bool> {
    match &condition.value {
        Value::String(expected) => user_string(condition, user).map(|actual| actual == expected),
        Value::Bool(expected) => match user_value(condition, user)? {
            AttributeValue::Boolean(actual) => Some(actual == expected),
            other => {
                mismatched_type(condition, other);
                None
            }
        },
        Value::Number(_) => {
            let expected = condition_number(condition)?;
            user_number(condition, user).map(|actual| actual == expected)
        }
        _ => {
            unexpected_condition_value(condition);
            None
        }
    }
}

fn exists(condition: &Condition, user: &UserContext) -> Option<bool> {
    Some(matches!(user.attribute(&condition.name), Some(value) if !value.is_null()))
}

fn substring(condition: &Condition, user: &UserContext) -> Option<bool> {
    let expected = condition_string(condition)?;
    user_string(condition, user).map(|actual| actual.contains(expected))
}

fn numeric(
    compare: fn(f64, f64) -> bool,
) -> impl Fn(&Condition, &UserContext) -> Option<bool> + Send + Sync {
    move |condition, user| {
        let target = condition_number(condition)?;
        let actual = user_number(condition, user)?;
        Some(compare(actual, target))
    }
}

fn semver(
    accept: fn(Ordering) -> bool,
) -> impl Fn(&Condition, &UserContext) -> Option<bool> + Send + Sync {
    move |condition, user| {
        let target = condition_string(condition)?;
        let actual = user_string(condition, user)?;
        let ordering = compare_versions(target, actual);
        if ordering.is_none() {
            log::warn!(target: "decision_engine",
                       attribute = condition.name.as_str();
                       "invalid semantic version: target {target:?}, user {actual:?}");
        }
        ordering.map(accept)
    }
}

fn qualified(condition: &Condition, user: &UserContext) -> Option<bool> {
    let segment = condition_string(condition)?;
    Some(user.is_qualified_for(segment))
}
