use std::collections::{HashMap, HashSet};

use crate::attributes::{AttributeValue, Attributes, BUCKETING_ID_ATTRIBUTE};
use crate::decision::DecisionReasons;

/// Key of a forced decision: a whole flag, or a single rule of a flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForcedDecisionKey {
    pub flag_key: String,
    pub rule_key: Option<String>,
}

impl ForcedDecisionKey {
    /// Forced decision applying to the flag as a whole.
    pub fn flag(flag_key: impl Into<String>) -> ForcedDecisionKey {
        ForcedDecisionKey {
            flag_key: flag_key.into(),
            rule_key: None,
        }
    }

    /// Forced decision applying to one experiment or delivery rule of the flag.
    pub fn rule(flag_key: impl Into<String>, rule_key: impl Into<String>) -> ForcedDecisionKey {
        ForcedDecisionKey {
            flag_key: flag_key.into(),
            rule_key: Some(rule_key.into()),
        }
    }
}

/// The user being decided for: an id, attributes, qualified segments, and forced decisions
/// (variation keys) set through the API.
///
/// Decision calls only read the context; forced decisions are set beforehand.
#[derive(Debug, Clone)]
pub struct UserContext {
    user_id: String,
    attributes: Attributes,
    qualified_segments: Option<HashSet<String>>,
    forced_decisions: HashMap<ForcedDecisionKey, String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, attributes: Attributes) -> UserContext {
        UserContext {
            user_id: user_id.into(),
            attributes,
            qualified_segments: None,
            forced_decisions: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn set_qualified_segments(&mut self, segments: Option<HashSet<String>>) {
        self.qualified_segments = segments;
    }

    pub fn qualified_segments(&self) -> Option<&HashSet<String>> {
        self.qualified_segments.as_ref()
    }

    pub fn is_qualified_for(&self, segment: &str) -> bool {
        self.qualified_segments
            .as_ref()
            .is_some_and(|segments| segments.contains(segment))
    }

    /// Id used for bucketing: the `$opt_bucketing_id` attribute when it is a string, the user id
    /// otherwise.
    pub fn bucketing_id(&self, reasons: &mut DecisionReasons) -> &str {
        match self.attributes.get(BUCKETING_ID_ATTRIBUTE) {
            Some(AttributeValue::String(bucketing_id)) => {
                reasons.push(format!("BucketingId is valid: \"{bucketing_id}\""));
                bucketing_id
            }
            Some(_) => {
                log::warn!(target: "decision_engine",
                           user_id = self.user_id.as_str();
                           "BucketingID attribute is not a string. Defaulted to userId");
                reasons.push("BucketingID attribute is not a string. Defaulted to userId");
                &self.user_id
            }
            None => &self.user_id,
        }
    }

    pub fn set_forced_decision(&mut self, key: ForcedDecisionKey, variation_key: impl Into<String>) {
        self.forced_decisions.insert(key, variation_key.into());
    }

    pub fn forced_decision(&self, key: &ForcedDecisionKey) -> Option<&str> {
        self.forced_decisions.get(key).map(String::as_str)
    }

    /// Returns `true` if a forced decision was removed.
    pub fn remove_forced_decision(&mut self, key: &ForcedDecisionKey) -> bool {
        self.forced_decisions.remove(key).is_some()
    }

    pub fn remove_all_forced_decisions(&mut self) {
        self.forced_decisions.clear();
    }
}
