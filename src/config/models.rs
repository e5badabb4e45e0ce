use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::audience::{Audience, ConditionTree};

/// One cumulative range of a traffic allocation table.
///
/// A user whose bucket value is strictly below `end_of_range` (and not claimed by an earlier
/// entry) is assigned `entity_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficAllocation {
    pub entity_id: String,
    pub end_of_range: u32,
}

/// Lifecycle status of an experiment, holdout or delivery rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentStatus {
    Running,
    Launched,
    Paused,
    #[serde(rename = "Not started")]
    NotStarted,
    Archived,
    #[serde(other)]
    Unknown,
}

impl ExperimentStatus {
    /// Only running or launched entities produce decisions.
    pub fn is_active(self) -> bool {
        matches!(self, ExperimentStatus::Running | ExperimentStatus::Launched)
    }
}

impl Default for ExperimentStatus {
    fn default() -> Self {
        ExperimentStatus::NotStarted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableUsage {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub feature_enabled: bool,
    #[serde(default)]
    pub variables: Vec<VariableUsage>,
}

impl Variation {
    /// Value of variable `variable_id` as overridden by this variation.
    pub fn variable_value(&self, variable_id: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|it| it.id == variable_id)
            .map(|it| it.value.as_str())
    }
}

/// Contextual multi-armed bandit settings of an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cmab {
    /// Ids of the attributes the remote model consumes.
    pub attribute_ids: Vec<String>,
    /// Share of traffic (out of 10000) participating in the bandit.
    pub traffic_allocation: u32,
}

/// An experiment, a delivery rule of a rollout, or a holdout.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub status: ExperimentStatus,
    #[serde(default)]
    pub layer_id: String,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    #[serde(default)]
    pub audience_conditions: Option<ConditionTree>,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    /// Datafile whitelist: user id to variation key.
    #[serde(default)]
    pub forced_variations: HashMap<String, String>,
    #[serde(default)]
    pub cmab: Option<Cmab>,
    /// Set for members of a mutually exclusive or overlapping group.
    #[serde(default)]
    pub group_id: Option<String>,

    #[serde(skip)]
    variation_ids: HashMap<String, usize>,
    #[serde(skip)]
    variation_keys: HashMap<String, usize>,
}

impl Experiment {
    /// Build variation indexes. Must be called once after deserialization.
    pub(crate) fn compile(mut self) -> Experiment {
        self.variation_ids = self
            .variations
            .iter()
            .enumerate()
            .map(|(i, v)| (v.id.clone(), i))
            .collect();
        self.variation_keys = self
            .variations
            .iter()
            .enumerate()
            .map(|(i, v)| (v.key.clone(), i))
            .collect();
        self
    }

    pub fn variation_by_id(&self, variation_id: &str) -> Option<&Variation> {
        self.variation_ids
            .get(variation_id)
            .map(|&i| &self.variations[i])
    }

    pub fn variation_by_key(&self, variation_key: &str) -> Option<&Variation> {
        self.variation_keys
            .get(variation_key)
            .map(|&i| &self.variations[i])
    }

    /// Audience conditions to evaluate, or `None` if the experiment targets everyone.
    ///
    /// `audienceConditions` takes precedence; otherwise `audienceIds` are OR-ed together.
    pub fn targeting(&self) -> Option<ConditionTree> {
        match &self.audience_conditions {
            Some(tree) if !tree.is_empty() => Some(tree.clone()),
            Some(_) => None,
            None if self.audience_ids.is_empty() => None,
            None => Some(ConditionTree::any_of_audiences(&self.audience_ids)),
        }
    }
}

/// Traffic policy of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupPolicy {
    /// Mutually exclusive: a user is bucketed into at most one member experiment.
    Random,
    /// Members carry pre-partitioned ranges; no group-level bucketing.
    Overlapping,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupWire {
    pub id: String,
    pub policy: GroupPolicy,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

/// A group as seen by the bucketer: member experiments are indexed separately.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: String,
    pub policy: GroupPolicy,
    pub traffic_allocation: Vec<TrafficAllocation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldoutWire {
    #[serde(flatten)]
    pub experiment: Experiment,
    /// Flag ids the holdout is limited to. Empty means a global holdout.
    #[serde(default)]
    pub included_flags: Vec<String>,
    /// Flag ids a global holdout does not apply to.
    #[serde(default)]
    pub excluded_flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub id: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVariable {
    pub id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub variable_type: String,
    pub default_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub id: String,
    pub key: String,
    /// Empty when the flag has no rollout.
    #[serde(default)]
    pub rollout_id: String,
    /// Experiment rule ids, evaluated in order.
    #[serde(default)]
    pub experiment_ids: Vec<String>,
    #[serde(default)]
    pub variables: Vec<FeatureVariable>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutWire {
    pub id: String,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

/// Datafile as published by the configuration backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatafileWire {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub audiences: Vec<Audience>,
    #[serde(default)]
    pub typed_audiences: Vec<Audience>,
    #[serde(default)]
    pub groups: Vec<GroupWire>,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    #[serde(default)]
    pub feature_flags: Vec<FeatureFlag>,
    #[serde(default)]
    pub rollouts: Vec<RolloutWire>,
    #[serde(default)]
    pub holdouts: Vec<HoldoutWire>,
}
