//! Range-based traffic allocation.
use std::collections::HashMap;

use crate::{
    config::{Experiment, Group, GroupPolicy, TrafficAllocation},
    decision::DecisionReasons,
    Error, Result,
};

use super::bucket_value;

/// Inputs of a single bucketing call.
#[derive(Debug, Clone, Copy)]
pub struct BucketParams<'a> {
    pub experiment_id: &'a str,
    pub experiment_key: &'a str,
    /// Group the experiment belongs to, if any.
    pub group_id: Option<&'a str>,
    pub user_id: &'a str,
    /// Id hashed for bucketing. Usually equal to `user_id`.
    pub bucketing_id: &'a str,
    /// The experiment's own traffic allocation, in stored order.
    pub traffic_allocation: &'a [TrafficAllocation],
    pub groups: &'a HashMap<String, Group>,
    /// When set, the resulting entity id must be a variation of this experiment.
    pub validate_against: Option<&'a Experiment>,
}

impl<'a> BucketParams<'a> {
    /// Parameters bucketing `user_id` into `experiment`'s variations.
    pub fn for_experiment(
        experiment: &'a Experiment,
        user_id: &'a str,
        bucketing_id: &'a str,
        groups: &'a HashMap<String, Group>,
    ) -> BucketParams<'a> {
        BucketParams {
            experiment_id: &experiment.id,
            experiment_key: &experiment.key,
            group_id: experiment.group_id.as_deref(),
            user_id,
            bucketing_id,
            traffic_allocation: &experiment.traffic_allocation,
            groups,
            validate_against: Some(experiment),
        }
    }
}

/// Bucket a user into an entity of `params.traffic_allocation`.
///
/// Returns `Ok(None)` when the user falls outside every range, lands in a sibling experiment
/// of a random group, or is assigned an id that no longer resolves to a variation.
pub fn bucket<'a>(
    params: &BucketParams<'a>,
    reasons: &mut DecisionReasons,
) -> Result<Option<&'a str>> {
    if let Some(group_id) = params.group_id {
        let group = params
            .groups
            .get(group_id)
            .ok_or_else(|| Error::InvalidGroupId {
                group_id: group_id.to_owned(),
            })?;

        if group.policy == GroupPolicy::Random {
            let bucketing_key = format!("{}{}", params.bucketing_id, group.id);
            let value = bucket_value(&bucketing_key)?;
            log::debug!(target: "decision_engine",
                        user_id = params.user_id,
                        group_id = group.id.as_str(),
                        bucket_value = value;
                        "assigned group bucket value");

            let Some(experiment_id) = find_bucket(value, &group.traffic_allocation) else {
                reasons.push(format!(
                    "User {} is not in any experiment of group {}.",
                    params.user_id, group.id
                ));
                return Ok(None);
            };

            if experiment_id != params.experiment_id {
                reasons.push(format!(
                    "User {} is not in experiment {} of group {}.",
                    params.user_id, params.experiment_key, group.id
                ));
                return Ok(None);
            }

            reasons.push(format!(
                "User {} is in experiment {} of group {}.",
                params.user_id, params.experiment_key, group.id
            ));
        }
    }

    let bucketing_key = format!("{}{}", params.bucketing_id, params.experiment_id);
    let value = bucket_value(&bucketing_key)?;
    reasons.push(format!(
        "Assigned bucket {} to user with bucketing ID {}.",
        value, params.bucketing_id
    ));

    let Some(entity_id) = find_bucket(value, params.traffic_allocation) else {
        return Ok(None);
    };

    if let Some(experiment) = params.validate_against {
        if experiment.variation_by_id(entity_id).is_none() {
            log::warn!(target: "decision_engine",
                       experiment_key = params.experiment_key,
                       entity_id;
                       "bucketed into a variation that is not in the configuration");
            reasons.push(format!(
                "Bucketed into an invalid variation id {} for experiment {}.",
                entity_id, params.experiment_key
            ));
            return Ok(None);
        }
    }

    Ok(Some(entity_id))
}

/// Return the entity of the first range whose (exclusive) end is above `bucket_value`.
pub fn find_bucket(bucket_value: u32, traffic_allocation: &[TrafficAllocation]) -> Option<&str> {
    traffic_allocation
        .iter()
        .find(|range| bucket_value < range.end_of_range)
        .map(|range| range.entity_id.as_str())
        .filter(|entity_id| !entity_id.is_empty())
}
