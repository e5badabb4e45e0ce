use std::collections::HashMap;
use std::sync::Arc;

use crate::audience::Audience;
use crate::Result;

use super::models::{
    Attribute, DatafileWire, Experiment, FeatureFlag, Group, Variation,
};

/// A rollout with its delivery rules in evaluation order. The last rule is the "everyone else"
/// rule.
#[derive(Debug, Clone)]
pub struct Rollout {
    pub id: String,
    pub rules: Vec<Arc<Experiment>>,
}

/// Immutable, indexed snapshot of a project configuration.
///
/// Built once from a datafile and never mutated afterwards; a new datafile produces a new
/// snapshot that replaces the previous one wholesale (see
/// [`ConfigurationStore`](super::ConfigurationStore)).
#[derive(Debug, Default)]
pub struct ProjectConfig {
    pub project_id: String,
    pub revision: String,

    attributes_by_id: HashMap<String, Attribute>,
    audiences: HashMap<String, Audience>,
    groups: HashMap<String, Group>,
    experiments: HashMap<String, Arc<Experiment>>,
    experiment_ids_by_key: HashMap<String, String>,
    feature_flags: HashMap<String, FeatureFlag>,
    rollouts: HashMap<String, Rollout>,
    /// Holdouts applying to every flag except the excluded ones.
    global_holdouts: Vec<(Arc<Experiment>, Vec<String>)>,
    /// Holdouts explicitly including a flag, by flag id.
    included_holdouts: HashMap<String, Vec<Arc<Experiment>>>,
    /// Variations reachable from any rule of a flag, by flag key then variation key.
    flag_variations: HashMap<String, HashMap<String, Variation>>,
}

impl ProjectConfig {
    /// Parse and index a datafile.
    pub fn from_json(datafile: impl AsRef<[u8]>) -> Result<ProjectConfig> {
        let wire: DatafileWire = serde_json::from_slice(datafile.as_ref())?;
        Ok(ProjectConfig::from_wire(wire))
    }

    /// Index an already parsed datafile.
    pub fn from_wire(wire: DatafileWire) -> ProjectConfig {
        let mut config = ProjectConfig {
            project_id: wire.project_id,
            revision: wire.revision,
            ..ProjectConfig::default()
        };

        config.attributes_by_id = wire
            .attributes
            .into_iter()
            .map(|it| (it.id.clone(), it))
            .collect();

        // Typed audiences supersede legacy audiences carrying the same id.
        for audience in wire.audiences.into_iter().chain(wire.typed_audiences) {
            config.audiences.insert(audience.id.clone(), audience);
        }

        for experiment in wire.experiments {
            config.insert_experiment(experiment.compile());
        }

        for group in wire.groups {
            for mut experiment in group.experiments {
                experiment.group_id = Some(group.id.clone());
                config.insert_experiment(experiment.compile());
            }
            config.groups.insert(
                group.id.clone(),
                Group {
                    id: group.id,
                    policy: group.policy,
                    traffic_allocation: group.traffic_allocation,
                },
            );
        }

        for rollout in wire.rollouts {
            let rules = rollout
                .experiments
                .into_iter()
                .map(|rule| Arc::new(rule.compile()))
                .collect();
            config.rollouts.insert(
                rollout.id.clone(),
                Rollout {
                    id: rollout.id,
                    rules,
                },
            );
        }

        for holdout in wire.holdouts {
            let experiment = Arc::new(holdout.experiment.compile());
            if holdout.included_flags.is_empty() {
                config
                    .global_holdouts
                    .push((experiment, holdout.excluded_flags));
            } else {
                for flag_id in holdout.included_flags {
                    config
                        .included_holdouts
                        .entry(flag_id)
                        .or_default()
                        .push(experiment.clone());
                }
            }
        }

        for flag in wire.feature_flags {
            let variations = config.collect_flag_variations(&flag);
            config.flag_variations.insert(flag.key.clone(), variations);
            config.feature_flags.insert(flag.key.clone(), flag);
        }

        config
    }

    fn insert_experiment(&mut self, experiment: Experiment) {
        self.experiment_ids_by_key
            .insert(experiment.key.clone(), experiment.id.clone());
        self.experiments
            .insert(experiment.id.clone(), Arc::new(experiment));
    }

    fn collect_flag_variations(&self, flag: &FeatureFlag) -> HashMap<String, Variation> {
        let experiment_rules = flag
            .experiment_ids
            .iter()
            .filter_map(|id| self.experiments.get(id));
        let delivery_rules = self
            .rollouts
            .get(&flag.rollout_id)
            .into_iter()
            .flat_map(|rollout| rollout.rules.iter());

        let mut variations = HashMap::new();
        for rule in experiment_rules.chain(delivery_rules) {
            for variation in &rule.variations {
                variations
                    .entry(variation.key.clone())
                    .or_insert_with(|| variation.clone());
            }
        }
        variations
    }

    pub fn experiment_by_id(&self, experiment_id: &str) -> Option<&Arc<Experiment>> {
        self.experiments.get(experiment_id)
    }

    pub fn experiment_by_key(&self, experiment_key: &str) -> Option<&Arc<Experiment>> {
        self.experiment_ids_by_key
            .get(experiment_key)
            .and_then(|id| self.experiments.get(id))
    }

    pub fn groups(&self) -> &HashMap<String, Group> {
        &self.groups
    }

    pub fn audiences(&self) -> &HashMap<String, Audience> {
        &self.audiences
    }

    pub fn attribute_by_id(&self, attribute_id: &str) -> Option<&Attribute> {
        self.attributes_by_id.get(attribute_id)
    }

    pub fn feature_flag(&self, flag_key: &str) -> Option<&FeatureFlag> {
        self.feature_flags.get(flag_key)
    }

    /// All feature flags, in no particular order.
    pub fn feature_flags(&self) -> impl Iterator<Item = &FeatureFlag> {
        self.feature_flags.values()
    }

    pub fn rollout(&self, rollout_id: &str) -> Option<&Rollout> {
        self.rollouts.get(rollout_id)
    }

    /// Look up a variation by key among all rules of `flag_key`.
    pub fn flag_variation_by_key(&self, flag_key: &str, variation_key: &str) -> Option<&Variation> {
        self.flag_variations.get(flag_key)?.get(variation_key)
    }

    /// Holdouts scoped to `flag`, in evaluation order: global holdouts not excluding the flag,
    /// followed by holdouts explicitly including it.
    pub fn holdouts_for_flag(&self, flag: &FeatureFlag) -> Vec<Arc<Experiment>> {
        let global = self
            .global_holdouts
            .iter()
            .filter(|(_, excluded)| !excluded.contains(&flag.id))
            .map(|(holdout, _)| holdout.clone());
        let included = self
            .included_holdouts
            .get(&flag.id)
            .into_iter()
            .flatten()
            .cloned();
        global.chain(included).collect()
    }

    /// Returns `true` if the configuration declares any holdout.
    pub fn has_holdouts(&self) -> bool {
        !self.global_holdouts.is_empty() || !self.included_holdouts.is_empty()
    }
}
