use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ConfigurationStore, FeatureFlag, ProjectConfig, Variation};
use crate::decision::{
    DecideOptions, DecisionReasons, DecisionResponse, DecisionService, DecisionServiceConfig,
    ExperimentDecision, FeatureDecision,
};
use crate::{Error, Result, UserContext};

pub struct DeciderConfig {
    pub configuration_store: Arc<ConfigurationStore>,
    pub decision_service: DecisionServiceConfig,
}

/// Decider resolves keys against the currently active configuration and forwards to a
/// [`DecisionService`].
///
/// Every call takes one configuration snapshot and uses it throughout, so a configuration
/// swapped in concurrently never mixes with the one a decision started with.
pub struct Decider {
    configuration_store: Arc<ConfigurationStore>,
    decision_service: DecisionService,
}

impl Decider {
    pub fn new(config: DeciderConfig) -> Decider {
        Decider {
            configuration_store: config.configuration_store,
            decision_service: DecisionService::new(config.decision_service),
        }
    }

    pub fn decision_service(&self) -> &DecisionService {
        &self.decision_service
    }

    /// Decide flag `flag_key`. Unknown flags and a missing configuration produce a decision
    /// without variation.
    pub fn decide(&self, flag_key: &str, user: &UserContext, options: &DecideOptions) -> FeatureDecision {
        self.decide_for_keys(&[flag_key], user, options)
            .remove(flag_key)
            .unwrap_or_else(|| FeatureDecision::none(DecisionReasons::new()))
    }

    pub async fn decide_async(
        &self,
        flag_key: &str,
        user: &UserContext,
        options: &DecideOptions,
    ) -> FeatureDecision {
        self.decide_for_keys_async(&[flag_key], user, options)
            .await
            .remove(flag_key)
            .unwrap_or_else(|| FeatureDecision::none(DecisionReasons::new()))
    }

    /// Decide several flags sharing one user profile lookup and save.
    pub fn decide_for_keys(
        &self,
        flag_keys: &[&str],
        user: &UserContext,
        options: &DecideOptions,
    ) -> HashMap<String, FeatureDecision> {
        let Some(config) = self.get_configuration(user) else {
            return undecided(flag_keys, "configuration has not been set");
        };
        let (flags, mut decisions) = resolve_flags(&config, flag_keys);
        let decided = self
            .decision_service
            .get_variations_for_feature_list(&config, &flags, user, options);
        collect_decisions(&mut decisions, &flags, decided);
        decisions
    }

    pub async fn decide_for_keys_async(
        &self,
        flag_keys: &[&str],
        user: &UserContext,
        options: &DecideOptions,
    ) -> HashMap<String, FeatureDecision> {
        let Some(config) = self.get_configuration(user) else {
            return undecided(flag_keys, "configuration has not been set");
        };
        let (flags, mut decisions) = resolve_flags(&config, flag_keys);
        let decided = self
            .decision_service
            .get_variations_for_feature_list_async(&config, &flags, user, options)
            .await;
        collect_decisions(&mut decisions, &flags, decided);
        decisions
    }

    /// Decide every flag of the active configuration.
    pub fn decide_all(
        &self,
        user: &UserContext,
        options: &DecideOptions,
    ) -> HashMap<String, FeatureDecision> {
        let Some(config) = self.get_configuration(user) else {
            return HashMap::new();
        };
        let keys: Vec<&str> = config.feature_flags().map(|it| it.key.as_str()).collect();
        self.decide_for_keys(&keys, user, options)
    }

    /// Decide experiment `experiment_key`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidExperimentKey`] if the experiment doesn't exist.
    /// - Errors of [`DecisionService::get_variation`].
    pub fn get_variation(
        &self,
        experiment_key: &str,
        user: &UserContext,
        options: &DecideOptions,
    ) -> Result<DecisionResponse<Option<ExperimentDecision>>> {
        let Some(config) = self.get_configuration(user) else {
            return Ok(DecisionResponse::new(None, not_configured()));
        };
        let experiment = config
            .experiment_by_key(experiment_key)
            .ok_or_else(|| Error::InvalidExperimentKey {
                experiment_key: experiment_key.to_owned(),
            })?;
        self.decision_service
            .get_variation(&config, experiment, user, options)
    }

    pub async fn get_variation_async(
        &self,
        experiment_key: &str,
        user: &UserContext,
        options: &DecideOptions,
    ) -> Result<DecisionResponse<Option<ExperimentDecision>>> {
        let Some(config) = self.get_configuration(user) else {
            return Ok(DecisionResponse::new(None, not_configured()));
        };
        let experiment = config
            .experiment_by_key(experiment_key)
            .ok_or_else(|| Error::InvalidExperimentKey {
                experiment_key: experiment_key.to_owned(),
            })?;
        self.decision_service
            .get_variation_async(&config, experiment, user, options)
            .await
    }

    /// See [`DecisionService::set_forced_variation`].
    pub fn set_forced_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<()> {
        let config = self.require_configuration()?;
        self.decision_service
            .set_forced_variation(&config, experiment_key, user_id, variation_key)
    }

    pub fn get_forced_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
    ) -> DecisionResponse<Option<Variation>> {
        match self.configuration_store.get_configuration() {
            Some(config) => self
                .decision_service
                .get_forced_variation(&config, experiment_key, user_id),
            None => DecisionResponse::new(None, not_configured()),
        }
    }

    pub fn remove_forced_variation(&self, experiment_key: &str, user_id: &str) -> Result<bool> {
        let config = self.require_configuration()?;
        self.decision_service
            .remove_forced_variation(&config, experiment_key, user_id)
    }

    fn get_configuration(&self, user: &UserContext) -> Option<Arc<ProjectConfig>> {
        let config = self.configuration_store.get_configuration();
        if config.is_none() {
            log::warn!(target: "decision_engine",
                       user_id = user.user_id();
                       "deciding before a project configuration has been set");
        }
        config
    }

    fn require_configuration(&self) -> Result<Arc<ProjectConfig>> {
        self.configuration_store
            .get_configuration()
            .ok_or(Error::ConfigurationMissing)
    }
}

fn not_configured() -> DecisionReasons {
    let mut reasons = DecisionReasons::new();
    reasons.push("No project configuration has been set.");
    reasons
}

fn undecided(flag_keys: &[&str], why: &str) -> HashMap<String, FeatureDecision> {
    flag_keys
        .iter()
        .map(|key| {
            let mut reasons = DecisionReasons::new();
            reasons.push(format!("Flag \"{key}\" was not decided: {why}."));
            ((*key).to_owned(), FeatureDecision::none(reasons))
        })
        .collect()
}

/// Split keys into known flags and ready-made decisions for unknown ones.
fn resolve_flags<'a>(
    config: &'a ProjectConfig,
    flag_keys: &[&str],
) -> (Vec<&'a FeatureFlag>, HashMap<String, FeatureDecision>) {
    let mut flags = Vec::with_capacity(flag_keys.len());
    let mut unknown = Vec::new();
    for key in flag_keys {
        match config.feature_flag(key) {
            Some(flag) => flags.push(flag),
            None => {
                log::warn!(target: "decision_engine", flag_key = *key; "no flag was found for key");
                unknown.push(*key);
            }
        }
    }
    (flags, undecided(&unknown, "no flag was found for the key"))
}

fn collect_decisions(
    decisions: &mut HashMap<String, FeatureDecision>,
    flags: &[&FeatureFlag],
    decided: Vec<FeatureDecision>,
) {
    for (flag, decision) in flags.iter().zip(decided) {
        decisions.insert(flag.key.clone(), decision);
    }
}
