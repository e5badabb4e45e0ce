//! The decision orchestrator.
//!
//! Per experiment, the first step that produces an answer wins:
//!
//! 1. the experiment is not running: no variation;
//! 2. a variation forced through [`DecisionService::set_forced_variation`];
//! 3. the datafile whitelist (`forcedVariations`);
//! 4. a sticky decision from the `$opt_experiment_bucket_map` attribute or the profile store;
//! 5. audience conditions, where a mismatch means no variation;
//! 6. CMAB (gated by its own traffic allocation) or ordinary bucketing.
//!
//! Per feature flag: forced decisions, then holdouts, then experiment rules in order, then
//! rollout delivery rules.
use std::sync::Arc;

use crate::audience::{AudienceEvaluator, MatcherRegistry};
use crate::bucketing::{bucket, BucketParams};
use crate::cmab::CmabService;
use crate::config::{Cmab, Experiment, FeatureFlag, ProjectConfig, TrafficAllocation, Variation};
use crate::user_context::ForcedDecisionKey;
use crate::{Error, Result, UserContext};

use super::executor::run_immediate;
use super::forced_variations::ForcedVariations;
use super::user_profile::{
    AsyncUserProfileService, UserProfileService, UserProfileStore, UserProfileTracker,
};
use super::{
    DecideOption, DecideOptions, DecisionReasons, DecisionResponse, DecisionSource,
    ExecutionMode, ExperimentDecision, FeatureDecision,
};

/// Entity id of the single range gating CMAB participation.
const CMAB_ENTITY_ID: &str = "$";

/// Configuration for [`DecisionService`].
#[derive(Debug, Clone, Default)]
pub struct DecisionServiceConfig {
    /// Sticky bucketing store. Defaults to none.
    pub user_profile_store: Option<UserProfileStore>,
    /// Serves CMAB rules. Without it, CMAB rules are skipped.
    pub cmab_service: Option<Arc<CmabService>>,
    /// Matchers available to audience conditions. Defaults to the built-in matchers.
    pub matchers: MatcherRegistry,
}

impl DecisionServiceConfig {
    pub fn new() -> DecisionServiceConfig {
        DecisionServiceConfig::default()
    }

    /// Use a blocking profile store. Replaces any previously configured store.
    pub fn with_user_profile_service(
        mut self,
        service: Arc<dyn UserProfileService>,
    ) -> DecisionServiceConfig {
        self.user_profile_store = Some(UserProfileStore::Blocking(service));
        self
    }

    /// Use an async profile store. Replaces any previously configured store.
    ///
    /// Immediate decision calls ignore async stores.
    pub fn with_async_user_profile_service(
        mut self,
        service: Arc<dyn AsyncUserProfileService>,
    ) -> DecisionServiceConfig {
        self.user_profile_store = Some(UserProfileStore::Async(service));
        self
    }

    pub fn with_cmab_service(mut self, cmab_service: Arc<CmabService>) -> DecisionServiceConfig {
        self.cmab_service = Some(cmab_service);
        self
    }

    pub fn with_matchers(mut self, matchers: MatcherRegistry) -> DecisionServiceConfig {
        self.matchers = matchers;
        self
    }
}

/// Decides experiments and feature flags for users.
///
/// Immediate methods (`get_variation*`) complete without waiting and skip CMAB rules and async
/// profile stores. Their `*_async` counterparts suspend at those points instead.
#[derive(Debug)]
pub struct DecisionService {
    evaluator: AudienceEvaluator,
    user_profile_store: Option<UserProfileStore>,
    cmab_service: Option<Arc<CmabService>>,
    forced_variations: ForcedVariations,
}

impl DecisionService {
    pub fn new(config: DecisionServiceConfig) -> DecisionService {
        DecisionService {
            evaluator: AudienceEvaluator::new(config.matchers),
            user_profile_store: config.user_profile_store,
            cmab_service: config.cmab_service,
            forced_variations: ForcedVariations::default(),
        }
    }

    /// Decide a single experiment.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidGroupId`] if the experiment references a missing group.
    /// - [`Error::InvalidBucketingInput`] if the bucketing key cannot be hashed.
    pub fn get_variation(
        &self,
        config: &ProjectConfig,
        experiment: &Experiment,
        user: &UserContext,
        options: &DecideOptions,
    ) -> Result<DecisionResponse<Option<ExperimentDecision>>> {
        run_immediate(
            self.variation(ExecutionMode::Immediate, config, experiment, user, options),
            || Ok(DecisionResponse::new(None, DecisionReasons::new())),
        )
    }

    /// Suspending version of [`DecisionService::get_variation`]. Serves CMAB experiments.
    pub async fn get_variation_async(
        &self,
        config: &ProjectConfig,
        experiment: &Experiment,
        user: &UserContext,
        options: &DecideOptions,
    ) -> Result<DecisionResponse<Option<ExperimentDecision>>> {
        self.variation(ExecutionMode::Suspending, config, experiment, user, options)
            .await
    }

    /// Decide one feature flag. Never fails: problems are recorded as reasons.
    pub fn get_variation_for_feature(
        &self,
        config: &ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
    ) -> FeatureDecision {
        let mut decisions = self.get_variations_for_feature_list(config, &[flag], user, options);
        decisions
            .pop()
            .unwrap_or_else(|| FeatureDecision::none(DecisionReasons::new()))
    }

    pub async fn get_variation_for_feature_async(
        &self,
        config: &ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
    ) -> FeatureDecision {
        let mut decisions = self
            .get_variations_for_feature_list_async(config, &[flag], user, options)
            .await;
        decisions
            .pop()
            .unwrap_or_else(|| FeatureDecision::none(DecisionReasons::new()))
    }

    /// Decide several flags, in order.
    ///
    /// The user profile is looked up once before the first flag and saved at most once after
    /// the last.
    pub fn get_variations_for_feature_list(
        &self,
        config: &ProjectConfig,
        flags: &[&FeatureFlag],
        user: &UserContext,
        options: &DecideOptions,
    ) -> Vec<FeatureDecision> {
        run_immediate(
            self.feature_list(ExecutionMode::Immediate, config, flags, user, options),
            || {
                flags
                    .iter()
                    .map(|_| FeatureDecision::none(DecisionReasons::new()))
                    .collect()
            },
        )
    }

    pub async fn get_variations_for_feature_list_async(
        &self,
        config: &ProjectConfig,
        flags: &[&FeatureFlag],
        user: &UserContext,
        options: &DecideOptions,
    ) -> Vec<FeatureDecision> {
        self.feature_list(ExecutionMode::Suspending, config, flags, user, options)
            .await
    }

    /// Force `user_id` into `variation_key` of `experiment_key`, or clear the forced variation
    /// when `variation_key` is `None`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidExperimentKey`] if the experiment doesn't exist.
    /// - [`Error::InvalidVariationKey`] if the variation doesn't belong to the experiment.
    pub fn set_forced_variation(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<()> {
        let experiment = experiment_by_key(config, experiment_key)?;
        let Some(variation_key) = variation_key else {
            self.forced_variations.remove(user_id, &experiment.id);
            return Ok(());
        };
        let variation = experiment.variation_by_key(variation_key).ok_or_else(|| {
            Error::InvalidVariationKey {
                experiment_key: experiment_key.to_owned(),
                variation_key: variation_key.to_owned(),
            }
        })?;

        self.forced_variations
            .set(user_id, &experiment.id, &variation.id);
        log::info!(target: "decision_engine",
                   experiment_key,
                   user_id,
                   variation_key;
                   "set forced variation");
        Ok(())
    }

    pub fn get_forced_variation(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
    ) -> DecisionResponse<Option<Variation>> {
        let mut reasons = DecisionReasons::new();
        let variation = match config.experiment_by_key(experiment_key) {
            Some(experiment) => self.forced_variation(experiment, user_id, &mut reasons),
            None => {
                reasons.push(format!("Experiment key {experiment_key} is not in datafile."));
                None
            }
        };
        DecisionResponse::new(variation, reasons)
    }

    /// Returns `true` if a forced variation was removed.
    pub fn remove_forced_variation(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
    ) -> Result<bool> {
        let experiment = experiment_by_key(config, experiment_key)?;
        Ok(self.forced_variations.remove(user_id, &experiment.id))
    }

    async fn variation(
        &self,
        mode: ExecutionMode,
        config: &ProjectConfig,
        experiment: &Experiment,
        user: &UserContext,
        options: &DecideOptions,
    ) -> Result<DecisionResponse<Option<ExperimentDecision>>> {
        let mut reasons = DecisionReasons::new();
        let mut tracker = self.load_profile(mode, user, options, &mut reasons).await;
        let decision = self
            .decide_experiment(mode, config, experiment, user, options, &mut tracker, &mut reasons)
            .await;
        tracker.save(&mut reasons).await;
        Ok(DecisionResponse::new(decision?, reasons))
    }

    async fn feature_list(
        &self,
        mode: ExecutionMode,
        config: &ProjectConfig,
        flags: &[&FeatureFlag],
        user: &UserContext,
        options: &DecideOptions,
    ) -> Vec<FeatureDecision> {
        let mut profile_reasons = DecisionReasons::new();
        let mut tracker = self
            .load_profile(mode, user, options, &mut profile_reasons)
            .await;

        let mut decisions = Vec::with_capacity(flags.len());
        for flag in flags {
            let reasons = profile_reasons.clone();
            let decision = self
                .decide_flag(mode, config, flag, user, options, &mut tracker, reasons)
                .await;
            log::debug!(target: "decision_engine",
                        flag_key = flag.key.as_str(),
                        user_id = user.user_id(),
                        variation_key = decision.variation_key();
                        "decided feature flag");
            decisions.push(decision);
        }

        let mut save_reasons = DecisionReasons::new();
        tracker.save(&mut save_reasons).await;
        if !save_reasons.is_empty() {
            for decision in &mut decisions {
                decision.reasons.extend(save_reasons.clone());
            }
        }
        decisions
    }

    async fn load_profile(
        &self,
        mode: ExecutionMode,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> UserProfileTracker {
        if options.contains(DecideOption::IgnoreUserProfileService) {
            return UserProfileTracker::disabled(user.user_id());
        }
        UserProfileTracker::load(self.user_profile_store.as_ref(), mode, user, reasons).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn decide_flag(
        &self,
        mode: ExecutionMode,
        config: &ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
        tracker: &mut UserProfileTracker,
        mut reasons: DecisionReasons,
    ) -> FeatureDecision {
        if let Some(decision) = forced_decision(config, flag, None, user, &mut reasons) {
            return FeatureDecision::new(None, decision, DecisionSource::FeatureTest, reasons);
        }

        for holdout in config.holdouts_for_flag(flag) {
            if let Some(decision) = self.decide_holdout(config, &holdout, user, &mut reasons) {
                return FeatureDecision::new(
                    Some(holdout),
                    decision,
                    DecisionSource::Holdout,
                    reasons,
                );
            }
        }

        for experiment_id in &flag.experiment_ids {
            let Some(experiment) = config.experiment_by_id(experiment_id) else {
                reasons.push(format!(
                    "Experiment ID {experiment_id} of flag {} is not in datafile.",
                    flag.key
                ));
                continue;
            };

            if let Some(decision) =
                forced_decision(config, flag, Some(experiment.key.as_str()), user, &mut reasons)
            {
                return FeatureDecision::new(
                    Some(experiment.clone()),
                    decision,
                    DecisionSource::FeatureTest,
                    reasons,
                );
            }

            match self
                .decide_experiment(mode, config, experiment, user, options, tracker, &mut reasons)
                .await
            {
                Ok(Some(decision)) => {
                    reasons.push(format!(
                        "The user \"{}\" is bucketed into experiment \"{}\" of feature \"{}\".",
                        user.user_id(),
                        experiment.key,
                        flag.key
                    ));
                    return FeatureDecision::new(
                        Some(experiment.clone()),
                        decision,
                        DecisionSource::FeatureTest,
                        reasons,
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    log::warn!(target: "decision_engine",
                               flag_key = flag.key.as_str(),
                               experiment_key = experiment.key.as_str();
                               "skipping experiment rule: {err}");
                    reasons.push(format!("Skipping experiment \"{}\": {err}.", experiment.key));
                }
            }
        }

        self.decide_rollout(config, flag, user, reasons)
    }

    fn decide_holdout(
        &self,
        config: &ProjectConfig,
        holdout: &Experiment,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<ExperimentDecision> {
        if !holdout.status.is_active() {
            reasons.push(format!("Holdout \"{}\" is not running.", holdout.key));
            return None;
        }

        if !self.matches_audience(config, holdout, user, &format!("holdout \"{}\"", holdout.key), reasons)
        {
            reasons.push(format!(
                "User \"{}\" does not meet conditions for holdout \"{}\".",
                user.user_id(),
                holdout.key
            ));
            return None;
        }

        let bucketing_id = user.bucketing_id(reasons);
        let params = BucketParams::for_experiment(holdout, user.user_id(), bucketing_id, config.groups());
        match bucket(&params, reasons) {
            Ok(Some(variation_id)) => {
                let variation = holdout.variation_by_id(variation_id)?;
                reasons.push(format!(
                    "User \"{}\" is in variation \"{}\" of holdout \"{}\".",
                    user.user_id(),
                    variation.key,
                    holdout.key
                ));
                Some(ExperimentDecision::bucketed(variation.clone()))
            }
            Ok(None) => {
                reasons.push(format!(
                    "User \"{}\" is not in holdout \"{}\".",
                    user.user_id(),
                    holdout.key
                ));
                None
            }
            Err(err) => {
                log::warn!(target: "decision_engine",
                           holdout_key = holdout.key.as_str();
                           "skipping holdout: {err}");
                reasons.push(format!("Skipping holdout \"{}\": {err}.", holdout.key));
                None
            }
        }
    }

    /// Evaluate the delivery rules of the flag's rollout.
    ///
    /// A rule whose audience matches but whose traffic allocation excludes the user sends
    /// evaluation straight to the last ("everyone else") rule.
    fn decide_rollout(
        &self,
        config: &ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        mut reasons: DecisionReasons,
    ) -> FeatureDecision {
        let Some(rollout) = config.rollout(&flag.rollout_id) else {
            reasons.push(format!(
                "The feature flag \"{}\" is not used in a rollout.",
                flag.key
            ));
            return FeatureDecision::none(reasons);
        };
        let rules = &rollout.rules;
        let Some(last) = rules.len().checked_sub(1) else {
            reasons.push(format!("Rollout of flag \"{}\" has no rules.", flag.key));
            return FeatureDecision::none(reasons);
        };

        let mut index = 0;
        while index <= last {
            let rule = &rules[index];

            if let Some(decision) = forced_decision(config, flag, Some(rule.key.as_str()), user, &mut reasons)
            {
                return FeatureDecision::new(
                    Some(rule.clone()),
                    decision,
                    DecisionSource::Rollout,
                    reasons,
                );
            }

            let label = if index == last {
                "\"Everyone Else\" rule".to_owned()
            } else {
                format!("rule {}", index + 1)
            };

            if !self.matches_audience(config, rule, user, &label, &mut reasons) {
                reasons.push(format!(
                    "User \"{}\" does not meet conditions for targeting {label}.",
                    user.user_id()
                ));
                index += 1;
                continue;
            }
            reasons.push(format!(
                "User \"{}\" meets conditions for targeting {label}.",
                user.user_id()
            ));

            let bucketing_id = user.bucketing_id(&mut reasons);
            let params =
                BucketParams::for_experiment(rule, user.user_id(), bucketing_id, config.groups());
            match bucket(&params, &mut reasons) {
                Ok(Some(variation_id)) => {
                    if let Some(variation) = rule.variation_by_id(variation_id) {
                        reasons.push(format!(
                            "User \"{}\" bucketed into {label}.",
                            user.user_id()
                        ));
                        return FeatureDecision::new(
                            Some(rule.clone()),
                            ExperimentDecision::bucketed(variation.clone()),
                            DecisionSource::Rollout,
                            reasons,
                        );
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    log::warn!(target: "decision_engine",
                               flag_key = flag.key.as_str(),
                               rule_key = rule.key.as_str();
                               "skipping delivery rule: {err}");
                    reasons.push(format!("Skipping delivery rule \"{}\": {err}.", rule.key));
                }
            }

            if index == last {
                break;
            }
            reasons.push(format!(
                "User \"{}\" is not in the traffic of {label}. Checking \"Everyone Else\" rule now.",
                user.user_id()
            ));
            index = last;
        }

        reasons.push(format!(
            "User \"{}\" is not bucketed into a rollout for feature flag \"{}\".",
            user.user_id(),
            flag.key
        ));
        FeatureDecision::none(reasons)
    }

    #[allow(clippy::too_many_arguments)]
    async fn decide_experiment(
        &self,
        mode: ExecutionMode,
        config: &ProjectConfig,
        experiment: &Experiment,
        user: &UserContext,
        options: &DecideOptions,
        tracker: &mut UserProfileTracker,
        reasons: &mut DecisionReasons,
    ) -> Result<Option<ExperimentDecision>> {
        let user_id = user.user_id();

        if !experiment.status.is_active() {
            reasons.push(format!("Experiment \"{}\" is not running.", experiment.key));
            return Ok(None);
        }

        if let Some(variation) = self.forced_variation(experiment, user_id, reasons) {
            return Ok(Some(ExperimentDecision::bucketed(variation)));
        }

        if let Some(variation_key) = experiment.forced_variations.get(user_id) {
            return Ok(match experiment.variation_by_key(variation_key) {
                Some(variation) => {
                    reasons.push(format!(
                        "User \"{user_id}\" is forced in variation \"{variation_key}\"."
                    ));
                    Some(ExperimentDecision::bucketed(variation.clone()))
                }
                None => {
                    reasons.push(format!(
                        "Variation \"{variation_key}\" is not in the datafile. Not activating user \"{user_id}\"."
                    ));
                    None
                }
            });
        }

        if let Some(variation_id) = tracker.lookup(&experiment.id) {
            match experiment.variation_by_id(variation_id) {
                Some(variation) => {
                    reasons.push(format!(
                        "Returning previously activated variation \"{}\" of experiment \"{}\" for user \"{user_id}\" from user profile.",
                        variation.key, experiment.key
                    ));
                    return Ok(Some(ExperimentDecision::bucketed(variation.clone())));
                }
                None => {
                    reasons.push(format!(
                        "User \"{user_id}\" was previously bucketed into variation with ID \"{variation_id}\" for experiment \"{}\", but no matching variation was found.",
                        experiment.key
                    ));
                }
            }
        }

        let label = format!("experiment \"{}\"", experiment.key);
        if !self.matches_audience(config, experiment, user, &label, reasons) {
            reasons.push(format!(
                "User \"{user_id}\" does not meet conditions to be in experiment \"{}\".",
                experiment.key
            ));
            return Ok(None);
        }

        let bucketing_id = user.bucketing_id(reasons);

        if let Some(cmab) = &experiment.cmab {
            return self
                .decide_cmab(mode, config, experiment, cmab, user, bucketing_id, options, reasons)
                .await;
        }

        let params = BucketParams::for_experiment(experiment, user_id, bucketing_id, config.groups());
        let Some(variation_id) = bucket(&params, reasons)? else {
            reasons.push(format!(
                "User \"{user_id}\" is in no variation of experiment \"{}\".",
                experiment.key
            ));
            return Ok(None);
        };
        let Some(variation) = experiment.variation_by_id(variation_id) else {
            return Ok(None);
        };

        reasons.push(format!(
            "User \"{user_id}\" is in variation \"{}\" of experiment \"{}\".",
            variation.key, experiment.key
        ));
        tracker.record(&experiment.id, &variation.id);
        Ok(Some(ExperimentDecision::bucketed(variation.clone())))
    }

    #[allow(clippy::too_many_arguments)]
    async fn decide_cmab(
        &self,
        mode: ExecutionMode,
        config: &ProjectConfig,
        experiment: &Experiment,
        cmab: &Cmab,
        user: &UserContext,
        bucketing_id: &str,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<Option<ExperimentDecision>> {
        let user_id = user.user_id();

        // Participation is decided by bucketing into a single range covering the CMAB share of
        // traffic. Group membership still applies.
        let allocation = [TrafficAllocation {
            entity_id: CMAB_ENTITY_ID.to_owned(),
            end_of_range: cmab.traffic_allocation,
        }];
        let params = BucketParams {
            traffic_allocation: &allocation,
            validate_against: None,
            ..BucketParams::for_experiment(experiment, user_id, bucketing_id, config.groups())
        };
        if bucket(&params, reasons)? != Some(CMAB_ENTITY_ID) {
            reasons.push(format!(
                "User \"{user_id}\" is not in CMAB experiment \"{}\" due to traffic allocation.",
                experiment.key
            ));
            return Ok(None);
        }

        if mode == ExecutionMode::Immediate {
            let err = Error::CmabUnsupported {
                rule_id: experiment.id.clone(),
            };
            log::debug!(target: "decision_engine", experiment_key = experiment.key.as_str(); "{err}");
            reasons.push(format!("{err}."));
            return Ok(None);
        }

        let Some(cmab_service) = &self.cmab_service else {
            log::warn!(target: "decision_engine",
                       experiment_key = experiment.key.as_str();
                       "no CMAB service configured, skipping CMAB experiment");
            reasons.push(format!(
                "No CMAB service is configured for experiment \"{}\".",
                experiment.key
            ));
            return Ok(None);
        };

        let decision = match cmab_service
            .get_decision(config, user, &experiment.id, options)
            .await
        {
            Ok(decision) => decision,
            Err(err) => {
                log::warn!(target: "decision_engine",
                           experiment_key = experiment.key.as_str(),
                           user_id;
                           "failed to fetch CMAB decision: {err}");
                reasons.push(format!(
                    "Failed to fetch CMAB data for experiment \"{}\".",
                    experiment.key
                ));
                return Ok(None);
            }
        };

        let Some(variation) = experiment.variation_by_id(&decision.variation_id) else {
            log::warn!(target: "decision_engine",
                       experiment_key = experiment.key.as_str(),
                       variation_id = decision.variation_id.as_str();
                       "CMAB returned a variation that is not in the configuration");
            reasons.push(format!(
                "CMAB returned unknown variation ID \"{}\" for experiment \"{}\".",
                decision.variation_id, experiment.key
            ));
            return Ok(None);
        };

        reasons.push(format!(
            "CMAB decision for user \"{user_id}\" in experiment \"{}\": variation \"{}\".",
            experiment.key, variation.key
        ));
        Ok(Some(ExperimentDecision::from_cmab(
            variation.clone(),
            decision.cmab_uuid,
        )))
    }

    fn forced_variation(
        &self,
        experiment: &Experiment,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<Variation> {
        let variation_id = self.forced_variations.get(user_id, &experiment.id)?;
        match experiment.variation_by_id(&variation_id) {
            Some(variation) => {
                reasons.push(format!(
                    "Variation \"{}\" is mapped to experiment \"{}\" and user \"{user_id}\" in the forced variation map.",
                    variation.key, experiment.key
                ));
                Some(variation.clone())
            }
            None => {
                reasons.push(format!(
                    "Forced variation ID \"{variation_id}\" is not in experiment \"{}\".",
                    experiment.key
                ));
                None
            }
        }
    }

    fn matches_audience(
        &self,
        config: &ProjectConfig,
        experiment: &Experiment,
        user: &UserContext,
        label: &str,
        reasons: &mut DecisionReasons,
    ) -> bool {
        let result = match experiment.targeting() {
            Some(conditions) => self.evaluator.evaluate(&conditions, config.audiences(), user),
            None => true,
        };
        reasons.push(format!(
            "Audiences for {label} collectively evaluated to {}.",
            if result { "TRUE" } else { "FALSE" }
        ));
        result
    }
}

fn experiment_by_key<'a>(config: &'a ProjectConfig, experiment_key: &str) -> Result<&'a Experiment> {
    config
        .experiment_by_key(experiment_key)
        .map(|it| it.as_ref())
        .ok_or_else(|| Error::InvalidExperimentKey {
            experiment_key: experiment_key.to_owned(),
        })
}

/// Forced decision set on the user context for the flag (`rule_key` is `None`) or one of its
/// rules.
fn forced_decision(
    config: &ProjectConfig,
    flag: &FeatureFlag,
    rule_key: Option<&str>,
    user: &UserContext,
    reasons: &mut DecisionReasons,
) -> Option<ExperimentDecision> {
    let key = ForcedDecisionKey {
        flag_key: flag.key.clone(),
        rule_key: rule_key.map(str::to_owned),
    };
    let variation_key = user.forced_decision(&key)?;
    let target = match rule_key {
        Some(rule_key) => format!("flag \"{}\", rule \"{rule_key}\"", flag.key),
        None => format!("flag \"{}\"", flag.key),
    };

    match config.flag_variation_by_key(&flag.key, variation_key) {
        Some(variation) => {
            log::info!(target: "decision_engine",
                       flag_key = flag.key.as_str(),
                       rule_key,
                       variation_key;
                       "using forced decision");
            reasons.push(format!(
                "Variation \"{variation_key}\" is mapped to {target} and user \"{}\" in the forced decision map.",
                user.user_id()
            ));
            Some(ExperimentDecision::bucketed(variation.clone()))
        }
        None => {
            reasons.push(format!(
                "Invalid variation is mapped to {target} and user \"{}\" in the forced decision map.",
                user.user_id()
            ));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::cmab::CmabClient;
    use crate::decision::{BucketDecision, UserProfile};
    use crate::{AttributeValue, Attributes, STICKY_BUCKET_MAP_ATTRIBUTE};

    fn config() -> ProjectConfig {
        ProjectConfig::from_json(include_str!("../../tests/data/datafile.json")).unwrap()
    }

    fn user(user_id: &str, attributes: &[(&str, AttributeValue)]) -> UserContext {
        UserContext::new(
            user_id,
            attributes
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect::<Attributes>(),
        )
    }

    fn experiment<'a>(config: &'a ProjectConfig, key: &str) -> &'a Experiment {
        config.experiment_by_key(key).unwrap()
    }

    fn flag<'a>(config: &'a ProjectConfig, key: &str) -> &'a FeatureFlag {
        config.feature_flag(key).unwrap()
    }

    fn variation_key(response: DecisionResponse<Option<ExperimentDecision>>) -> Option<String> {
        response.result.map(|it| it.variation.key)
    }

    fn no_options() -> DecideOptions {
        DecideOptions::new()
    }

    #[derive(Default)]
    struct MemoryProfiles {
        profiles: Mutex<HashMap<String, UserProfile>>,
        lookups: AtomicUsize,
        saves: AtomicUsize,
    }

    impl MemoryProfiles {
        fn with_profile(user_id: &str, bucket_map: &[(&str, &str)]) -> MemoryProfiles {
            let profiles = MemoryProfiles::default();
            profiles.profiles.lock().unwrap().insert(
                user_id.to_owned(),
                UserProfile {
                    user_id: user_id.to_owned(),
                    experiment_bucket_map: bucket_map
                        .iter()
                        .map(|(experiment_id, variation_id)| {
                            (
                                (*experiment_id).to_owned(),
                                BucketDecision {
                                    variation_id: (*variation_id).to_owned(),
                                },
                            )
                        })
                        .collect(),
                },
            );
            profiles
        }

        fn stored(&self, user_id: &str, experiment_id: &str) -> Option<String> {
            let profiles = self.profiles.lock().unwrap();
            profiles
                .get(user_id)?
                .experiment_bucket_map
                .get(experiment_id)
                .map(|it| it.variation_id.clone())
        }
    }

    impl UserProfileService for MemoryProfiles {
        fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.profiles.lock().unwrap().get(user_id).cloned())
        }

        fn save(&self, profile: &UserProfile) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.profiles
                .lock()
                .unwrap()
                .insert(profile.user_id.clone(), profile.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl AsyncUserProfileService for MemoryProfiles {
        async fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>> {
            UserProfileService::lookup(self, user_id)
        }

        async fn save(&self, profile: &UserProfile) -> Result<()> {
            UserProfileService::save(self, profile)
        }
    }

    struct FixedCmabClient {
        variation_id: String,
        calls: AtomicUsize,
        fail: bool,
    }

    impl FixedCmabClient {
        fn returning(variation_id: &str) -> Arc<FixedCmabClient> {
            Arc::new(FixedCmabClient {
                variation_id: variation_id.to_owned(),
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<FixedCmabClient> {
            Arc::new(FixedCmabClient {
                variation_id: String::new(),
                calls: AtomicUsize::new(0),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl CmabClient for FixedCmabClient {
        async fn fetch_decision(
            &self,
            rule_id: &str,
            _user_id: &str,
            _attributes: &Attributes,
            _cmab_uuid: Uuid,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::CmabFetchFailed {
                    rule_id: rule_id.to_owned(),
                    message: "endpoint unavailable".to_owned(),
                });
            }
            Ok(self.variation_id.clone())
        }
    }

    fn service_with_profiles(profiles: Arc<MemoryProfiles>) -> DecisionService {
        DecisionService::new(DecisionServiceConfig::new().with_user_profile_service(profiles))
    }

    fn service_with_cmab(client: Arc<FixedCmabClient>) -> DecisionService {
        DecisionService::new(
            DecisionServiceConfig::new()
                .with_cmab_service(Arc::new(CmabService::with_client(client))),
        )
    }

    #[test]
    fn paused_experiment_yields_nothing() {
        let _ = env_logger::builder().is_test(true).try_init();

        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());
        let response = service
            .get_variation(
                &config,
                experiment(&config, "paused_test"),
                &user("whitelisted_user", &[]),
                &no_options(),
            )
            .unwrap();

        assert!(response.result.is_none());
        assert!(response.reasons.mentions("is not running"));
    }

    #[test]
    fn fresh_bucketing_is_deterministic() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());
        let checkout = experiment(&config, "checkout_test");

        for _ in 0..3 {
            let response = service
                .get_variation(&config, checkout, &user("u1", &[]), &no_options())
                .unwrap();
            assert_eq!(
                response.result.as_ref().map(|it| it.decision_source),
                Some(DecisionSource::Experiment)
            );
            assert_eq!(variation_key(response), Some("control".to_owned()));
        }
    }

    #[test]
    fn forced_beats_whitelist_beats_sticky_beats_bucketing() {
        let config = config();
        let checkout = experiment(&config, "checkout_test");

        // sticky (treatment) beats fresh bucketing (control)
        let profiles = Arc::new(MemoryProfiles::with_profile("u1", &[("111127", "111129")]));
        let service = service_with_profiles(profiles.clone());
        let response = service
            .get_variation(&config, checkout, &user("u1", &[]), &no_options())
            .unwrap();
        assert_eq!(variation_key(response), Some("treatment".to_owned()));

        // whitelist (treatment) beats sticky (control)
        let profiles = Arc::new(MemoryProfiles::with_profile(
            "whitelisted_user",
            &[("111127", "111128")],
        ));
        let service = service_with_profiles(profiles);
        let whitelisted = user("whitelisted_user", &[]);
        let response = service
            .get_variation(&config, checkout, &whitelisted, &no_options())
            .unwrap();
        assert_eq!(variation_key(response), Some("treatment".to_owned()));

        // forced variation (control) beats whitelist (treatment)
        service
            .set_forced_variation(&config, "checkout_test", "whitelisted_user", Some("control"))
            .unwrap();
        let response = service
            .get_variation(&config, checkout, &whitelisted, &no_options())
            .unwrap();
        assert!(response.reasons.mentions("forced variation map"));
        assert_eq!(variation_key(response), Some("control".to_owned()));
    }

    #[test]
    fn unknown_group_fails_experiment_but_not_flag() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());
        let user = user("u1", &[]);

        assert!(matches!(
            service.get_variation(&config, experiment(&config, "orphan_test"), &user, &no_options()),
            Err(Error::InvalidGroupId { group_id }) if group_id == "missing_group"
        ));

        let decision =
            service.get_variation_for_feature(&config, flag(&config, "orphan_flow"), &user, &no_options());
        assert!(decision.reasons.mentions("Skipping experiment \"orphan_test\""));
        assert_eq!(decision.decision_source, DecisionSource::Rollout);
        assert_eq!(decision.variation_key(), Some("rollout_on"));
    }

    #[test]
    fn unresolvable_whitelist_entry_is_terminal() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());
        let response = service
            .get_variation(
                &config,
                experiment(&config, "checkout_test"),
                &user("broken_whitelist", &[]),
                &no_options(),
            )
            .unwrap();
        assert!(response.result.is_none());
    }

    #[test]
    fn stale_sticky_variation_falls_back_to_bucketing() {
        let config = config();
        let profiles = Arc::new(MemoryProfiles::with_profile("u1", &[("111127", "999")]));
        let service = service_with_profiles(profiles.clone());

        let response = service
            .get_variation(&config, experiment(&config, "checkout_test"), &user("u1", &[]), &no_options())
            .unwrap();
        assert!(response.reasons.mentions("no matching variation was found"));
        assert_eq!(variation_key(response), Some("control".to_owned()));
        assert_eq!(profiles.stored("u1", "111127").as_deref(), Some("111128"));
    }

    #[test]
    fn sticky_attribute_wins_over_store() {
        let config = config();
        let profiles = Arc::new(MemoryProfiles::with_profile("u1", &[("111127", "111128")]));
        let service = service_with_profiles(profiles);
        let user = user(
            "u1",
            &[(
                STICKY_BUCKET_MAP_ATTRIBUTE,
                AttributeValue::Json(json!({"111127": {"variation_id": "111129"}})),
            )],
        );

        let response = service
            .get_variation(&config, experiment(&config, "checkout_test"), &user, &no_options())
            .unwrap();
        assert_eq!(variation_key(response), Some("treatment".to_owned()));
    }

    #[test]
    fn ignore_user_profile_service_skips_lookup_and_save() {
        let config = config();
        let profiles = Arc::new(MemoryProfiles::with_profile("u1", &[("111127", "111129")]));
        let service = service_with_profiles(profiles.clone());
        let options = DecideOptions::new().with(DecideOption::IgnoreUserProfileService);

        let response = service
            .get_variation(&config, experiment(&config, "checkout_test"), &user("u1", &[]), &options)
            .unwrap();
        assert_eq!(variation_key(response), Some("control".to_owned()));
        assert_eq!(profiles.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(profiles.saves.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn batch_looks_up_and_saves_profile_once() {
        let config = config();
        let profiles = Arc::new(MemoryProfiles::default());
        let service = service_with_profiles(profiles.clone());

        let decisions = service.get_variations_for_feature_list(
            &config,
            &[flag(&config, "checkout_flow"), flag(&config, "group_flow")],
            &user("u2", &[]),
            &no_options(),
        );

        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|it| it.variation.is_some()));
        assert_eq!(profiles.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(profiles.saves.load(Ordering::SeqCst), 1);
        assert_eq!(profiles.stored("u2", "111127").as_deref(), Some("111128"));
        assert!(
            profiles.stored("u2", "2001").is_some() != profiles.stored("u2", "2002").is_some()
        );
    }

    #[test]
    fn audience_gates_experiment() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());
        let chrome_test = experiment(&config, "chrome_test");

        let chrome = user("u1", &[("browser", "chrome".into())]);
        let response = service
            .get_variation(&config, chrome_test, &chrome, &no_options())
            .unwrap();
        assert_eq!(variation_key(response), Some("chrome_on".to_owned()));

        let firefox = user("u1", &[("browser", "firefox".into())]);
        let response = service
            .get_variation(&config, chrome_test, &firefox, &no_options())
            .unwrap();
        assert!(response.reasons.mentions("collectively evaluated to FALSE"));
        assert!(response.result.is_none());

        let unknown = user("u1", &[]);
        let response = service
            .get_variation(&config, chrome_test, &unknown, &no_options())
            .unwrap();
        assert!(response.result.is_none());
    }

    #[test]
    fn random_group_assigns_exactly_one_member() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());
        let first = experiment(&config, "group_exp_1");
        let second = experiment(&config, "group_exp_2");

        for i in 0..50 {
            let user = user(&format!("user-{i}"), &[]);
            let in_first = service
                .get_variation(&config, first, &user, &no_options())
                .unwrap()
                .result
                .is_some();
            let in_second = service
                .get_variation(&config, second, &user, &no_options())
                .unwrap()
                .result
                .is_some();
            assert!(in_first != in_second, "user-{i} in both or neither");
        }
    }

    #[test]
    fn forced_variation_api_validates_keys() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());

        assert!(matches!(
            service.set_forced_variation(&config, "nope", "u1", Some("control")),
            Err(Error::InvalidExperimentKey { .. })
        ));
        assert!(matches!(
            service.set_forced_variation(&config, "checkout_test", "u1", Some("nope")),
            Err(Error::InvalidVariationKey { .. })
        ));

        service
            .set_forced_variation(&config, "checkout_test", "u1", Some("treatment"))
            .unwrap();
        assert_eq!(
            service
                .get_forced_variation(&config, "checkout_test", "u1")
                .result
                .map(|it| it.key),
            Some("treatment".to_owned())
        );

        service
            .set_forced_variation(&config, "checkout_test", "u1", None)
            .unwrap();
        assert!(service
            .get_forced_variation(&config, "checkout_test", "u1")
            .result
            .is_none());
        assert!(!service
            .remove_forced_variation(&config, "checkout_test", "u1")
            .unwrap());
    }

    #[test]
    fn flag_forced_decision_beats_rule_forced_decision() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());
        let checkout = flag(&config, "checkout_flow");

        let mut user = user("u1", &[]);
        user.set_forced_decision(ForcedDecisionKey::flag("checkout_flow"), "rollout_on");
        user.set_forced_decision(
            ForcedDecisionKey::rule("checkout_flow", "checkout_test"),
            "treatment",
        );

        let decision = service.get_variation_for_feature(&config, checkout, &user, &no_options());
        assert_eq!(decision.variation_key(), Some("rollout_on"));
        assert_eq!(decision.decision_source, DecisionSource::FeatureTest);
        assert!(decision.experiment.is_none());

        user.remove_forced_decision(&ForcedDecisionKey::flag("checkout_flow"));
        let decision = service.get_variation_for_feature(&config, checkout, &user, &no_options());
        assert_eq!(decision.variation_key(), Some("treatment"));
        assert_eq!(decision.rule_key(), Some("checkout_test"));
    }

    #[test]
    fn unknown_forced_decision_is_ignored() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());

        let mut user = user("u1", &[]);
        user.set_forced_decision(ForcedDecisionKey::flag("checkout_flow"), "nope");

        let decision = service.get_variation_for_feature(
            &config,
            flag(&config, "checkout_flow"),
            &user,
            &no_options(),
        );
        assert!(decision.reasons.mentions("Invalid variation"));
        assert_eq!(decision.variation_key(), Some("control"));
    }

    #[test]
    fn forced_decision_on_delivery_rule() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());

        let mut user = user("u1", &[]);
        user.set_forced_decision(
            ForcedDecisionKey::rule("search_ranking", "search_chrome"),
            "search_chrome_on",
        );

        let decision = service.get_variation_for_feature(
            &config,
            flag(&config, "search_ranking"),
            &user,
            &no_options(),
        );
        assert_eq!(decision.variation_key(), Some("search_chrome_on"));
        assert_eq!(decision.decision_source, DecisionSource::Rollout);
    }

    #[test]
    fn holdouts_terminate_flag_decision() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());

        let held_out = user("u1", &[("held_out", true.into())]);
        let decision = service.get_variation_for_feature(
            &config,
            flag(&config, "checkout_flow"),
            &held_out,
            &no_options(),
        );
        assert_eq!(decision.decision_source, DecisionSource::Holdout);
        assert_eq!(decision.variation_key(), Some("global_holdout_off"));
        assert!(!decision.is_enabled());

        let vip = user("u1", &[("vip", true.into())]);
        let decision = service.get_variation_for_feature(
            &config,
            flag(&config, "checkout_flow"),
            &vip,
            &no_options(),
        );
        assert_eq!(decision.decision_source, DecisionSource::Holdout);
        assert_eq!(decision.rule_key(), Some("checkout_holdout"));

        // search_ranking is excluded from the global holdout
        let decision = service.get_variation_for_feature(
            &config,
            flag(&config, "search_ranking"),
            &held_out,
            &no_options(),
        );
        assert_ne!(decision.decision_source, DecisionSource::Holdout);
    }

    #[test]
    fn experiment_rule_before_rollout() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());
        let checkout = flag(&config, "checkout_flow");

        let decision = service.get_variation_for_feature(&config, checkout, &user("u1", &[]), &no_options());
        assert_eq!(decision.decision_source, DecisionSource::FeatureTest);
        assert_eq!(decision.variation_key(), Some("control"));

        // the experiment yields nothing for this user, so the rollout decides
        let decision = service.get_variation_for_feature(
            &config,
            checkout,
            &user("broken_whitelist", &[]),
            &no_options(),
        );
        assert_eq!(decision.decision_source, DecisionSource::Rollout);
        assert_eq!(decision.variation_key(), Some("rollout_on"));
        assert_eq!(
            decision.variation.as_ref().unwrap().variable_value("var_color"),
            Some("green")
        );
    }

    #[test]
    fn rollout_jumps_to_everyone_else_when_traffic_excludes_user() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());
        let search = flag(&config, "search_ranking");

        // matches rule 1 (chrome) but its traffic is empty: rule 2 (adults) is never evaluated
        let chrome_adult = user("u1", &[("browser", "chrome".into()), ("age", 30.0.into())]);
        let decision = service.get_variation_for_feature(&config, search, &chrome_adult, &no_options());
        assert_eq!(decision.variation_key(), Some("search_off"));
        assert_eq!(decision.rule_key(), Some("search_everyone_else"));
        assert!(!decision.reasons.mentions("rule 2"));

        let firefox_adult = user("u1", &[("browser", "firefox".into()), ("age", 30.0.into())]);
        let decision = service.get_variation_for_feature(&config, search, &firefox_adult, &no_options());
        assert_eq!(decision.variation_key(), Some("search_adults_on"));

        let firefox_child = user("u1", &[("browser", "firefox".into()), ("age", 10.0.into())]);
        let decision = service.get_variation_for_feature(&config, search, &firefox_child, &no_options());
        assert_eq!(decision.variation_key(), Some("search_off"));
        assert_eq!(decision.decision_source, DecisionSource::Rollout);
    }

    #[test]
    fn cmab_is_skipped_by_immediate_decisions() {
        let config = config();
        let client = FixedCmabClient::returning("3003");
        let service = service_with_cmab(client.clone());

        let decision = service.get_variation_for_feature(
            &config,
            flag(&config, "cmab_flow"),
            &user("u1", &[("age", 30.0.into())]),
            &no_options(),
        );
        assert!(decision.variation.is_none());
        assert!(decision.reasons.mentions("not supported by immediate decisions"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cmab_decisions_are_cached_and_not_sticky() {
        let _ = env_logger::builder().is_test(true).try_init();

        let config = config();
        let client = FixedCmabClient::returning("3003");
        let profiles = Arc::new(MemoryProfiles::default());
        let service = DecisionService::new(
            DecisionServiceConfig::new()
                .with_user_profile_service(profiles.clone())
                .with_cmab_service(Arc::new(CmabService::with_client(client.clone()))),
        );
        let cmab_flow = flag(&config, "cmab_flow");
        let user = user("u1", &[("age", 30.0.into())]);

        let first = service
            .get_variation_for_feature_async(&config, cmab_flow, &user, &no_options())
            .await;
        assert_eq!(first.variation_key(), Some("cmab_b"));
        assert_eq!(first.decision_source, DecisionSource::FeatureTest);
        assert!(first.cmab_uuid.is_some());

        let second = service
            .get_variation_for_feature_async(&config, cmab_flow, &user, &no_options())
            .await;
        assert_eq!(second.cmab_uuid, first.cmab_uuid);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(profiles.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cmab_failure_falls_through() {
        let config = config();
        let client = FixedCmabClient::failing();
        let service = service_with_cmab(client);

        let decision = service
            .get_variation_for_feature_async(
                &config,
                flag(&config, "cmab_flow"),
                &user("u1", &[("age", 30.0.into())]),
                &no_options(),
            )
            .await;
        assert!(decision.variation.is_none());
        assert!(decision.reasons.mentions("Failed to fetch CMAB data"));
        assert_eq!(decision.decision_source, DecisionSource::Rollout);
    }

    #[tokio::test]
    async fn cmab_without_service_is_skipped() {
        let config = config();
        let service = DecisionService::new(DecisionServiceConfig::new());

        let response = service
            .get_variation_async(
                &config,
                experiment(&config, "cmab_test"),
                &user("u1", &[]),
                &no_options(),
            )
            .await
            .unwrap();
        assert!(response.result.is_none());
        assert!(response.reasons.mentions("No CMAB service"));
    }

    #[tokio::test]
    async fn cmab_variation_for_single_experiment() {
        let config = config();
        let service = service_with_cmab(FixedCmabClient::returning("3002"));

        let response = service
            .get_variation_async(
                &config,
                experiment(&config, "cmab_test"),
                &user("u1", &[]),
                &no_options(),
            )
            .await
            .unwrap();
        let decision = response.result.unwrap();
        assert_eq!(decision.variation.key, "cmab_a");
        assert_eq!(decision.decision_source, DecisionSource::Experiment);
        assert!(decision.cmab_uuid.is_some());
    }

    #[tokio::test]
    async fn cmab_traffic_gate_excludes_without_fetching() {
        let config = config();
        let client = FixedCmabClient::returning("3102");
        let service = service_with_cmab(client.clone());
        let user = user("u1", &[("age", 30.0.into())]);

        let response = service
            .get_variation_async(&config, experiment(&config, "cmab_closed_test"), &user, &no_options())
            .await
            .unwrap();
        assert!(response.result.is_none());
        assert!(response.reasons.mentions("due to traffic allocation"));

        let decision = service
            .get_variation_for_feature_async(
                &config,
                flag(&config, "cmab_closed_flow"),
                &user,
                &no_options(),
            )
            .await;
        assert_eq!(decision.decision_source, DecisionSource::Rollout);
        assert_eq!(decision.variation_key(), Some("rollout_on"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn async_profile_store_is_used_by_async_calls_only() {
        let config = config();
        let profiles = Arc::new(MemoryProfiles::with_profile("u1", &[("111127", "111129")]));
        let service = DecisionService::new(
            DecisionServiceConfig::new().with_async_user_profile_service(profiles.clone()),
        );
        let checkout = experiment(&config, "checkout_test");
        let user = user("u1", &[]);

        let response = service
            .get_variation_async(&config, checkout, &user, &no_options())
            .await
            .unwrap();
        assert_eq!(variation_key(response), Some("treatment".to_owned()));

        let response = service
            .get_variation(&config, checkout, &user, &no_options())
            .unwrap();
        assert!(response.reasons.mentions("Asynchronous user profile service"));
        assert_eq!(variation_key(response), Some("control".to_owned()));
        assert_eq!(profiles.lookups.load(Ordering::SeqCst), 1);
    }
}
