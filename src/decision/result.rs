use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{Experiment, Variation};

use super::DecisionReasons;

/// Which kind of rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    /// A single experiment decided outside of any feature flag.
    Experiment,
    FeatureTest,
    Rollout,
    Holdout,
}

/// Variation assigned for a single experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentDecision {
    pub variation: Variation,
    /// Always [`DecisionSource::Experiment`]: feature decisions carry their own source.
    pub decision_source: DecisionSource,
    /// Set when the variation was chosen by the CMAB model.
    pub cmab_uuid: Option<Uuid>,
}

impl ExperimentDecision {
    pub(crate) fn bucketed(variation: Variation) -> ExperimentDecision {
        ExperimentDecision {
            variation,
            decision_source: DecisionSource::Experiment,
            cmab_uuid: None,
        }
    }

    pub(crate) fn from_cmab(variation: Variation, cmab_uuid: Uuid) -> ExperimentDecision {
        ExperimentDecision {
            cmab_uuid: Some(cmab_uuid),
            ..ExperimentDecision::bucketed(variation)
        }
    }
}

/// Outcome of deciding one feature flag for one user.
#[derive(Debug, Clone)]
pub struct FeatureDecision {
    /// The experiment, delivery rule or holdout that produced the decision.
    pub experiment: Option<Arc<Experiment>>,
    pub variation: Option<Variation>,
    pub decision_source: DecisionSource,
    pub cmab_uuid: Option<Uuid>,
    pub reasons: DecisionReasons,
}

impl FeatureDecision {
    pub(crate) fn new(
        experiment: Option<Arc<Experiment>>,
        decision: ExperimentDecision,
        decision_source: DecisionSource,
        reasons: DecisionReasons,
    ) -> FeatureDecision {
        FeatureDecision {
            experiment,
            variation: Some(decision.variation),
            decision_source,
            cmab_uuid: decision.cmab_uuid,
            reasons,
        }
    }

    /// No variation: the user falls through every rule.
    pub(crate) fn none(reasons: DecisionReasons) -> FeatureDecision {
        FeatureDecision {
            experiment: None,
            variation: None,
            decision_source: DecisionSource::Rollout,
            cmab_uuid: None,
            reasons,
        }
    }

    /// Returns `true` if the assigned variation turns the feature on.
    pub fn is_enabled(&self) -> bool {
        self.variation.as_ref().is_some_and(|it| it.feature_enabled)
    }

    pub fn variation_key(&self) -> Option<&str> {
        self.variation.as_ref().map(|it| it.key.as_str())
    }

    pub fn rule_key(&self) -> Option<&str> {
        self.experiment.as_ref().map(|it| it.key.as_str())
    }
}
