use std::collections::HashMap;

use crate::UserContext;

use super::{Audience, Condition, ConditionTree, LogicalOperator, MatcherRegistry};

/// Evaluates audience condition trees with three-valued logic.
///
/// Every node yields `Some(true)`, `Some(false)` or `None` (unknown). Only `Some(true)` at the
/// root counts as a match.
#[derive(Debug, Clone, Default)]
pub struct AudienceEvaluator {
    matchers: MatcherRegistry,
}

impl AudienceEvaluator {
    pub fn new(matchers: MatcherRegistry) -> AudienceEvaluator {
        AudienceEvaluator { matchers }
    }

    pub fn matchers(&self) -> &MatcherRegistry {
        &self.matchers
    }

    /// Returns `true` only if `tree` evaluates to true for `user`.
    pub fn evaluate(
        &self,
        tree: &ConditionTree,
        audiences: &HashMap<String, Audience>,
        user: &UserContext,
    ) -> bool {
        self.try_evaluate(tree, audiences, user) == Some(true)
    }

    /// Tri-state evaluation of `tree`.
    pub fn try_evaluate(
        &self,
        tree: &ConditionTree,
        audiences: &HashMap<String, Audience>,
        user: &UserContext,
    ) -> Option<bool> {
        let mut chain = Vec::new();
        self.eval_tree(tree, audiences, user, &mut chain)
    }

    fn eval_tree<'a>(
        &self,
        tree: &'a ConditionTree,
        audiences: &'a HashMap<String, Audience>,
        user: &UserContext,
        chain: &mut Vec<&'a str>,
    ) -> Option<bool> {
        match tree {
            ConditionTree::Operator { operator, children } => match operator {
                LogicalOperator::And => {
                    let mut saw_unknown = false;
                    for child in children {
                        match self.eval_tree(child, audiences, user, chain) {
                            Some(false) => return Some(false),
                            None => saw_unknown = true,
                            Some(true) => {}
                        }
                    }
                    if saw_unknown {
                        None
                    } else {
                        Some(true)
                    }
                }
                LogicalOperator::Or => {
                    let mut saw_unknown = false;
                    for child in children {
                        match self.eval_tree(child, audiences, user, chain) {
                            Some(true) => return Some(true),
                            None => saw_unknown = true,
                            Some(false) => {}
                        }
                    }
                    if saw_unknown {
                        None
                    } else {
                        Some(false)
                    }
                }
                LogicalOperator::Not => {
                    let child = children.first()?;
                    self.eval_tree(child, audiences, user, chain).map(|it| !it)
                }
            },
            ConditionTree::Leaf(condition) => self.eval_leaf(condition, user),
            ConditionTree::AudienceId(audience_id) => {
                self.eval_audience(audience_id, audiences, user, chain)
            }
        }
    }

    fn eval_audience<'a>(
        &self,
        audience_id: &'a str,
        audiences: &'a HashMap<String, Audience>,
        user: &UserContext,
        chain: &mut Vec<&'a str>,
    ) -> Option<bool> {
        let Some(audience) = audiences.get(audience_id) else {
            log::warn!(target: "decision_engine",
                       audience_id;
                       "audience referenced by a condition is not in the datafile");
            return None;
        };

        if chain.contains(&audience_id) {
            log::warn!(target: "decision_engine",
                       audience_id;
                       "audience conditions reference themselves, treating as unknown");
            return None;
        }

        chain.push(audience_id);
        let result = self.eval_tree(&audience.conditions, audiences, user, chain);
        chain.pop();

        log::debug!(target: "decision_engine",
                    audience_id,
                    audience_name = audience.name.as_str(),
                    result:?;
                    "evaluated audience");
        result
    }

    /// Leaves whose condition type and match type have no registered matcher are unknown.
    fn eval_leaf(&self, condition: &Condition, user: &UserContext) -> Option<bool> {
        let condition_type = condition.condition_type.as_str();
        let Some(matcher) = self.matchers.get(condition_type, condition.match_name()) else {
            log::warn!(target: "decision_engine",
                       attribute = condition.name.as_str(),
                       condition_type,
                       match_type = condition.match_name();
                       "audience condition uses an unknown condition type or match type");
            return None;
        };

        matcher.evaluate(condition, user)
    }
}
