//! Audience targeting: condition trees, matchers, and the tri-state evaluator.
mod condition;
mod evaluator;
mod matchers;
mod semver;

pub use condition::{Audience, Condition, ConditionTree, LogicalOperator};
pub use evaluator::AudienceEvaluator;
pub use matchers::{Matcher, MatcherRegistry, CUSTOM_ATTRIBUTE, THIRD_PARTY_DIMENSION};
pub use semver::compare_versions;
