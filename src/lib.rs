//! `decision_engine` assigns users to experiment variations, rollout variations and holdouts,
//! deterministically and without a network round trip, from a static project configuration.
//!
//! # Overview
//!
//! [`ProjectConfig`](config::ProjectConfig) is an immutable, indexed snapshot of a datafile. It
//! is built once and replaced wholesale when a new datafile arrives.
//! [`ConfigurationStore`](config::ConfigurationStore) holds the active snapshot and hands out
//! consistent snapshots to concurrent readers.
//!
//! Decisions are built from a few pure building blocks:
//!
//! - [`bucketing`] hashes a user into `[0, 10000)` with MurmurHash3 and maps the value through
//!   ordered traffic allocation ranges, honoring mutually exclusive groups. The hash is bit-exact
//!   with every other client reading the same datafile.
//! - [`audience`] evaluates audience condition trees with three-valued logic and an open
//!   [matcher registry](audience::MatcherRegistry).
//! - [`cmab`] serves contextual multi-armed bandit rules from a remote model, caching decisions
//!   until the user's relevant attributes change.
//!
//! [`DecisionService`](decision::DecisionService) composes them with forced variations,
//! whitelists, sticky bucketing, holdouts and rollout fallthrough into per-experiment and
//! per-flag decisions. [`Decider`] pairs it with a `ConfigurationStore` so callers can decide by
//! key.
//!
//! Every decision method comes in two flavors: an immediate one that never waits (CMAB rules and
//! async profile stores are skipped) and an `*_async` one that suspends at remote calls.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Feature decisions never fail; everything that
//! went wrong is recorded in the decision's [reasons](decision::DecisionReasons).
//!
//! # Logging
//!
//! The crate logs through the [`log`](https://docs.rs/log/latest/log/) facade with target
//! `decision_engine` and structured key-values. Install any `log`-compatible logger to see them.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod audience;
pub mod bucketing;
pub mod cmab;
pub mod config;
pub mod decision;

mod attributes;
mod decider;
mod error;
mod user_context;

pub use attributes::{
    AttributeValue, Attributes, BUCKETING_ID_ATTRIBUTE, STICKY_BUCKET_MAP_ATTRIBUTE,
};
pub use decider::{Decider, DeciderConfig};
pub use decision::{DecideOption, DecideOptions, DecisionSource, FeatureDecision};
pub use error::{Error, Result};
pub use user_context::{ForcedDecisionKey, UserContext};
