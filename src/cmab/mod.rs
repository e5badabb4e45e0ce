//! Contextual multi-armed bandit decisions: a remote model picks the variation from live user
//! attributes, and decisions are cached until those attributes change.
mod cache;
mod client;
mod service;

pub use cache::{CmabCache, CmabCacheEntry, InMemoryCmabCache};
pub use client::{CmabClient, HttpCmabClient, HttpCmabClientConfig};
pub use service::{CmabDecision, CmabService};
