//! Deterministic bucketing: hashing a user into `[0, 10000)` and mapping the value through a
//! traffic allocation table.
mod bucket_value;
mod bucketer;

pub use bucket_value::{bucket_value, HASH_SEED, MAX_TRAFFIC_VALUE};
pub(crate) use bucket_value::murmur_hash;
pub use bucketer::{bucket, find_bucket, BucketParams};
