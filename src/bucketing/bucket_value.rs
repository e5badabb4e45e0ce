//! Bucket value generator.
use std::io::Cursor;
use std::sync::Arc;

use crate::{Error, Result};

/// Seed shared by every implementation reading the same project configuration.
pub const HASH_SEED: u32 = 1;

/// Upper bound (exclusive) of bucket values.
pub const MAX_TRAFFIC_VALUE: u32 = 10_000;

const MAX_HASH_VALUE: f64 = 4_294_967_296.0; // 2^32

/// 32-bit MurmurHash3 (x86 variant) of `input` with [`HASH_SEED`].
pub(crate) fn murmur_hash(input: &[u8]) -> std::io::Result<u32> {
    murmur3::murmur3_32(&mut Cursor::new(input), HASH_SEED)
}

/// Hash `bucketing_key` into an integer in `[0, 10000)`.
///
/// The result is bit-exact with the canonical MurmurHash3 32-bit algorithm, so independently
/// implemented clients sharing a configuration bucket every user identically.
pub fn bucket_value(bucketing_key: &str) -> Result<u32> {
    let hash = murmur_hash(bucketing_key.as_bytes()).map_err(|err| Error::InvalidBucketingInput {
        key: bucketing_key.to_owned(),
        source: Arc::new(err),
    })?;
    let ratio = hash as f64 / MAX_HASH_VALUE;
    Ok((ratio * MAX_TRAFFIC_VALUE as f64).floor() as u32)
}
