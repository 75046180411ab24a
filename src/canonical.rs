//! Canonical serialization for deterministic hashing.
//!
//! This module provides functions to serialize data in a canonical,
//! deterministic format suitable for stable identity derivation and
//! content addressing.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: struct fields serialize in declaration order
//! - Stable Vec order: vectors serialize in index order
//! - No HashMap allowed: use BTreeMap for maps in hashed data
//! - Floats are quantized before hashing (see [`quantize_f64`]) so the same
//!   logical value hashes identically across platforms

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Scale factor applied before rounding floats to an integer for hashing.
pub const FLOAT_QUANTIZATION_FACTOR: f64 = 1_000_000.0;

/// Quantize a float to a stable integer representation for hashing.
pub fn quantize_f64(value: f64) -> i64 {
    (value * FLOAT_QUANTIZATION_FACTOR).round() as i64
}

/// Serialize a value to canonical JSON bytes for hashing.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("canonical serialization failed")
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    let bytes = to_canonical_bytes(value);
    xxh64(&bytes, 0)
}

/// Compute canonical hash and return as a fixed-width hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

/// Derive a stable id from an identity tuple, prefixed for readability.
///
/// Used for node/edge/snapshot identities: the same identity tuple always
/// produces the same id, so re-discovering an already-known resource never
/// creates a duplicate node.
pub fn stable_id<T: Serialize>(prefix: &str, identity: &T) -> String {
    format!("{prefix}_{}", canonical_hash_hex(identity))
}
