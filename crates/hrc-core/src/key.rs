//! Cache key derivation
//!
//! Keys are the first 128 bits of a SHA-256 digest, rendered as 32 lowercase
//! hex characters. Stored keys must stay resolvable, so the derivation must
//! never change within a deployment.

use sha2::{Digest, Sha256};

use crate::matcher::Fragment;

/// Length of every derived key
pub const KEY_LEN: usize = 32;

fn digest(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    hex::encode(&hash[..KEY_LEN / 2])
}

/// Hash of a matched fragment
pub fn derive_fragment_hash(fragment: &Fragment) -> String {
    digest(&fragment.material())
}

/// Final cache key for a logical `name` under a fragment hash
pub fn derive_joint_key(name: &str, fragment_hash: &str) -> String {
    digest(&format!("{}-{}", name, fragment_hash))
}
