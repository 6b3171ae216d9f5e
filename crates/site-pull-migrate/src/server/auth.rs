//! Request authentication.

use sha2::{Digest, Sha256};

/// Compare a presented signature against the stored one.
///
/// Both sides are hashed first so the byte comparison runs over
/// fixed-length digests, independent of where the strings differ.
pub fn verify_signature(presented: &str, stored: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(stored.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
