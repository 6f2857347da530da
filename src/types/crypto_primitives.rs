/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! hBFT-rs does not sign messages. Digests provided by the [`sha2`] crate are placeholders for
//! authenticity: a message whose digest does not match its content is treated as forged.

use borsh::BorshSerialize;

// re-exports below.
pub use sha2::Sha256 as CryptoHasher;

use sha2::Digest as _;

use super::data_types::Digest;

/// Compute the [`Digest`] of `content`.
///
/// `content` is serialized with Borsh directly into a fresh SHA-256 hasher, so the digest depends only on
/// the serialized bytes.
pub fn digest<T: BorshSerialize>(content: &T) -> Digest {
    let mut hasher = CryptoHasher::new();
    // Writes into an in-memory hasher cannot fail.
    let _ = content.serialize(&mut hasher);
    Digest::new(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_and_content_sensitive() {
        let a = digest(&(1u64, vec![1u8, 2, 3]));
        let b = digest(&(1u64, vec![1u8, 2, 3]));
        let c = digest(&(1u64, vec![1u8, 2, 4]));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
