//! Blake2b hashing for blocks and proof-of-work.

use blake2::digest::consts::{U32, U8};
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;
type Blake2b64 = Blake2b<U8>;

/// Compute a 256-bit blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hash multiple byte slices in sequence (avoids concatenation allocation).
pub fn blake2b_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// The 64-bit proof-of-work digest: blake2b-64 of nonce (little-endian)
/// followed by the 32-byte work root, interpreted little-endian.
pub fn work_digest(nonce: u64, root: &[u8; 32]) -> u64 {
    let mut hasher = Blake2b64::new();
    hasher.update(nonce.to_le_bytes());
    hasher.update(root);
    let result = hasher.finalize();
    let mut output = [0u8; 8];
    output.copy_from_slice(&result);
    u64::from_le_bytes(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake2b_deterministic() {
        assert_eq!(blake2b_256(b"hello quill"), blake2b_256(b"hello quill"));
    }

    #[test]
    fn blake2b_different_inputs() {
        assert_ne!(blake2b_256(b"hello"), blake2b_256(b"world"));
    }

    #[test]
    fn multi_matches_concatenation() {
        let joined = blake2b_256(b"abcdef");
        let parts = blake2b_multi(&[b"abc", b"def"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn work_digest_varies_with_nonce() {
        let root = [7u8; 32];
        assert_ne!(work_digest(1, &root), work_digest(2, &root));
    }
}
