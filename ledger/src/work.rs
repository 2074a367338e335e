//! Proof-of-work validation thresholds.

use quill_crypto::work_digest;
use quill_types::NetworkId;

use crate::block::Block;

/// Minimum work difficulty per network.
///
/// Only validation lives here; producing work at live difficulty is the
/// job of an external work generator.
#[derive(Clone, Copy, Debug)]
pub struct WorkThresholds {
    pub threshold: u64,
}

impl WorkThresholds {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    pub fn for_network(network: NetworkId) -> Self {
        match network {
            NetworkId::Live | NetworkId::Beta => Self::new(0xFFFF_FFF8_0000_0000),
            NetworkId::Dev | NetworkId::Test => Self::new(0xFE00_0000_0000_0000),
        }
    }

    /// Whether `block`'s nonce meets the threshold for its work root.
    pub fn validate(&self, block: &Block) -> bool {
        work_digest(block.work().number(), &block.work_root()) >= self.threshold
    }

    /// Brute-force a nonce meeting the threshold. Dev/test helper; real
    /// nodes delegate to the external generator.
    pub fn solve(&self, root: &[u8; 32]) -> u64 {
        let mut nonce = 0u64;
        loop {
            if work_digest(nonce, root) >= self.threshold {
                return nonce;
            }
            nonce = nonce.wrapping_add(1);
        }
    }
}
