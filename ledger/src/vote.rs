//! Representative votes.

use quill_crypto::{blake2b_multi, sign_message, verify_signature, KeyPair};
use quill_types::stream::{StreamError, StreamReader};
use quill_types::{Account, BlockHash, Signature};

/// High bit of the vote timestamp; set for final votes, committing the
/// representative to the hashes irrevocably.
pub const TIMESTAMP_FINAL_BIT: u64 = 1 << 63;

/// A vote by one representative for up to 15 block hashes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub account: Account,
    pub signature: Signature,
    /// Milliseconds timestamp; bit 63 marks the vote final.
    pub timestamp: u64,
    pub hashes: Vec<BlockHash>,
}

impl Vote {
    pub const MAX_HASHES: usize = 15;

    pub fn new(keypair: &KeyPair, timestamp: u64, hashes: Vec<BlockHash>) -> Self {
        debug_assert!(hashes.len() <= Self::MAX_HASHES);
        let mut vote = Self {
            account: keypair.public,
            signature: Signature::ZERO,
            timestamp,
            hashes,
        };
        vote.signature = sign_message(&vote.digest(), keypair);
        vote
    }

    pub fn new_final(keypair: &KeyPair, timestamp: u64, hashes: Vec<BlockHash>) -> Self {
        Self::new(keypair, timestamp | TIMESTAMP_FINAL_BIT, hashes)
    }

    pub fn is_final(&self) -> bool {
        timestamp_is_final(self.timestamp)
    }

    /// The bytes representatives sign: a domain prefix, the hashes, and the
    /// timestamp.
    fn digest(&self) -> [u8; 32] {
        let mut parts: Vec<&[u8]> = vec![b"vote "];
        for hash in &self.hashes {
            parts.push(hash.as_bytes());
        }
        let timestamp_bytes = self.timestamp.to_le_bytes();
        parts.push(&timestamp_bytes);
        blake2b_multi(&parts)
    }

    pub fn validate(&self) -> bool {
        verify_signature(&self.digest(), &self.signature, &self.account)
    }

    /// Serialized payload size for `count` hashes.
    pub fn serialized_size(count: usize) -> usize {
        32 + 64 + 8 + count * 32
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.account.as_bytes());
        out.extend_from_slice(self.signature.as_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        for hash in &self.hashes {
            out.extend_from_slice(hash.as_bytes());
        }
    }

    pub fn deserialize(reader: &mut StreamReader, count: usize) -> Result<Self, StreamError> {
        let account = Account::from_bytes(reader.read_array_32()?);
        let signature = Signature(reader.read_array_64()?);
        let timestamp = reader.read_u64_le()?;
        let mut hashes = Vec::with_capacity(count);
        for _ in 0..count {
            hashes.push(BlockHash::new(reader.read_array_32()?));
        }
        Ok(Self {
            account,
            signature,
            timestamp,
            hashes,
        })
    }
}

/// Whether a raw vote timestamp has the final bit set.
pub fn timestamp_is_final(timestamp: u64) -> bool {
    timestamp & TIMESTAMP_FINAL_BIT != 0
}
