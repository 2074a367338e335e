//! The pull-blocks strategy: request shaping and response verification.

use quill_messages::BlocksAckPayload;
use quill_types::{Account, HashOrAccount};

/// How the request addressed its start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryType {
    BlocksByHash,
    BlocksByAccount,
}

/// Outstanding pull-blocks request context, kept in the async tag.
#[derive(Clone, Debug)]
pub struct PullBlocksTag {
    /// The account being synced (priority bookkeeping target).
    pub account: Account,
    /// What the request's `start` field was.
    pub start: HashOrAccount,
    pub query: QueryType,
}

/// Verdict on a blocks response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyResult {
    Ok,
    /// The peer has nothing beyond what we asked from; benign.
    NothingNew,
    /// The blocks do not match the request or do not chain.
    Invalid,
}

impl PullBlocksTag {
    /// Verify a blocks response against this request.
    ///
    /// - `NothingNew` when the response is empty, or one block that merely
    ///   echoes the requested start.
    /// - `Invalid` when the first block does not match the requested
    ///   hash/account, or adjacent blocks do not form a previous → hash
    ///   chain.
    pub fn verify(&self, response: &BlocksAckPayload) -> VerifyResult {
        let blocks = &response.blocks;
        if blocks.is_empty() {
            return VerifyResult::NothingNew;
        }
        if blocks.len() == 1 && blocks[0].hash() == self.start.as_block_hash() {
            return VerifyResult::NothingNew;
        }

        let first = &blocks[0];
        match self.query {
            QueryType::BlocksByHash => {
                if first.hash() != self.start.as_block_hash() {
                    return VerifyResult::Invalid;
                }
            }
            QueryType::BlocksByAccount => {
                // Open and state blocks always carry the account field.
                if first.account_field() != Some(self.start.as_account()) {
                    return VerifyResult::Invalid;
                }
            }
        }

        let mut previous = blocks[0].hash();
        for block in &blocks[1..] {
            if block.previous() != previous {
                return VerifyResult::Invalid;
            }
            previous = block.hash();
        }
        VerifyResult::Ok
    }
}
