//! The `blocks` table: hash → serialized block + sideband.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use quill_types::{Account, Amount, BlockHash};

use crate::transaction::{Table, Transaction, WriteTransaction};

/// Metadata computed when a block is applied to the ledger.
///
/// Never travels on the wire; reconstructed from scratch if the chain is
/// replayed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sideband {
    /// Chain height of this block, starting at 1 for the open block.
    pub height: u64,
    /// Seconds since the unix epoch when the block was applied locally.
    pub timestamp: u64,
    /// The next block in the account chain; zero at the head.
    pub successor: BlockHash,
    /// The account owning the chain this block belongs to.
    pub account: Account,
    /// Account balance after this block.
    pub balance: Amount,
    pub is_send: bool,
    pub is_receive: bool,
}

/// A stored block: its wire bytes plus sideband.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub bytes: Vec<u8>,
    pub sideband: Sideband,
}

/// In-memory `blocks` table.
pub struct BlockTable {
    entries: Mutex<HashMap<BlockHash, BlockRecord>>,
}

impl BlockTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, _tx: &impl Transaction, hash: &BlockHash) -> Option<BlockRecord> {
        self.entries.lock().unwrap().get(hash).cloned()
    }

    pub fn exists(&self, tx: &impl Transaction, hash: &BlockHash) -> bool {
        self.get(tx, hash).is_some()
    }

    pub fn put(&self, tx: &WriteTransaction, hash: &BlockHash, record: &BlockRecord) {
        debug_assert!(tx.covers(Table::Blocks));
        self.entries.lock().unwrap().insert(*hash, record.clone());
    }

    pub fn del(&self, tx: &WriteTransaction, hash: &BlockHash) {
        debug_assert!(tx.covers(Table::Blocks));
        self.entries.lock().unwrap().remove(hash);
    }

    /// The hash of the block following `hash` in its account chain, if any.
    pub fn successor(&self, tx: &impl Transaction, hash: &BlockHash) -> Option<BlockHash> {
        self.get(tx, hash)
            .map(|record| record.sideband.successor)
            .filter(|successor| !successor.is_zero())
    }

    /// Rewrite the successor pointer of `hash`.
    pub fn set_successor(&self, tx: &WriteTransaction, hash: &BlockHash, successor: BlockHash) {
        debug_assert!(tx.covers(Table::Blocks));
        if let Some(record) = self.entries.lock().unwrap().get_mut(hash) {
            record.sideband.successor = successor;
        }
    }

    pub fn count(&self) -> u64 {
        self.entries.lock().unwrap().len() as u64
    }
}
