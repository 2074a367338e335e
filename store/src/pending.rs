//! The `pending` table: (destination, send hash) → receivable amount.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use quill_types::{Account, Amount, BlockHash};

use crate::transaction::{Table, Transaction, WriteTransaction};

/// Key of a receivable entry: the destination account and the hash of the
/// send block that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PendingKey {
    pub account: Account,
    pub send_hash: BlockHash,
}

impl PendingKey {
    pub fn new(account: Account, send_hash: BlockHash) -> Self {
        Self { account, send_hash }
    }
}

/// A receivable amount and the account that sent it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInfo {
    pub source: Account,
    pub amount: Amount,
}

/// In-memory `pending` table.
pub struct PendingTable {
    entries: Mutex<BTreeMap<PendingKey, PendingInfo>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, _tx: &impl Transaction, key: &PendingKey) -> Option<PendingInfo> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn exists(&self, tx: &impl Transaction, key: &PendingKey) -> bool {
        self.get(tx, key).is_some()
    }

    pub fn put(&self, tx: &WriteTransaction, key: &PendingKey, info: &PendingInfo) {
        debug_assert!(tx.covers(Table::Pending));
        self.entries.lock().unwrap().insert(*key, info.clone());
    }

    pub fn del(&self, tx: &WriteTransaction, key: &PendingKey) {
        debug_assert!(tx.covers(Table::Pending));
        self.entries.lock().unwrap().remove(key);
    }

    /// Whether `account` has any receivable entry.
    pub fn any(&self, _tx: &impl Transaction, account: &Account) -> bool {
        let start = PendingKey::new(*account, BlockHash::ZERO);
        self.entries
            .lock()
            .unwrap()
            .range(start..)
            .next()
            .is_some_and(|(key, _)| key.account == *account)
    }
}
