//! The `confirmation_height` table: account → cemented height/frontier.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use quill_types::{Account, BlockHash};

use crate::transaction::{Table, Transaction, WriteTransaction};

/// How far an account chain is cemented.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationHeightInfo {
    /// Number of confirmed blocks; blocks at height ≤ this are safe from
    /// rollback.
    pub height: u64,
    /// Hash of the highest confirmed block.
    pub frontier: BlockHash,
}

impl Default for ConfirmationHeightInfo {
    fn default() -> Self {
        Self {
            height: 0,
            frontier: BlockHash::ZERO,
        }
    }
}

/// In-memory `confirmation_height` table.
pub struct ConfirmationHeightTable {
    entries: Mutex<HashMap<Account, ConfirmationHeightInfo>>,
}

impl ConfirmationHeightTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, _tx: &impl Transaction, account: &Account) -> Option<ConfirmationHeightInfo> {
        self.entries.lock().unwrap().get(account).cloned()
    }

    pub fn put(&self, tx: &WriteTransaction, account: &Account, info: &ConfirmationHeightInfo) {
        debug_assert!(tx.covers(Table::ConfirmationHeight));
        self.entries.lock().unwrap().insert(*account, info.clone());
    }

    pub fn del(&self, tx: &WriteTransaction, account: &Account) {
        debug_assert!(tx.covers(Table::ConfirmationHeight));
        self.entries.lock().unwrap().remove(account);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Store, Writer};

    #[test]
    fn default_is_unconfirmed() {
        let info = ConfirmationHeightInfo::default();
        assert_eq!(info.height, 0);
        assert!(info.frontier.is_zero());
    }

    #[test]
    fn put_get_roundtrip() {
        let store = Store::new();
        let tx = store.tx_begin_write(Writer::ConfirmationHeight, &[Table::ConfirmationHeight]);
        let account = Account::from_bytes([4; 32]);
        let info = ConfirmationHeightInfo {
            height: 3,
            frontier: BlockHash::new([5; 32]),
        };

        store.confirmation_height.put(&tx, &account, &info);
        assert_eq!(store.confirmation_height.get(&tx, &account), Some(info));
    }
}
