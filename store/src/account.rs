//! The `accounts` table: account → head/open/representative/balance.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use quill_types::{Account, Amount, BlockHash};

use crate::transaction::{Table, Transaction, WriteTransaction};

/// Per-account chain summary, updated on every applied block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub head: BlockHash,
    pub open_block: BlockHash,
    pub representative: Account,
    pub balance: Amount,
    /// Seconds since the unix epoch of the last ledger modification.
    pub modified: u64,
    pub block_count: u64,
}

/// In-memory `accounts` table. Ordered by account so frontier iteration is
/// deterministic.
pub struct AccountTable {
    entries: Mutex<BTreeMap<Account, AccountInfo>>,
}

impl AccountTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, _tx: &impl Transaction, account: &Account) -> Option<AccountInfo> {
        self.entries.lock().unwrap().get(account).cloned()
    }

    pub fn exists(&self, tx: &impl Transaction, account: &Account) -> bool {
        self.get(tx, account).is_some()
    }

    pub fn put(&self, tx: &WriteTransaction, account: &Account, info: &AccountInfo) {
        debug_assert!(tx.covers(Table::Accounts));
        self.entries.lock().unwrap().insert(*account, info.clone());
    }

    pub fn del(&self, tx: &WriteTransaction, account: &Account) {
        debug_assert!(tx.covers(Table::Accounts));
        self.entries.lock().unwrap().remove(account);
    }

    pub fn count(&self) -> u64 {
        self.entries.lock().unwrap().len() as u64
    }

    /// Up to `max` (account, info) pairs starting at `start` inclusive, in
    /// account order.
    pub fn iter_from(
        &self,
        _tx: &impl Transaction,
        start: &Account,
        max: usize,
    ) -> Vec<(Account, AccountInfo)> {
        self.entries
            .lock()
            .unwrap()
            .range(*start..)
            .take(max)
            .map(|(account, info)| (*account, info.clone()))
            .collect()
    }

    /// The first account strictly after `start`, wrapping to the lowest
    /// account at the end. Returns `None` on an empty table.
    pub fn next_after(&self, _tx: &impl Transaction, start: &Account) -> Option<Account> {
        let entries = self.entries.lock().unwrap();
        let mut range = entries.range(*start..);
        match range.next() {
            Some((account, _)) if account != start => Some(*account),
            Some(_) => range.next().map(|(account, _)| *account),
            None => None,
        }
        .or_else(|| entries.keys().next().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Store, Writer};

    fn account(byte: u8) -> Account {
        Account::from_bytes([byte; 32])
    }

    fn info() -> AccountInfo {
        AccountInfo {
            head: BlockHash::new([9; 32]),
            open_block: BlockHash::new([8; 32]),
            representative: account(7),
            balance: Amount::raw(100),
            modified: 1000,
            block_count: 2,
        }
    }

    #[test]
    fn put_get_roundtrip() {
        let store = Store::new();
        let tx = store.tx_begin_write(Writer::Generic, &[Table::Accounts]);
        store.accounts.put(&tx, &account(1), &info());
        assert_eq!(store.accounts.get(&tx, &account(1)), Some(info()));
        assert!(store.accounts.exists(&tx, &account(1)));
    }

    #[test]
    fn iter_from_is_ordered_and_bounded() {
        let store = Store::new();
        let tx = store.tx_begin_write(Writer::Generic, &[Table::Accounts]);
        for byte in [3u8, 1, 2] {
            store.accounts.put(&tx, &account(byte), &info());
        }

        let page = store.accounts.iter_from(&tx, &account(1), 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].0, account(1));
        assert_eq!(page[1].0, account(2));

        let from_middle = store.accounts.iter_from(&tx, &account(2), 10);
        assert_eq!(from_middle.len(), 2);
    }

    #[test]
    fn next_after_wraps_around() {
        let store = Store::new();
        let tx = store.tx_begin_write(Writer::Generic, &[Table::Accounts]);
        store.accounts.put(&tx, &account(1), &info());
        store.accounts.put(&tx, &account(5), &info());

        assert_eq!(store.accounts.next_after(&tx, &account(1)), Some(account(5)));
        assert_eq!(store.accounts.next_after(&tx, &account(5)), Some(account(1)));
        assert_eq!(store.accounts.next_after(&tx, &account(9)), Some(account(1)));
    }
}
