//! Sequential account walk over the local ledger.
//!
//! Fills coverage gaps the priority set cannot see: the iterator hands out
//! accounts in address order and wraps around at the end. Until the first
//! wraparound the scan is in warmup, during which throttling is
//! suppressed (a fresh ledger always looks "useless" to the throttle).

use quill_ledger::Ledger;
use quill_types::Account;

pub struct LedgerScan {
    next: Account,
    warmup: bool,
}

impl LedgerScan {
    pub fn new() -> Self {
        Self {
            next: Account::ZERO,
            warmup: true,
        }
    }

    pub fn warmup(&self) -> bool {
        self.warmup
    }

    /// The next account in address order, or zero on an empty ledger.
    pub fn next(&mut self, ledger: &Ledger) -> Account {
        let tx = ledger.store.tx_begin_read();
        match ledger.store.accounts.next_after(&tx, &self.next) {
            Some(account) => {
                if account <= self.next {
                    // Wrapped around: the first full pass is complete.
                    self.warmup = false;
                }
                self.next = account;
                account
            }
            None => Account::ZERO,
        }
    }
}

impl Default for LedgerScan {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_ledger::WorkThresholds;
    use quill_store::{AccountInfo, Store, Table, Writer};
    use quill_types::{Amount, BlockHash};
    use std::sync::Arc;

    fn ledger_with_accounts(bytes: &[u8]) -> Ledger {
        let store = Arc::new(Store::new());
        let ledger = Ledger::new(store, WorkThresholds::new(0));
        let tx = ledger
            .store
            .tx_begin_write(Writer::Generic, &[Table::Accounts]);
        for &byte in bytes {
            ledger.store.accounts.put(
                &tx,
                &Account::from_bytes([byte; 32]),
                &AccountInfo {
                    head: BlockHash::new([byte; 32]),
                    open_block: BlockHash::new([byte; 32]),
                    representative: Account::from_bytes([byte; 32]),
                    balance: Amount::raw(1),
                    modified: 0,
                    block_count: 1,
                },
            );
        }
        ledger
    }

    #[test]
    fn walks_accounts_in_order_and_wraps() {
        let ledger = ledger_with_accounts(&[1, 2, 3]);
        let mut scan = LedgerScan::new();
        assert!(scan.warmup());

        assert_eq!(scan.next(&ledger), Account::from_bytes([1; 32]));
        assert_eq!(scan.next(&ledger), Account::from_bytes([2; 32]));
        assert_eq!(scan.next(&ledger), Account::from_bytes([3; 32]));
        // Wraparound ends warmup.
        assert_eq!(scan.next(&ledger), Account::from_bytes([1; 32]));
        assert!(!scan.warmup());
    }

    #[test]
    fn empty_ledger_yields_zero() {
        let ledger = ledger_with_accounts(&[]);
        let mut scan = LedgerScan::new();
        assert!(scan.next(&ledger).is_zero());
    }
}
