//! Ledger store for the Quill node.
//!
//! The pipeline consumes the store through four tables (`accounts`,
//! `blocks`, `pending`, `confirmation_height`) plus read/write transactions
//! and a process-wide write queue that serializes writers. This crate ships
//! the in-memory implementation; a persistent backend plugs in behind the
//! same surface.
//!
//! The in-memory tables take their own short-lived locks per operation, so
//! transactions here are markers: a [`ReadTransaction`] witnesses read scope
//! and a [`WriteTransaction`] carries the exclusive write-queue token,
//! guaranteeing the one-writer-at-a-time ordering the pipeline relies on.

pub mod account;
pub mod block;
pub mod confirmation_height;
pub mod error;
pub mod pending;
pub mod transaction;

pub use account::{AccountInfo, AccountTable};
pub use block::{BlockRecord, BlockTable, Sideband};
pub use confirmation_height::{ConfirmationHeightInfo, ConfirmationHeightTable};
pub use error::StoreError;
pub use pending::{PendingInfo, PendingKey, PendingTable};
pub use transaction::{
    ReadTransaction, Table, Transaction, WriteGuard, WriteQueue, WriteTransaction, Writer,
};

use std::sync::Arc;

/// The assembled store: four tables plus the write queue.
pub struct Store {
    pub accounts: AccountTable,
    pub blocks: BlockTable,
    pub pending: PendingTable,
    pub confirmation_height: ConfirmationHeightTable,
    write_queue: Arc<WriteQueue>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            accounts: AccountTable::new(),
            blocks: BlockTable::new(),
            pending: PendingTable::new(),
            confirmation_height: ConfirmationHeightTable::new(),
            write_queue: Arc::new(WriteQueue::new()),
        }
    }

    pub fn write_queue(&self) -> Arc<WriteQueue> {
        Arc::clone(&self.write_queue)
    }

    /// Begin a read transaction. Cheap; any number may be open at once.
    pub fn tx_begin_read(&self) -> ReadTransaction {
        ReadTransaction::new()
    }

    /// Begin a write transaction scoped to `tables`.
    ///
    /// Blocks until the write queue grants the token; exactly one write
    /// transaction exists at a time across the process.
    pub fn tx_begin_write(&self, writer: Writer, tables: &[Table]) -> WriteTransaction {
        let guard = self.write_queue.wait(writer);
        WriteTransaction::new(guard, tables)
    }

    /// Number of blocks in the store.
    pub fn block_count(&self) -> u64 {
        self.blocks.count()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_types::{Account, Amount, BlockHash};

    #[test]
    fn write_transaction_scopes_tables() {
        let store = Store::new();
        let tx = store.tx_begin_write(Writer::Generic, &[Table::Blocks, Table::Accounts]);
        assert!(tx.covers(Table::Blocks));
        assert!(tx.covers(Table::Accounts));
        assert!(!tx.covers(Table::Pending));
    }

    #[test]
    fn tables_start_empty() {
        let store = Store::new();
        let tx = store.tx_begin_read();
        assert_eq!(store.block_count(), 0);
        assert!(store.accounts.get(&tx, &Account::from_bytes([1; 32])).is_none());
        assert!(store
            .confirmation_height
            .get(&tx, &Account::from_bytes([1; 32]))
            .is_none());
    }

    #[test]
    fn second_writer_waits_for_token() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let store = Arc::new(Store::new());
        let tx = store.tx_begin_write(Writer::ProcessBatch, &[Table::Blocks]);

        let acquired = Arc::new(AtomicBool::new(false));
        let handle = {
            let store = Arc::clone(&store);
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                let _tx = store.tx_begin_write(Writer::Generic, &[Table::Blocks]);
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(tx);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn pending_put_get_del() {
        let store = Store::new();
        let tx = store.tx_begin_write(Writer::Generic, &[Table::Pending]);
        let key = PendingKey::new(Account::from_bytes([1; 32]), BlockHash::new([2; 32]));
        let info = PendingInfo {
            source: Account::from_bytes([3; 32]),
            amount: Amount::raw(500),
        };

        store.pending.put(&tx, &key, &info);
        assert_eq!(store.pending.get(&tx, &key), Some(info.clone()));

        store.pending.del(&tx, &key);
        assert_eq!(store.pending.get(&tx, &key), None);
    }
}
