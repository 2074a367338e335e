//! Transactions and the process-wide write queue.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// Tables a write transaction may be scoped to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Table {
    Accounts,
    Blocks,
    Pending,
    ConfirmationHeight,
}

/// Named writers competing for the single write token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Writer {
    ProcessBatch,
    ConfirmationHeight,
    Generic,
}

/// Witness for read access. Any number may exist concurrently.
///
/// The in-memory tables lock per operation, so a long-lived read
/// transaction never pins a snapshot; `refresh_if_needed` is kept so batch
/// loops written against a persistent backend read the same either way.
pub struct ReadTransaction {
    _private: (),
}

impl ReadTransaction {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }

    pub fn refresh_if_needed(&mut self) {}
}

/// Witness for write access. Holds the write-queue token; exactly one
/// exists at a time across the whole process.
pub struct WriteTransaction {
    _guard: WriteGuard,
    tables: Vec<Table>,
}

impl WriteTransaction {
    pub(crate) fn new(guard: WriteGuard, tables: &[Table]) -> Self {
        Self {
            _guard: guard,
            tables: tables.to_vec(),
        }
    }

    /// Whether `table` is within this transaction's declared scope.
    pub fn covers(&self, table: Table) -> bool {
        self.tables.contains(&table)
    }
}

/// Read access marker implemented by both transaction kinds.
pub trait Transaction {}

impl Transaction for ReadTransaction {}
impl Transaction for WriteTransaction {}

/// Serializes writers: one holds the token at a time, FIFO by arrival.
pub struct WriteQueue {
    state: Mutex<QueueState>,
    condvar: Condvar,
}

struct QueueState {
    held: bool,
    waiting: VecDeque<u64>,
    next_ticket: u64,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                held: false,
                waiting: VecDeque::new(),
                next_ticket: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Block until the token is free and it is this caller's turn.
    pub fn wait(self: &Arc<Self>, _writer: Writer) -> WriteGuard {
        let mut state = self.state.lock().unwrap();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiting.push_back(ticket);
        while state.held || state.waiting.front() != Some(&ticket) {
            state = self.condvar.wait(state).unwrap();
        }
        state.waiting.pop_front();
        state.held = true;
        WriteGuard {
            queue: Arc::clone(self),
        }
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Token proving exclusive write access; released on drop.
pub struct WriteGuard {
    queue: Arc<WriteQueue>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock().unwrap();
        state.held = false;
        drop(state);
        self.queue.condvar.notify_all();
    }
}
