//! Priority election scheduler.
//!
//! `activate` looks at an account's next unconfirmed block; if its
//! dependencies are confirmed it enters the bucket queue keyed by the
//! larger of the block's balance and the confirmed frontier's balance.
//! The scheduler thread pops entries whenever the election container has
//! vacancy. A manual queue (RPC-originated elections) takes precedence.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use quill_consensus::{ActiveElections, ElectionBehavior};
use quill_ledger::{Block, Ledger};
use quill_store::Transaction;
use quill_types::Account;
use quill_utils::{StatType, Stats};

use super::buckets::BucketQueue;

struct SchedulerState {
    queue: BucketQueue,
    manual: VecDeque<(Arc<Block>, ElectionBehavior)>,
    stopped: bool,
}

struct Shared {
    ledger: Arc<Ledger>,
    active: Arc<dyn ActiveElections>,
    stats: Arc<Stats>,
    state: Mutex<SchedulerState>,
    condition: Condvar,
}

pub struct PriorityScheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PriorityScheduler {
    pub fn new(ledger: Arc<Ledger>, active: Arc<dyn ActiveElections>, stats: Arc<Stats>) -> Self {
        Self {
            shared: Arc::new(Shared {
                ledger,
                active,
                stats,
                state: Mutex::new(SchedulerState {
                    queue: BucketQueue::new(),
                    manual: VecDeque::new(),
                    stopped: false,
                }),
                condition: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut thread = self.thread.lock().unwrap();
        debug_assert!(thread.is_none());
        let shared = Arc::clone(&self.shared);
        *thread = Some(
            std::thread::Builder::new()
                .name("sched_priority".to_string())
                .spawn(move || shared.run())
                .expect("spawning the priority scheduler thread"),
        );
    }

    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stopped = true;
        }
        self.shared.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Consider `account`'s next unconfirmed block for an election.
    /// Returns whether a block entered the queue.
    pub fn activate(&self, tx: &impl Transaction, account: &Account) -> bool {
        debug_assert!(!account.is_zero());
        let shared = &self.shared;
        let Some(info) = shared.ledger.account_info(tx, account) else {
            return false;
        };
        let conf = shared
            .ledger
            .store
            .confirmation_height
            .get(tx, account)
            .unwrap_or_default();
        if conf.height >= info.block_count {
            return false; // Everything already confirmed.
        }

        // The next unconfirmed block: the open block, or the successor of
        // the confirmed frontier.
        let next_hash = if conf.height == 0 {
            Some(info.open_block)
        } else {
            shared.ledger.store.blocks.successor(tx, &conf.frontier)
        };
        let Some(next_hash) = next_hash else {
            return false;
        };
        let Some(next) = shared.ledger.block(tx, &next_hash) else {
            return false;
        };
        if !shared.ledger.dependents_confirmed(tx, &next) {
            return false;
        }

        let balance = next.balance();
        let previous_balance = shared
            .ledger
            .balance(tx, &conf.frontier)
            .unwrap_or(quill_types::Amount::ZERO);
        let priority = balance.max(previous_balance);

        shared.stats.inc(StatType::ElectionScheduler, "activated");
        tracing::trace!(
            target: "election_scheduler",
            account = %account,
            block = %next_hash,
            time = info.modified,
            priority = %priority,
            "block activated"
        );

        {
            let mut state = shared.state.lock().unwrap();
            state.queue.push(info.modified, next.block, priority);
        }
        shared.condition.notify_all();
        true
    }

    /// Queue a block for an election directly, bypassing activation.
    pub fn manual(&self, block: Arc<Block>, behavior: ElectionBehavior) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.manual.push_back((block, behavior));
        }
        self.shared.condition.notify_all();
    }

    /// Wait until the queues drain or the container has no vacancy.
    pub fn flush(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while !state.stopped
            && !(state.queue.is_empty() && state.manual.is_empty())
            && self.shared.active.vacancy(ElectionBehavior::Priority) > 0
        {
            state = self.shared.condition.wait(state).unwrap();
        }
    }

    /// Wake the scheduler thread; called when election vacancy opens up.
    pub fn notify(&self) {
        self.shared.condition.notify_all();
    }

    pub fn len(&self) -> usize {
        let state = self.shared.state.lock().unwrap();
        state.queue.len() + state.manual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PriorityScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn run(self: Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.stopped {
                return;
            }
            let manual_ready = !state.manual.is_empty();
            let priority_ready = !state.queue.is_empty()
                && self.active.vacancy(ElectionBehavior::Priority) > 0;

            if manual_ready {
                if let Some((block, behavior)) = state.manual.pop_front() {
                    drop(state);
                    self.stats
                        .inc(StatType::ElectionScheduler, "insert_manual");
                    self.active.insert(&block, behavior);
                    self.condition.notify_all();
                    state = self.state.lock().unwrap();
                }
            } else if priority_ready {
                if let Some(block) = state.queue.pop() {
                    drop(state);
                    self.stats
                        .inc(StatType::ElectionScheduler, "insert_priority");
                    let result = self.active.insert(&block, ElectionBehavior::Priority);
                    if result.inserted {
                        self.stats
                            .inc(StatType::ElectionScheduler, "insert_priority_success");
                    }
                    self.condition.notify_all();
                    state = self.state.lock().unwrap();
                }
            } else {
                state = self.condition.wait(state).unwrap();
            }
        }
    }
}
