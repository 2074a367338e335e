//! Hinted election scheduler.
//!
//! Wakes periodically, and while the election container has hinted
//! vacancy walks the vote cache ordered by final tally, then tally. A
//! final tally at quorum activates the block outright; a plain tally over
//! the threshold activates it only once its dependents are confirmed,
//! recursing into unconfirmed dependents. Hashes we have no block for are
//! handed to the bootstrap trigger and stay cached.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use quill_consensus::{ActiveElections, ElectionBehavior, OnlineReps, VoteCache};
use quill_ledger::{Ledger, SavedBlock};
use quill_store::ReadTransaction;
use quill_types::{Amount, BlockHash};
use quill_utils::{StatType, Stats};

/// Callback used to bootstrap a missing hinted block.
pub type BootstrapTrigger = Box<dyn Fn(BlockHash) + Send + Sync>;

#[derive(Clone, Debug)]
pub struct HintedSchedulerConfig {
    /// How often the vote cache is swept.
    pub check_interval: Duration,
    /// Plain-tally activation threshold; zero means any tally qualifies.
    pub tally_threshold: Amount,
}

impl Default for HintedSchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(1000),
            tally_threshold: Amount::ZERO,
        }
    }
}

impl HintedSchedulerConfig {
    pub fn dev() -> Self {
        Self {
            check_interval: Duration::from_millis(100),
            ..Default::default()
        }
    }
}

struct Shared {
    config: HintedSchedulerConfig,
    ledger: Arc<Ledger>,
    vote_cache: Arc<VoteCache>,
    active: Arc<dyn ActiveElections>,
    online_reps: Arc<OnlineReps>,
    stats: Arc<Stats>,
    bootstrap: BootstrapTrigger,
    stopped: Mutex<bool>,
    condition: Condvar,
}

pub struct HintedScheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HintedScheduler {
    pub fn new(
        config: HintedSchedulerConfig,
        ledger: Arc<Ledger>,
        vote_cache: Arc<VoteCache>,
        active: Arc<dyn ActiveElections>,
        online_reps: Arc<OnlineReps>,
        stats: Arc<Stats>,
        bootstrap: BootstrapTrigger,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                ledger,
                vote_cache,
                active,
                online_reps,
                stats,
                bootstrap,
                stopped: Mutex::new(false),
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
                .name("sched_hinted".to_string())
                .spawn(move || shared.run())
                .expect("spawning the hinted scheduler thread"),
        );
    }

    pub fn stop(&self) {
        *self.shared.stopped.lock().unwrap() = true;
        self.shared.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// One synchronous sweep of the vote cache; the thread does this on
    /// its own every `check_interval`.
    pub fn run_iterative(&self) {
        self.shared.run_iterative();
    }

    /// Activate `hash` directly, as the sweep would.
    pub fn activate(&self, tx: &ReadTransaction, hash: &BlockHash, check_dependents: bool) -> bool {
        self.shared.activate(tx, hash, check_dependents)
    }
}

impl Drop for HintedScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn run(self: Arc<Self>) {
        let mut stopped = self.stopped.lock().unwrap();
        while !*stopped {
            let (guard, _) = self
                .condition
                .wait_timeout(stopped, self.config.check_interval)
                .unwrap();
            stopped = guard;
            if *stopped {
                return;
            }
            self.stats.inc(StatType::Hinting, "loop");

            if self.predicate() {
                drop(stopped);
                self.run_iterative();
                stopped = self.stopped.lock().unwrap();
            }
        }
    }

    /// Only bother sweeping when a hinted election could start.
    fn predicate(&self) -> bool {
        self.active.vacancy(ElectionBehavior::Hinted) > 0
    }

    fn run_iterative(&self) {
        let minimum_tally = self.config.tally_threshold;
        let minimum_final_tally = self.online_reps.delta();

        let tx = self.ledger.store.tx_begin_read();
        self.vote_cache
            .iterate(minimum_tally, minimum_final_tally, |entry| {
                if !self.predicate() {
                    return;
                }
                if entry.final_tally >= minimum_final_tally {
                    self.stats.inc(StatType::Hinting, "activate_final");
                    self.activate(&tx, &entry.hash, false);
                } else if entry.tally >= minimum_tally {
                    self.stats.inc(StatType::Hinting, "activate_normal");
                    self.activate(&tx, &entry.hash, true);
                }
            });
    }

    /// Try to start a hinted election for `hash`.
    ///
    /// Missing blocks trigger a bootstrap and return false (the cache
    /// entry survives for a later sweep). Confirmed blocks return false.
    /// With `check_dependents`, unconfirmed dependencies are activated
    /// recursively instead.
    fn activate(&self, tx: &ReadTransaction, hash: &BlockHash, check_dependents: bool) -> bool {
        let Some(block) = self.ledger.block(tx, hash) else {
            self.stats.inc(StatType::Hinting, "missing_block");
            (self.bootstrap)(*hash);
            return false;
        };

        if self.confirmed_or_being_confirmed(tx, hash) {
            self.stats.inc(StatType::Hinting, "already_confirmed");
            return false;
        }
        if check_dependents && !self.ledger.dependents_confirmed(tx, &block) {
            self.stats.inc(StatType::Hinting, "dependent_unconfirmed");
            self.activate_dependents(tx, &block);
            return false;
        }

        let result = self.active.insert(&block.block, ElectionBehavior::Hinted);
        self.stats.inc(
            StatType::Hinting,
            if result.inserted { "insert" } else { "insert_failed" },
        );
        true
    }

    fn activate_dependents(&self, tx: &ReadTransaction, block: &SavedBlock) {
        for hash in self.ledger.dependent_blocks(block) {
            if !hash.is_zero() {
                let activated = self.activate(tx, &hash, true);
                if activated {
                    self.stats.inc(StatType::Hinting, "dependent_activated");
                }
            }
        }
    }

    fn confirmed_or_being_confirmed(&self, tx: &ReadTransaction, hash: &BlockHash) -> bool {
        self.active.active_or_confirmed(hash) || self.ledger.block_confirmed(tx, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_consensus::{ElectionContainer, VoteCacheConfig};
    use quill_crypto::{keypair_from_seed, KeyPair};
    use quill_ledger::{BlockStatus, StateBlock, Vote, WorkThresholds};
    use quill_store::{Store, Table, Writer};
    use quill_types::{Account, HashOrAccount, WorkNonce};
    use std::sync::Mutex as StdMutex;

    const TABLES: &[Table] = &[
        Table::Accounts,
        Table::Blocks,
        Table::Pending,
        Table::ConfirmationHeight,
    ];

    struct Fixture {
        scheduler: HintedScheduler,
        ledger: Arc<Ledger>,
        vote_cache: Arc<VoteCache>,
        elections: Arc<ElectionContainer>,
        online_reps: Arc<OnlineReps>,
        genesis: KeyPair,
        bootstrapped: Arc<StdMutex<Vec<BlockHash>>>,
    }

    /// Rep weight fixed at 1000 for every account.
    fn fixture() -> Fixture {
        let store = Arc::new(Store::new());
        let ledger = Arc::new(Ledger::new(store, WorkThresholds::new(0)));
        let genesis = keypair_from_seed(&[1u8; 32]);
        {
            let tx = ledger.store.tx_begin_write(Writer::Generic, TABLES);
            ledger.initialize(&tx, &genesis);
        }
        let vote_cache = Arc::new(VoteCache::new(
            VoteCacheConfig::default(),
            Box::new(|_| Amount::raw(1000)),
        ));
        let elections = Arc::new(ElectionContainer::new(100));
        let online_reps = Arc::new(OnlineReps::new());
        let bootstrapped = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&bootstrapped);
        let scheduler = HintedScheduler::new(
            HintedSchedulerConfig::dev(),
            Arc::clone(&ledger),
            Arc::clone(&vote_cache),
            elections.clone(),
            Arc::clone(&online_reps),
            Arc::new(Stats::new()),
            Box::new(move |hash| sink.lock().unwrap().push(hash)),
        );
        Fixture {
            scheduler,
            ledger,
            vote_cache,
            elections,
            online_reps,
            genesis,
            bootstrapped,
        }
    }

    fn add_send(fx: &Fixture) -> Arc<quill_ledger::Block> {
        let tx = fx.ledger.store.tx_begin_write(Writer::Generic, TABLES);
        let info = fx.ledger.account_info(&tx, &fx.genesis.public).unwrap();
        let receiver = keypair_from_seed(&[2u8; 32]);
        let block = Arc::new(StateBlock::new(
            fx.genesis.public,
            info.head,
            fx.genesis.public,
            info.balance - Amount::raw(10),
            HashOrAccount::from(receiver.public),
            &fx.genesis,
            WorkNonce(0),
        ));
        assert_eq!(fx.ledger.process(&tx, &block), BlockStatus::Progress);
        block
    }

    fn final_vote_for(fx: &Fixture, hash: BlockHash) {
        let rep = keypair_from_seed(&[9u8; 32]);
        let vote = Vote::new_final(&rep, 1, vec![hash]);
        fx.vote_cache.vote(&hash, &vote);
    }

    #[test]
    fn final_tally_at_quorum_activates_hinted_election() {
        let fx = fixture();
        let send = add_send(&fx);

        // One online rep with weight 500: delta = 335, under the cached
        // vote's 1000.
        fx.online_reps
            .observe(Account::from_bytes([9; 32]), Amount::raw(500));
        final_vote_for(&fx, send.hash());

        fx.scheduler.run_iterative();
        assert!(fx.elections.active_or_confirmed(&send.hash()));
    }

    #[test]
    fn missing_block_triggers_bootstrap_and_keeps_cache_entry() {
        let fx = fixture();
        let unknown = BlockHash::new([0xAB; 32]);
        fx.online_reps
            .observe(Account::from_bytes([9; 32]), Amount::raw(500));
        final_vote_for(&fx, unknown);

        fx.scheduler.run_iterative();
        assert_eq!(fx.bootstrapped.lock().unwrap().as_slice(), &[unknown]);
        assert!(fx.elections.is_empty());
        // The entry stays cached for a later sweep.
        assert!(fx.vote_cache.find(&unknown).is_some());
    }

    #[test]
    fn confirmed_blocks_are_not_activated() {
        let fx = fixture();
        let send = add_send(&fx);
        {
            let tx = fx.ledger.store.tx_begin_write(Writer::Generic, TABLES);
            fx.ledger.confirm(&tx, &send.hash());
        }
        fx.online_reps
            .observe(Account::from_bytes([9; 32]), Amount::raw(500));
        final_vote_for(&fx, send.hash());

        fx.scheduler.run_iterative();
        assert!(fx.elections.is_empty());
    }

    #[test]
    fn plain_tally_activates_dependents_first() {
        let fx = fixture();
        let first = add_send(&fx);
        let second = add_send(&fx);

        // No online weight: quorum is zero... delta 0 means every final
        // tally qualifies, so use a plain (non-final) vote instead and
        // raise quorum out of reach.
        fx.online_reps
            .observe(Account::from_bytes([9; 32]), Amount::raw(1_000_000));
        let rep = keypair_from_seed(&[9u8; 32]);
        let vote = Vote::new(&rep, 1, vec![second.hash()]);
        fx.vote_cache.vote(&second.hash(), &vote);

        fx.scheduler.run_iterative();
        // `second` depends on the unconfirmed `first`; the dependent is
        // activated instead.
        assert!(fx.elections.active_or_confirmed(&first.hash()));
        assert!(!fx.elections.active_or_confirmed(&second.hash()));
    }

    #[test]
    fn no_vacancy_skips_the_sweep() {
        let fx = fixture();
        let send = add_send(&fx);
        fx.online_reps
            .observe(Account::from_bytes([9; 32]), Amount::raw(500));
        final_vote_for(&fx, send.hash());

        // Fill the hinted share of the container with other elections.
        for byte in 10..30u8 {
            let kp = keypair_from_seed(&[byte; 32]);
            let filler = Arc::new(StateBlock::new(
                kp.public,
                BlockHash::new([byte; 32]),
                kp.public,
                Amount::raw(1),
                HashOrAccount::ZERO,
                &kp,
                WorkNonce(0),
            ));
            fx.elections.insert(&filler, ElectionBehavior::Hinted);
        }
        assert!(fx.elections.vacancy(ElectionBehavior::Hinted) <= 0);

        fx.scheduler.run_iterative();
        assert!(!fx.elections.active_or_confirmed(&send.hash()));
    }

    #[test]
    fn thread_sweeps_periodically() {
        let fx = fixture();
        let send = add_send(&fx);
        fx.online_reps
            .observe(Account::from_bytes([9; 32]), Amount::raw(500));
        final_vote_for(&fx, send.hash());

        fx.scheduler.start();
        for _ in 0..100 {
            if fx.elections.active_or_confirmed(&send.hash()) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(fx.elections.active_or_confirmed(&send.hash()));
        fx.scheduler.stop();
    }
}
