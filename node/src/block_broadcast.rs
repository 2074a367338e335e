//! Local block re-broadcast.
//!
//! Locally originated blocks are re-flooded periodically until they
//! confirm, so a block submitted during a connectivity blip still reaches
//! the network. Entries come in through the block processor's
//! `batch_processed` event (source local, result progress) and leave when
//! confirmed, rolled back, or too old.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use quill_ledger::{Block, BlockStatus, Ledger};
use quill_types::BlockHash;
use quill_utils::{Direction, StatType, Stats};

use crate::block_processor::{BlockProcessor, BlockSource};

/// How the broadcaster floods a block to peers.
pub type FloodCallback = Box<dyn Fn(&Arc<Block>) + Send + Sync>;

#[derive(Clone, Debug)]
pub struct BlockBroadcastConfig {
    pub enabled: bool,
    /// Bound on tracked local blocks; oldest evicted beyond it.
    pub max_size: usize,
    /// Thread wake interval.
    pub check_interval: Duration,
    /// Minimum time between re-broadcasts of one block.
    pub broadcast_interval: Duration,
    /// Entries older than this are dropped (once broadcast at least once).
    pub age_cutoff: Duration,
}

impl Default for BlockBroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 8192,
            check_interval: Duration::from_secs(30),
            broadcast_interval: Duration::from_secs(60),
            age_cutoff: Duration::from_secs(60 * 60),
        }
    }
}

impl BlockBroadcastConfig {
    pub fn dev() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            broadcast_interval: Duration::from_secs(1),
            ..Default::default()
        }
    }
}

struct LocalEntry {
    block: Arc<Block>,
    arrival: Instant,
    /// `None` until the first broadcast, forcing one on the next tick.
    last_broadcast: Option<Instant>,
}

struct BroadcastState {
    entries: VecDeque<LocalEntry>,
    stopped: bool,
}

struct Shared {
    config: BlockBroadcastConfig,
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
    flood: FloodCallback,
    state: Mutex<BroadcastState>,
    condition: Condvar,
}

pub struct BlockBroadcast {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BlockBroadcast {
    pub fn new(
        config: BlockBroadcastConfig,
        ledger: Arc<Ledger>,
        block_processor: &BlockProcessor,
        stats: Arc<Stats>,
        flood: FloodCallback,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            config,
            ledger,
            stats,
            flood,
            state: Mutex::new(BroadcastState {
                entries: VecDeque::new(),
                stopped: false,
            }),
            condition: Condvar::new(),
        });

        if shared.config.enabled {
            let weak = Arc::downgrade(&shared);
            block_processor.on_batch_processed(Box::new(move |batch| {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let mut should_notify = false;
                for (status, context) in batch {
                    // Only local blocks that actually landed are worth
                    // re-flooding.
                    if *status == BlockStatus::Progress && context.source == BlockSource::Local {
                        shared.insert(Arc::clone(&context.block));
                        should_notify = true;
                    }
                }
                if should_notify {
                    shared.condition.notify_all();
                }
            }));

            let weak = Arc::downgrade(&shared);
            block_processor.on_rolled_back(Box::new(move |block| {
                if let Some(shared) = weak.upgrade() {
                    shared.erase(&block.hash());
                }
            }));
        }

        Arc::new(Self {
            shared,
            thread: Mutex::new(None),
        })
    }

    pub fn start(&self) {
        if !self.shared.config.enabled {
            return;
        }
        let mut thread = self.thread.lock().unwrap();
        debug_assert!(thread.is_none());
        let shared = Arc::clone(&self.shared);
        *thread = Some(
            std::thread::Builder::new()
                .name("blck_broadcast".to_string())
                .spawn(move || shared.run())
                .expect("spawning the block broadcast thread"),
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

    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().entries.len()
    }

    /// One broadcast/cleanup pass; the thread does this on its own every
    /// `check_interval`.
    pub fn run_once(&self) {
        self.shared.cleanup();
        self.shared.broadcast_due();
    }
}

impl Drop for BlockBroadcast {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn insert(&self, block: Arc<Block>) {
        let mut state = self.state.lock().unwrap();
        self.stats.inc(StatType::BlockBroadcaster, "insert");
        state.entries.push_back(LocalEntry {
            block,
            arrival: Instant::now(),
            last_broadcast: None,
        });
        while state.entries.len() > self.config.max_size {
            self.stats.inc(StatType::BlockBroadcaster, "overfill");
            state.entries.pop_front();
        }
    }

    fn erase(&self, hash: &BlockHash) {
        let mut state = self.state.lock().unwrap();
        let before = state.entries.len();
        state.entries.retain(|entry| entry.block.hash() != *hash);
        let erased = before - state.entries.len();
        if erased > 0 {
            self.stats
                .add(StatType::BlockBroadcaster, "rollback", erased as u64);
        }
    }

    fn run(self: Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        while !state.stopped {
            self.stats.inc(StatType::BlockBroadcaster, "loop");
            let (guard, _) = self
                .condition
                .wait_timeout(state, self.config.check_interval)
                .unwrap();
            state = guard;
            if state.stopped {
                return;
            }
            drop(state);

            self.cleanup();
            self.broadcast_due();

            state = self.state.lock().unwrap();
        }
    }

    /// Evict entries that confirmed or aged out. Blocks never broadcast
    /// are kept regardless, so each gets flooded at least once.
    fn cleanup(&self) {
        let tx = self.ledger.store.tx_begin_read();
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        state.entries.retain(|entry| {
            if entry.last_broadcast.is_none() {
                return true;
            }
            if now.duration_since(entry.arrival) >= self.config.age_cutoff {
                self.stats.inc(StatType::BlockBroadcaster, "erase_old");
                return false;
            }
            if self.ledger.block_confirmed(&tx, &entry.block.hash()) {
                self.stats
                    .inc(StatType::BlockBroadcaster, "erase_confirmed");
                return false;
            }
            true
        });
    }

    fn broadcast_due(&self) {
        let now = Instant::now();
        let due: Vec<Arc<Block>> = {
            let mut state = self.state.lock().unwrap();
            state
                .entries
                .iter_mut()
                .filter(|entry| match entry.last_broadcast {
                    None => true,
                    Some(last) => now.duration_since(last) >= self.config.broadcast_interval,
                })
                .map(|entry| {
                    entry.last_broadcast = Some(now);
                    Arc::clone(&entry.block)
                })
                .collect()
        };
        // Flood outside the lock.
        for block in due {
            self.stats
                .inc_dir(StatType::BlockBroadcaster, "broadcast", Direction::Out);
            (self.flood)(&block);
        }
    }
}
