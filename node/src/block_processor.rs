//! Block processing pipeline.
//!
//! Two FIFO queues (normal and forced) feed a single processing thread.
//! Each pass the thread takes the write-queue token, opens one write
//! transaction spanning the accounts/blocks/pending/confirmation tables,
//! and applies blocks until the batch limits are hit. Forced blocks are
//! drained first and may displace an existing fork winner by rolling the
//! current successor back. After commit, per-block promises resolve and
//! the `batch_processed` observers run on the processing thread.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use quill_consensus::{ActiveElections, LocalVoteHistory};
use quill_ledger::{Block, BlockStatus, Ledger, WorkThresholds};
use quill_store::{Table, Writer};
use quill_types::HashOrAccount;
use quill_utils::{StatType, Stats};

use crate::unchecked::UncheckedMap;

/// Where a block entered the pipeline from. Preserved through the queue so
/// observers can treat sources differently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSource {
    Live,
    Bootstrap,
    Unchecked,
    Local,
    Forced,
}

impl BlockSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Bootstrap => "bootstrap",
            Self::Unchecked => "unchecked",
            Self::Local => "local",
            Self::Forced => "forced",
        }
    }
}

/// A block plus its ingestion metadata.
#[derive(Clone)]
pub struct BlockContext {
    pub block: Arc<Block>,
    pub source: BlockSource,
    pub arrival: Instant,
}

/// Observer payload: one entry per block of the committed batch.
pub type BatchProcessed = [(BlockStatus, BlockContext)];

#[derive(Clone, Debug)]
pub struct BlockProcessorConfig {
    /// Reject `add` beyond this many queued blocks.
    pub full_size: usize,
    /// Soft deadline for one batch.
    pub batch_max_time: Duration,
    /// Blocks per batch before the deadline is honored.
    pub batch_size: usize,
    /// Hard cap on ledger writes per transaction.
    pub store_batch_size: usize,
    /// How long `add_blocking` waits before giving up.
    pub block_process_timeout: Duration,
}

impl Default for BlockProcessorConfig {
    fn default() -> Self {
        Self {
            full_size: 65536,
            batch_max_time: Duration::from_millis(500),
            batch_size: 256,
            store_batch_size: 65536,
            block_process_timeout: Duration::from_secs(300),
        }
    }
}

impl BlockProcessorConfig {
    pub fn dev() -> Self {
        Self {
            batch_max_time: Duration::from_millis(125),
            block_process_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }
}

struct Promise {
    result: Mutex<Option<BlockStatus>>,
    condition: Condvar,
}

impl Promise {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(None),
            condition: Condvar::new(),
        })
    }

    fn fulfill(&self, status: BlockStatus) {
        *self.result.lock().unwrap() = Some(status);
        self.condition.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Option<BlockStatus> {
        let deadline = Instant::now() + timeout;
        let mut result = self.result.lock().unwrap();
        while result.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .condition
                .wait_timeout(result, deadline - now)
                .unwrap();
            result = guard;
        }
        *result
    }
}

struct QueueEntry {
    context: BlockContext,
    waiter: Option<Arc<Promise>>,
}

struct ProcessorState {
    blocks: VecDeque<QueueEntry>,
    forced: VecDeque<QueueEntry>,
    stopped: bool,
    active: bool,
}

type BatchObserver = Box<dyn Fn(&BatchProcessed) + Send + Sync>;
type RollbackObserver = Box<dyn Fn(&Arc<Block>) + Send + Sync>;

struct Shared {
    config: BlockProcessorConfig,
    ledger: Arc<Ledger>,
    unchecked: Arc<UncheckedMap>,
    active_elections: Arc<dyn ActiveElections>,
    history: Arc<LocalVoteHistory>,
    work: WorkThresholds,
    stats: Arc<Stats>,
    state: Mutex<ProcessorState>,
    condition: Condvar,
    batch_observers: Mutex<Vec<BatchObserver>>,
    rollback_observers: Mutex<Vec<RollbackObserver>>,
}

/// The block processor. `add` is wait-free; one dedicated thread drains
/// the queues.
pub struct BlockProcessor {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

const WRITE_TABLES: &[Table] = &[
    Table::Accounts,
    Table::Blocks,
    Table::Pending,
    Table::ConfirmationHeight,
];

impl BlockProcessor {
    pub fn new(
        config: BlockProcessorConfig,
        ledger: Arc<Ledger>,
        unchecked: Arc<UncheckedMap>,
        active_elections: Arc<dyn ActiveElections>,
        history: Arc<LocalVoteHistory>,
        work: WorkThresholds,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                ledger,
                unchecked,
                active_elections,
                history,
                work,
                stats,
                state: Mutex::new(ProcessorState {
                    blocks: VecDeque::new(),
                    forced: VecDeque::new(),
                    stopped: false,
                    active: false,
                }),
                condition: Condvar::new(),
                batch_observers: Mutex::new(Vec::new()),
                rollback_observers: Mutex::new(Vec::new()),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Subscribe to committed batches. Observers run synchronously on the
    /// processing thread and must not call back into `add_blocking`.
    pub fn on_batch_processed(&self, observer: BatchObserver) {
        self.shared.batch_observers.lock().unwrap().push(observer);
    }

    /// Subscribe to blocks removed by forced-path rollbacks.
    pub fn on_rolled_back(&self, observer: RollbackObserver) {
        self.shared.rollback_observers.lock().unwrap().push(observer);
    }

    pub fn start(&self) {
        let mut thread = self.thread.lock().unwrap();
        debug_assert!(thread.is_none());
        let shared = Arc::clone(&self.shared);
        *thread = Some(
            std::thread::Builder::new()
                .name("blck_proc".to_string())
                .spawn(move || shared.run())
                .expect("spawning the block processor thread"),
        );
    }

    /// Stop the processing thread and join it. Idempotent.
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

    pub fn size(&self) -> usize {
        let state = self.shared.state.lock().unwrap();
        state.blocks.len() + state.forced.len()
    }

    /// Queue a block. Rejected (with a counter) when the queue is full or
    /// the proof-of-work does not validate.
    pub fn add(&self, block: Arc<Block>, source: BlockSource) -> bool {
        debug_assert!(source != BlockSource::Forced);
        if self.size() >= self.shared.config.full_size {
            self.shared.stats.inc(StatType::BlockProcessor, "overfill");
            return false;
        }
        if !self.shared.work.validate(&block) {
            self.shared
                .stats
                .inc(StatType::BlockProcessor, "insufficient_work");
            return false;
        }
        self.enqueue(block, source, None)
    }

    /// Queue a block and wait for its result, up to the configured
    /// timeout. Must not be called from a `batch_processed` observer.
    /// Returns `None` on timeout or when the processor is stopped.
    pub fn add_blocking(&self, block: Arc<Block>, source: BlockSource) -> Option<BlockStatus> {
        let promise = Promise::new();
        if !self.enqueue(block, source, Some(Arc::clone(&promise))) {
            return None;
        }
        promise.wait(self.shared.config.block_process_timeout)
    }

    /// Queue a block onto the forced path: it will displace whatever
    /// currently occupies its chain slot.
    pub fn force(&self, block: Arc<Block>) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopped {
                return;
            }
            state.forced.push_back(QueueEntry {
                context: BlockContext {
                    block,
                    source: BlockSource::Forced,
                    arrival: Instant::now(),
                },
                waiter: None,
            });
        }
        self.shared.condition.notify_all();
    }

    /// Block until both queues are drained and the thread is idle.
    pub fn flush(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while !state.stopped && (state.active || !state.blocks.is_empty() || !state.forced.is_empty())
        {
            state = self.shared.condition.wait(state).unwrap();
        }
    }

    fn enqueue(&self, block: Arc<Block>, source: BlockSource, waiter: Option<Arc<Promise>>) -> bool {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopped {
                return false;
            }
            state.blocks.push_back(QueueEntry {
                context: BlockContext {
                    block,
                    source,
                    arrival: Instant::now(),
                },
                waiter,
            });
        }
        self.shared.condition.notify_all();
        true
    }
}

impl Drop for BlockProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn run(self: Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        while !state.stopped {
            if !state.blocks.is_empty() || !state.forced.is_empty() {
                state.active = true;
                drop(state);

                let processed = self.process_batch();

                // The transaction is committed; resolve waiters first,
                // then run the observers.
                for (status, (_, waiter)) in &processed {
                    if let Some(waiter) = waiter {
                        waiter.fulfill(*status);
                    }
                }
                let batch: Vec<(BlockStatus, BlockContext)> = processed
                    .iter()
                    .map(|(status, (context, _))| (*status, context.clone()))
                    .collect();
                for observer in self.batch_observers.lock().unwrap().iter() {
                    observer(&batch);
                }

                state = self.state.lock().unwrap();
                state.active = false;
                self.condition.notify_all();
            } else {
                self.condition.notify_all();
                state = self.condition.wait(state).unwrap();
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn process_batch(&self) -> Vec<(BlockStatus, (BlockContext, Option<Arc<Promise>>))> {
        let mut processed = Vec::new();
        let tx = self
            .ledger
            .store
            .tx_begin_write(Writer::ProcessBatch, WRITE_TABLES);

        let deadline = Instant::now() + self.config.batch_max_time;
        let mut number_processed = 0usize;
        let mut number_forced = 0usize;

        loop {
            let entry = {
                let mut state = self.state.lock().unwrap();
                if state.blocks.is_empty() && state.forced.is_empty() {
                    break;
                }
                if number_processed >= self.config.store_batch_size {
                    break;
                }
                if Instant::now() >= deadline && number_processed >= self.config.batch_size {
                    break;
                }
                match state.forced.pop_front() {
                    Some(entry) => {
                        number_forced += 1;
                        entry
                    }
                    None => match state.blocks.pop_front() {
                        Some(entry) => entry,
                        None => break,
                    },
                }
            };

            let forced = entry.context.source == BlockSource::Forced;
            if forced {
                self.rollback_competitor(&tx, &entry.context.block);
            }

            number_processed += 1;
            let status = self.process_one(&tx, &entry.context);
            processed.push((status, (entry.context, entry.waiter)));
        }

        if number_processed > 0 {
            tracing::debug!(
                target: "block_processor",
                blocks = number_processed,
                forced = number_forced,
                "processed batch"
            );
        }
        processed
    }

    /// Before a forced block claims its slot, roll back whatever currently
    /// occupies it.
    fn rollback_competitor(&self, tx: &quill_store::WriteTransaction, block: &Arc<Block>) {
        let hash = block.hash();
        let Some(successor) = self.ledger.successor(tx, &block.qualified_root()) else {
            return;
        };
        if successor.hash() == hash {
            return;
        }

        tracing::debug!(
            target: "block_processor",
            rolling_back = %successor.hash(),
            replacing_with = %hash,
            "fork rollback"
        );

        match self.ledger.rollback(tx, &successor.hash()) {
            Ok(rolled_back) => {
                self.stats
                    .add(StatType::Rollback, "blocks", rolled_back.len() as u64);
                let observers = self.rollback_observers.lock().unwrap();
                for saved in &rolled_back {
                    self.history.erase(&saved.block.root());
                    // The election at the disputed slot stays: the forced
                    // block becomes its new candidate.
                    if saved.hash() != successor.hash() {
                        self.active_elections.erase(&saved.block.qualified_root());
                    }
                    for observer in observers.iter() {
                        observer(&saved.block);
                    }
                }
            }
            Err(error) => {
                self.stats.inc(StatType::Ledger, "rollback_failed");
                tracing::error!(
                    target: "block_processor",
                    block = %successor.hash(),
                    %error,
                    "rollback failed"
                );
            }
        }
    }

    fn process_one(
        &self,
        tx: &quill_store::WriteTransaction,
        context: &BlockContext,
    ) -> BlockStatus {
        let block = &context.block;
        let hash = block.hash();
        let status = self.ledger.process(tx, block);
        self.stats.inc(StatType::BlockProcessor, status.as_str());
        tracing::trace!(
            target: "block_processor",
            block = %hash,
            result = status.as_str(),
            source = context.source.as_str(),
            "block processed"
        );

        match status {
            BlockStatus::Progress => {
                // Dependents parked on this hash are ready now.
                self.requeue_unchecked(HashOrAccount::from(hash));
                // Sends also unlock receives parked on the destination.
                if let Some(saved) = self.ledger.block(tx, &hash) {
                    if let Some(destination) = self.ledger.send_destination(&saved) {
                        self.requeue_unchecked(HashOrAccount::from(destination));
                    }
                }
            }
            BlockStatus::GapPrevious => {
                self.unchecked
                    .put(HashOrAccount::from(block.previous()), Arc::clone(block));
            }
            BlockStatus::GapSource => {
                self.unchecked
                    .put(HashOrAccount::from(block.source_or_link()), Arc::clone(block));
            }
            BlockStatus::GapEpochOpenPending => {
                let key = block
                    .account_field()
                    .map(HashOrAccount::from)
                    .unwrap_or(HashOrAccount::ZERO);
                self.unchecked.put(key, Arc::clone(block));
            }
            _ => {}
        }
        status
    }

    fn requeue_unchecked(&self, dependency: HashOrAccount) {
        let ready = self.unchecked.trigger(&dependency);
        if ready.is_empty() {
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return;
            }
            for block in ready {
                state.blocks.push_back(QueueEntry {
                    context: BlockContext {
                        block,
                        source: BlockSource::Unchecked,
                        arrival: Instant::now(),
                    },
                    waiter: None,
                });
            }
        }
        self.condition.notify_all();
    }
}
