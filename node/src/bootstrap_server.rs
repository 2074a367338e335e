//! Bootstrap server: answers `asc_pull_req` from the store.
//!
//! Requests land on a bounded queue drained by one worker thread. Each
//! batch shares a read transaction, refreshed between items so a slow
//! batch never pins the store. Responses go out on the bootstrap traffic
//! lane under the limiter drop policy; requests whose channel lane is
//! already full are dropped early.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use quill_ledger::Ledger;
use quill_messages::{
    AccountInfoAckPayload, AscPullAck, AscPullAckPayload, AscPullReq, AscPullReqPayload,
    BlocksAckPayload, FrontiersAckPayload, HashType, Message, MAX_PULL_BLOCKS, MAX_PULL_FRONTIERS,
};
use quill_network::{Channel, DropPolicy, TrafficType};
use quill_store::ReadTransaction;
use quill_types::{Account, BlockHash};
use quill_utils::{Direction, StatType, Stats};

/// Most blocks served per request.
pub const MAX_BLOCKS: usize = MAX_PULL_BLOCKS;
/// Most frontiers served per request.
pub const MAX_FRONTIERS: usize = MAX_PULL_FRONTIERS;
/// Request queue depth.
const MAX_QUEUE: usize = 16 * 1024;
/// Requests served per transaction refresh cycle.
const BATCH_SIZE: usize = 128;

struct ServerState {
    queue: VecDeque<(AscPullReq, Arc<Channel>)>,
    stopped: bool,
}

struct Shared {
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
    state: Mutex<ServerState>,
    condition: Condvar,
}

pub struct BootstrapServer {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BootstrapServer {
    pub fn new(ledger: Arc<Ledger>, stats: Arc<Stats>) -> Self {
        Self {
            shared: Arc::new(Shared {
                ledger,
                stats,
                state: Mutex::new(ServerState {
                    queue: VecDeque::new(),
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
                .name("bootstrap_serv".to_string())
                .spawn(move || shared.run())
                .expect("spawning the bootstrap server thread"),
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

    /// Sanity-check a request before queueing it.
    pub fn verify(request: &AscPullReq) -> bool {
        match &request.payload {
            AscPullReqPayload::Blocks(payload) => {
                payload.count > 0 && payload.count as usize <= MAX_BLOCKS
            }
            AscPullReqPayload::AccountInfo(payload) => !payload.target.is_zero(),
            AscPullReqPayload::Frontiers(payload) => {
                payload.count > 0 && payload.count as usize <= MAX_FRONTIERS
            }
        }
    }

    /// Queue a request for processing. Returns `false` when the request is
    /// invalid, the channel's bootstrap lane is already full, or the queue
    /// is at capacity.
    pub fn request(&self, request: AscPullReq, channel: Arc<Channel>) -> bool {
        if !Self::verify(&request) {
            self.shared.stats.inc(StatType::BootstrapServer, "invalid");
            return false;
        }

        // If the channel is congested, the response would be dropped
        // anyway; filter early.
        if channel.max(TrafficType::Bootstrap) {
            self.shared
                .stats
                .inc_dir(StatType::BootstrapServer, "channel_full", Direction::In);
            return false;
        }

        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopped || state.queue.len() >= MAX_QUEUE {
                self.shared.stats.inc(StatType::BootstrapServer, "overfill");
                return false;
            }
            state.queue.push_back((request, channel));
        }
        self.shared.condition.notify_all();
        true
    }

    /// Queue depth, for tests and diagnostics.
    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }

    /// Process a single request synchronously. The worker thread goes
    /// through here too.
    pub fn process(&self, tx: &ReadTransaction, request: &AscPullReq) -> AscPullAck {
        self.shared.process(tx, request)
    }
}

impl Drop for BootstrapServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn run(self: Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        while !state.stopped {
            if state.queue.is_empty() {
                state = self.condition.wait(state).unwrap();
                continue;
            }
            let batch: Vec<(AscPullReq, Arc<Channel>)> = {
                let take = state.queue.len().min(BATCH_SIZE);
                state.queue.drain(..take).collect()
            };
            drop(state);

            self.process_batch(batch);

            state = self.state.lock().unwrap();
        }
    }

    fn process_batch(&self, batch: Vec<(AscPullReq, Arc<Channel>)>) {
        let mut tx = self.ledger.store.tx_begin_read();
        for (request, channel) in batch {
            tx.refresh_if_needed();

            if channel.max(TrafficType::Bootstrap) {
                self.stats
                    .inc_dir(StatType::BootstrapServer, "channel_full", Direction::Out);
                continue;
            }

            let response = self.process(&tx, &request);
            self.respond(response, &channel);
        }
    }

    fn process(&self, tx: &ReadTransaction, request: &AscPullReq) -> AscPullAck {
        let payload = match &request.payload {
            AscPullReqPayload::Blocks(payload) => {
                let count = (payload.count as usize).min(MAX_BLOCKS);
                let start_block = match payload.start_type {
                    HashType::Block => {
                        let start = payload.start.as_block_hash();
                        if self.ledger.block_exists(tx, &start) {
                            Some(start)
                        } else {
                            None
                        }
                    }
                    HashType::Account => self
                        .ledger
                        .account_info(tx, &payload.start.as_account())
                        .map(|info| info.open_block),
                };
                // Neither the block nor the account exists: an empty
                // response, distinguishable by the terminator only.
                let blocks = match start_block {
                    Some(start) => self.prepare_blocks(tx, start, count),
                    None => Vec::new(),
                };
                self.stats.add_dir(
                    StatType::BootstrapServer,
                    "blocks",
                    Direction::Out,
                    blocks.len() as u64,
                );
                AscPullAckPayload::Blocks(BlocksAckPayload { blocks })
            }
            AscPullReqPayload::AccountInfo(payload) => {
                let target = match payload.target_type {
                    HashType::Account => payload.target.as_account(),
                    // Resolve the owning account; zero when unknown.
                    HashType::Block => self
                        .ledger
                        .account_safe(tx, &payload.target.as_block_hash()),
                };
                let mut response = AccountInfoAckPayload {
                    account: target,
                    open: BlockHash::ZERO,
                    head: BlockHash::ZERO,
                    block_count: 0,
                    conf_frontier: BlockHash::ZERO,
                    conf_height: 0,
                };
                if let Some(info) = self.ledger.account_info(tx, &target) {
                    response.open = info.open_block;
                    response.head = info.head;
                    response.block_count = info.block_count;
                    if let Some(conf) = self.ledger.store.confirmation_height.get(tx, &target) {
                        response.conf_frontier = conf.frontier;
                        response.conf_height = conf.height;
                    }
                }
                AscPullAckPayload::AccountInfo(response)
            }
            AscPullReqPayload::Frontiers(payload) => {
                let count = (payload.count as usize).min(MAX_FRONTIERS);
                let frontiers: Vec<(Account, BlockHash)> = self
                    .ledger
                    .store
                    .accounts
                    .iter_from(tx, &payload.start, count)
                    .into_iter()
                    .map(|(account, info)| (account, info.head))
                    .collect();
                self.stats.add_dir(
                    StatType::BootstrapServer,
                    "frontiers",
                    Direction::Out,
                    frontiers.len() as u64,
                );
                AscPullAckPayload::Frontiers(FrontiersAckPayload { frontiers })
            }
        };

        AscPullAck {
            id: request.id,
            payload,
        }
    }

    /// Walk successor pointers from `start`, at most `count` blocks.
    fn prepare_blocks(
        &self,
        tx: &ReadTransaction,
        start: BlockHash,
        count: usize,
    ) -> Vec<Arc<quill_ledger::Block>> {
        let mut blocks = Vec::new();
        let mut current = Some(start);
        while let Some(hash) = current {
            if blocks.len() >= count {
                break;
            }
            let Some(saved) = self.ledger.block(tx, &hash) else {
                break;
            };
            current = self.ledger.store.blocks.successor(tx, &hash);
            blocks.push(saved.block);
        }
        blocks
    }

    fn respond(&self, response: AscPullAck, channel: &Arc<Channel>) {
        self.stats
            .inc_dir(StatType::BootstrapServer, "response", Direction::Out);

        let stats = Arc::clone(&self.stats);
        channel.send(
            &Message::AscPullAck(response),
            Some(Box::new(move |result| {
                if result.is_err() {
                    stats.inc_dir(StatType::BootstrapServer, "write_error", Direction::Out);
                }
            })),
            DropPolicy::Limiter,
            TrafficType::Bootstrap,
        );
    }
}
