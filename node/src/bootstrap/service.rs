//! The ascending bootstrap coordinator.
//!
//! One thread walks accounts (priority set first, then the rate-limited
//! ledger scan) and issues `asc_pull_req` blocks requests; a second sweeps
//! request timeouts and keeps peer scoring in sync with the channel
//! registry. Responses are matched to their async tag by id and fed to the
//! block processor with source `Bootstrap`; the processor's batch events
//! flow back in through `inspect` to adjust account priorities.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use quill_ledger::{Block, BlockStatus, Ledger};
use quill_messages::{
    AscPullAck, AscPullAckPayload, AscPullReq, AscPullReqPayload, BlocksReqPayload, HashType,
    Message,
};
use quill_network::{Channel, ChannelRegistry, DropPolicy, TokenBucket, TrafficType};
use quill_store::ReadTransaction;
use quill_types::{Account, HashOrAccount};
use quill_utils::{Direction, StatType, Stats};
use rand::Rng;

use crate::block_processor::{BlockProcessor, BlockSource};
use crate::config::BootstrapAscendingConfig;

use super::account_sets::AccountSets;
use super::ledger_scan::LedgerScan;
use super::peer_scoring::PeerScoring;
use super::priority::{PullBlocksTag, QueryType, VerifyResult};
use super::throttle::{compute_throttle_size, Throttle};

/// Block-processor queue depth above which requesting pauses.
const BLOCK_PROCESSOR_THRESHOLD: usize = 1024;
/// Cadence of the timeout/scoring sweep.
const TIMEOUT_INTERVAL: Duration = Duration::from_secs(1);

/// Strategy half of an async tag; selects the response handler.
#[derive(Clone, Debug)]
pub enum TagStrategy {
    Blocks(PullBlocksTag),
    /// Reserved account-info pulls. The wire format is fully supported;
    /// processing the response is intentionally not implemented.
    LazyPulling { account: Account },
}

/// Where the requested account came from; database-sourced requests have
/// their own outstanding cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AccountOrigin {
    Priority,
    Database,
}

/// One outstanding request.
struct AsyncTag {
    strategy: TagStrategy,
    origin: AccountOrigin,
    channel: Weak<Channel>,
    sent_at: Instant,
}

struct ServiceState {
    tags: HashMap<u64, AsyncTag>,
    tag_order: VecDeque<u64>,
    scoring: PeerScoring,
    throttle: Throttle,
    iterator: LedgerScan,
    database_outstanding: usize,
    stopped: bool,
}

impl ServiceState {
    fn remove_tag(&mut self, id: u64) -> Option<AsyncTag> {
        let tag = self.tags.remove(&id)?;
        if tag.origin == AccountOrigin::Database {
            self.database_outstanding = self.database_outstanding.saturating_sub(1);
        }
        Some(tag)
    }
}

struct Shared {
    config: BootstrapAscendingConfig,
    ledger: Arc<Ledger>,
    block_processor: Arc<BlockProcessor>,
    registry: Arc<ChannelRegistry>,
    stats: Arc<Stats>,
    accounts: AccountSets,
    database_limiter: Mutex<TokenBucket>,
    state: Mutex<ServiceState>,
    condition: Condvar,
}

pub struct BootstrapService {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl BootstrapService {
    pub fn new(
        config: BootstrapAscendingConfig,
        ledger: Arc<Ledger>,
        block_processor: Arc<BlockProcessor>,
        registry: Arc<ChannelRegistry>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        let accounts = AccountSets::new(config.account_sets.clone(), Arc::clone(&stats));
        let shared = Arc::new(Shared {
            database_limiter: Mutex::new(TokenBucket::new(config.database_rate_limit, 1.0)),
            accounts,
            ledger,
            block_processor,
            registry,
            stats,
            state: Mutex::new(ServiceState {
                tags: HashMap::new(),
                tag_order: VecDeque::new(),
                scoring: PeerScoring::new(config.requests_limit),
                throttle: Throttle::new(16),
                iterator: LedgerScan::new(),
                database_outstanding: 0,
                stopped: false,
            }),
            condition: Condvar::new(),
            config,
        });

        // Feedback: inspect every bootstrap-sourced block the processor
        // finishes, then wake the account walker.
        let weak = Arc::downgrade(&shared);
        shared.block_processor.on_batch_processed(Box::new(move |batch| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let tx = shared.ledger.store.tx_begin_read();
            let mut should_notify = false;
            for (status, context) in batch {
                if context.source == BlockSource::Bootstrap {
                    shared.inspect(&tx, *status, &context.block);
                    should_notify = true;
                }
            }
            if should_notify {
                shared.condition.notify_all();
            }
        }));

        Arc::new(Self {
            shared,
            threads: Mutex::new(Vec::new()),
        })
    }

    pub fn start(&self) {
        let mut threads = self.threads.lock().unwrap();
        debug_assert!(threads.is_empty());

        let shared = Arc::clone(&self.shared);
        threads.push(
            std::thread::Builder::new()
                .name("bootstrap".to_string())
                .spawn(move || shared.run_timeouts())
                .expect("spawning the bootstrap timeout thread"),
        );

        let shared = Arc::clone(&self.shared);
        threads.push(
            std::thread::Builder::new()
                .name("bootstrap_walkr".to_string())
                .spawn(move || shared.run_requests())
                .expect("spawning the bootstrap request thread"),
        );
    }

    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stopped = true;
        }
        self.shared.condition.notify_all();
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }

    /// Pull the channel registry into peer scoring immediately (the sweep
    /// thread does this once a second on its own).
    pub fn sync_channels(&self) {
        let channels = self.shared.registry.list();
        self.shared
            .state
            .lock()
            .unwrap()
            .scoring
            .sync(&channels);
    }

    /// Issue one blocks request for `account`, if a channel with quota is
    /// available. Returns the tag id when a request went out.
    pub fn request_blocks(&self, account: Account) -> Option<u64> {
        self.shared.request_blocks(account, AccountOrigin::Priority)
    }

    /// Handle an `asc_pull_ack` arriving on `channel`.
    pub fn process(&self, ack: &AscPullAck, channel: &Arc<Channel>) {
        self.shared.process(ack, channel);
    }

    /// Make `account` interesting to the walker.
    pub fn prioritize(&self, account: &Account) {
        self.shared.accounts.priority_up(account);
        self.shared.condition.notify_all();
    }

    pub fn priority(&self, account: &Account) -> f64 {
        self.shared.accounts.priority(account)
    }

    pub fn blocked(&self, account: &Account) -> bool {
        self.shared.accounts.blocked(account)
    }

    pub fn priority_size(&self) -> usize {
        self.shared.accounts.priority_size()
    }

    pub fn blocked_size(&self) -> usize {
        self.shared.accounts.blocked_size()
    }

    pub fn tags_len(&self) -> usize {
        self.shared.state.lock().unwrap().tags.len()
    }

    pub fn score_size(&self) -> usize {
        self.shared.state.lock().unwrap().scoring.len()
    }
}

impl Drop for BootstrapService {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    // ── Request side ────────────────────────────────────────────────────

    fn run_requests(self: Arc<Self>) {
        loop {
            if self.stopped() {
                return;
            }
            self.stats.inc(StatType::BootstrapAscending, "loop");

            self.wait_block_processor();
            let (account, origin) = self.wait_available_account();
            if account.is_zero() {
                continue;
            }
            if self.request_blocks(account, origin).is_none() {
                // No channel with spare quota; back off instead of
                // spinning.
                let state = self.state.lock().unwrap();
                if state.stopped {
                    return;
                }
                let _ = self
                    .condition
                    .wait_timeout(state, self.config.throttle_wait_duration());
            }
            self.throttle_if_needed();
        }
    }

    fn stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    /// Backpressure: while the block processor queue is deep, sleep.
    fn wait_block_processor(&self) {
        loop {
            // Checked outside the service lock; sizing the processor
            // queue takes its own lock.
            if self.block_processor.size() <= BLOCK_PROCESSOR_THRESHOLD {
                return;
            }
            let state = self.state.lock().unwrap();
            if state.stopped {
                return;
            }
            let _ = self
                .condition
                .wait_timeout(state, self.config.throttle_wait_duration());
        }
    }

    fn wait_available_account(&self) -> (Account, AccountOrigin) {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if state.stopped {
                    return (Account::ZERO, AccountOrigin::Priority);
                }
                let (account, origin) = self.available_account(&mut state);
                if !account.is_zero() {
                    drop(state);
                    self.accounts.timestamp(&account, false);
                    return (account, origin);
                }
                let _ = self
                    .condition
                    .wait_timeout(state, self.config.throttle_wait_duration());
            }
        }
    }

    fn available_account(&self, state: &mut ServiceState) -> (Account, AccountOrigin) {
        let account = self.accounts.next();
        if !account.is_zero() {
            self.stats
                .inc(StatType::BootstrapAscending, "next_priority");
            return (account, AccountOrigin::Priority);
        }

        let database_limit = self.config.database_requests_limit as usize;
        if self.config.enable_ledger_scan
            && (database_limit == 0 || state.database_outstanding < database_limit)
            && self.database_limiter.lock().unwrap().try_consume(1)
        {
            let account = state.iterator.next(&self.ledger);
            if !account.is_zero() {
                self.stats
                    .inc(StatType::BootstrapAscending, "next_database");
                return (account, AccountOrigin::Database);
            }
        }

        self.stats.inc(StatType::BootstrapAscending, "next_none");
        (Account::ZERO, AccountOrigin::Priority)
    }

    fn throttle_if_needed(&self) {
        let state = self.state.lock().unwrap();
        if !state.iterator.warmup() && state.throttle.throttled() {
            self.stats.inc(StatType::BootstrapAscending, "throttled");
            let _ = self
                .condition
                .wait_timeout(state, self.config.throttle_wait_duration());
        }
    }

    fn request_blocks(&self, account: Account, origin: AccountOrigin) -> Option<u64> {
        let channel = {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return None;
            }
            state.scoring.channel()?
        };

        // Start from the head when the account is known locally, else from
        // the account itself.
        let tx = self.ledger.store.tx_begin_read();
        let (tag, payload) = match self.ledger.account_info(&tx, &account) {
            Some(info) => (
                PullBlocksTag {
                    account,
                    start: HashOrAccount::from(info.head),
                    query: QueryType::BlocksByHash,
                },
                BlocksReqPayload {
                    start: HashOrAccount::from(info.head),
                    count: self.config.pull_count,
                    start_type: HashType::Block,
                },
            ),
            None => (
                PullBlocksTag {
                    account,
                    start: HashOrAccount::from(account),
                    query: QueryType::BlocksByAccount,
                },
                BlocksReqPayload {
                    start: HashOrAccount::from(account),
                    count: self.config.pull_count,
                    start_type: HashType::Account,
                },
            ),
        };
        drop(tx);

        let id = self.track(TagStrategy::Blocks(tag), origin, &channel);
        self.stats
            .inc_dir(StatType::BootstrapAscending, "request", Direction::Out);

        let request = Message::AscPullReq(AscPullReq {
            id,
            payload: AscPullReqPayload::Blocks(payload),
        });
        channel.send(&request, None, DropPolicy::Limiter, TrafficType::Bootstrap);
        Some(id)
    }

    /// Insert a tag with a fresh unique id.
    fn track(&self, strategy: TagStrategy, origin: AccountOrigin, channel: &Arc<Channel>) -> u64 {
        let mut state = self.state.lock().unwrap();
        let mut rng = rand::thread_rng();
        let mut id: u64 = rng.gen();
        while state.tags.contains_key(&id) {
            id = rng.gen();
        }
        if origin == AccountOrigin::Database {
            state.database_outstanding += 1;
        }
        state.tags.insert(
            id,
            AsyncTag {
                strategy,
                origin,
                channel: Arc::downgrade(channel),
                sent_at: Instant::now(),
            },
        );
        state.tag_order.push_back(id);
        id
    }

    // ── Response side ───────────────────────────────────────────────────

    fn process(&self, ack: &AscPullAck, channel: &Arc<Channel>) {
        let tag = {
            let mut state = self.state.lock().unwrap();
            match state.remove_tag(ack.id) {
                Some(tag) => {
                    state.scoring.received_message(channel);
                    tag
                }
                None => {
                    self.stats
                        .inc(StatType::BootstrapAscending, "missing_tag");
                    return;
                }
            }
        };
        self.stats.inc(StatType::BootstrapAscending, "reply");

        match (&tag.strategy, &ack.payload) {
            (TagStrategy::Blocks(tag), AscPullAckPayload::Blocks(payload)) => {
                self.process_blocks(payload, tag);
            }
            (TagStrategy::LazyPulling { .. }, AscPullAckPayload::AccountInfo(_)) => {
                // Lazy pulling: deliberately a no-op until the strategy's
                // semantics are settled.
            }
            _ => {
                self.stats
                    .inc(StatType::BootstrapAscending, "invalid_response_type");
            }
        }
    }

    fn process_blocks(&self, payload: &quill_messages::BlocksAckPayload, tag: &PullBlocksTag) {
        match tag.verify(payload) {
            VerifyResult::Ok => {
                self.stats.add_dir(
                    StatType::BootstrapAscending,
                    "blocks",
                    Direction::In,
                    payload.blocks.len() as u64,
                );
                for block in &payload.blocks {
                    self.block_processor
                        .add(Arc::clone(block), BlockSource::Bootstrap);
                }
                self.state.lock().unwrap().throttle.add(true);
            }
            VerifyResult::NothingNew => {
                self.stats
                    .inc(StatType::BootstrapAscending, "nothing_new");
                self.accounts.priority_down(&tag.account);
                self.state.lock().unwrap().throttle.add(false);
            }
            VerifyResult::Invalid => {
                self.stats.inc(StatType::BootstrapAscending, "invalid");
                tracing::debug!(
                    target: "bootstrap",
                    account = %tag.account,
                    "invalid blocks response"
                );
            }
        }
    }

    /// Adjust the account sets from one processed bootstrap block.
    fn inspect(&self, tx: &ReadTransaction, status: BlockStatus, block: &Arc<Block>) {
        let hash = block.hash();
        match status {
            BlockStatus::Progress => {
                let account = self.ledger.account_safe(tx, &hash);
                // Progress on any block unblocks its account.
                self.accounts.unblock(account, None);
                self.accounts.priority_up(&account);
                self.accounts.timestamp(&account, true);

                if let Some(saved) = self.ledger.block(tx, &hash) {
                    if let Some(destination) = self.ledger.send_destination(&saved) {
                        if !destination.is_zero() {
                            // The destination's missing source just
                            // arrived.
                            self.accounts.unblock(destination, Some(hash));
                            self.accounts.priority_up(&destination);
                        }
                    }
                }
            }
            BlockStatus::GapSource => {
                let account = if block.previous().is_zero() {
                    block.account_field().unwrap_or(Account::ZERO)
                } else {
                    self.ledger.account_safe(tx, &block.previous())
                };
                let source = block.source_or_link();
                self.accounts.block(account, source);
            }
            // Old and gap-previous results carry no signal here.
            _ => {}
        }
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    fn run_timeouts(self: Arc<Self>) {
        loop {
            let channels = self.registry.list();
            {
                let mut state = self.state.lock().unwrap();
                if state.stopped {
                    return;
                }
                state.scoring.sync(&channels);
                state.scoring.timeout();
                self.sweep_timeouts(&mut state);
                let window = compute_throttle_size(
                    self.ledger.store.block_count(),
                    self.config.throttle_coefficient,
                );
                state.throttle.resize(window);

                let (state, _) = self
                    .condition
                    .wait_timeout(state, TIMEOUT_INTERVAL)
                    .unwrap();
                if state.stopped {
                    return;
                }
            }
        }
    }

    fn sweep_timeouts(&self, state: &mut ServiceState) {
        let timeout = self.config.request_timeout();
        let now = Instant::now();
        while let Some(&id) = state.tag_order.front() {
            match state.tags.get(&id) {
                // Already answered; drop the stale order entry.
                None => {
                    state.tag_order.pop_front();
                }
                Some(tag) if now.duration_since(tag.sent_at) >= timeout => {
                    state.tag_order.pop_front();
                    state.remove_tag(id);
                    self.stats.inc(StatType::BootstrapAscending, "timeout");
                }
                Some(_) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_consensus::{ElectionContainer, LocalVoteHistory};
    use quill_crypto::{keypair_from_seed, KeyPair};
    use quill_ledger::{StateBlock, WorkThresholds};
    use quill_messages::BlocksAckPayload;
    use quill_network::{ChannelSink, NullSink, OutboundBandwidthLimiter};
    use quill_store::{Store, Table, Writer};
    use quill_types::{Amount, BlockHash, NetworkId, ProtocolInfo, WorkNonce};
    use std::net::{Ipv6Addr, SocketAddrV6};

    use crate::block_processor::BlockProcessorConfig;
    use crate::unchecked::UncheckedMap;

    const TABLES: &[Table] = &[
        Table::Accounts,
        Table::Blocks,
        Table::Pending,
        Table::ConfirmationHeight,
    ];

    struct Fixture {
        service: Arc<BootstrapService>,
        processor: Arc<BlockProcessor>,
        ledger: Arc<Ledger>,
        registry: Arc<ChannelRegistry>,
        genesis: KeyPair,
        stats: Arc<Stats>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::new());
        let ledger = Arc::new(Ledger::new(Arc::clone(&store), WorkThresholds::new(0)));
        let genesis = keypair_from_seed(&[1u8; 32]);
        {
            let tx = store.tx_begin_write(Writer::Generic, TABLES);
            ledger.initialize(&tx, &genesis);
        }
        let stats = Arc::new(Stats::new());
        let processor = Arc::new(BlockProcessor::new(
            BlockProcessorConfig::default(),
            Arc::clone(&ledger),
            Arc::new(UncheckedMap::new(1024)),
            Arc::new(ElectionContainer::new(100)),
            Arc::new(LocalVoteHistory::new()),
            WorkThresholds::new(0),
            Arc::clone(&stats),
        ));
        processor.start();
        let registry = Arc::new(ChannelRegistry::new());
        let service = BootstrapService::new(
            BootstrapAscendingConfig {
                account_sets: crate::config::AccountSetsConfig {
                    cooldown: 0,
                    ..Default::default()
                },
                ..Default::default()
            },
            Arc::clone(&ledger),
            Arc::clone(&processor),
            Arc::clone(&registry),
            Arc::clone(&stats),
        );
        Fixture {
            service,
            processor,
            ledger,
            registry,
            genesis,
            stats,
        }
    }

    fn channel(fx: &Fixture) -> (Arc<Channel>, Arc<NullSink>) {
        let sink = NullSink::new();
        let channel = Channel::new(
            SocketAddrV6::new(Ipv6Addr::LOCALHOST, 7075, 0, 0),
            NetworkId::Dev,
            ProtocolInfo::default(),
            sink.clone() as Arc<dyn ChannelSink>,
            Arc::new(OutboundBandwidthLimiter::default()),
            Arc::new(Stats::new()),
        );
        fx.registry.add(Arc::clone(&channel));
        fx.service.sync_channels();
        (channel, sink)
    }

    /// A two-send chain on a brand-new account, receivable from genesis.
    fn receivable_chain(fx: &Fixture, receiver: &KeyPair) -> (Arc<Block>, Arc<Block>) {
        // Genesis sends twice to the receiver.
        let tx = fx
            .ledger
            .store
            .tx_begin_write(Writer::Generic, TABLES);
        let info = fx.ledger.account_info(&tx, &fx.genesis.public).unwrap();
        let send1 = Arc::new(StateBlock::new(
            fx.genesis.public,
            info.head,
            fx.genesis.public,
            info.balance - Amount::raw(100),
            HashOrAccount::from(receiver.public),
            &fx.genesis,
            WorkNonce(0),
        ));
        assert_eq!(
            fx.ledger.process(&tx, &send1),
            quill_ledger::BlockStatus::Progress
        );
        drop(tx);

        // The receiver's chain: an open receiving the send, then a
        // zero-value representative change chained on it.
        let open = Arc::new(StateBlock::new(
            receiver.public,
            BlockHash::ZERO,
            receiver.public,
            Amount::raw(100),
            HashOrAccount::from(send1.hash()),
            receiver,
            WorkNonce(0),
        ));
        let change = Arc::new(StateBlock::new(
            receiver.public,
            open.hash(),
            receiver.public,
            Amount::raw(100),
            HashOrAccount::ZERO,
            receiver,
            WorkNonce(0),
        ));
        (open, change)
    }

    #[test]
    fn request_creates_unique_tag_and_sends_on_bootstrap_lane() {
        let fx = fixture();
        let (_channel, sink) = channel(&fx);

        let id = fx.service.request_blocks(fx.genesis.public).unwrap();
        assert_eq!(fx.service.tags_len(), 1);

        let sent = sink.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, TrafficType::Bootstrap);
        let (message, _) =
            quill_network::parse_frame(&sent[0].1, NetworkId::Dev, ProtocolInfo::default())
                .unwrap();
        match message {
            Message::AscPullReq(request) => {
                assert_eq!(request.id, id);
                match request.payload {
                    AscPullReqPayload::Blocks(payload) => {
                        // Genesis is known locally: pull from its head.
                        assert_eq!(payload.start_type, HashType::Block);
                        assert_eq!(payload.count, 128);
                    }
                    other => panic!("expected blocks request, got {:?}", other),
                }
            }
            other => panic!("expected AscPullReq, got {:?}", other),
        }
        fx.processor.stop();
    }

    #[test]
    fn unknown_account_requests_by_account() {
        let fx = fixture();
        let (_channel, sink) = channel(&fx);
        let stranger = keypair_from_seed(&[7u8; 32]);

        fx.service.request_blocks(stranger.public).unwrap();
        let sent = sink.take_sent();
        let (message, _) =
            quill_network::parse_frame(&sent[0].1, NetworkId::Dev, ProtocolInfo::default())
                .unwrap();
        match message {
            Message::AscPullReq(request) => match request.payload {
                AscPullReqPayload::Blocks(payload) => {
                    assert_eq!(payload.start_type, HashType::Account);
                    assert_eq!(payload.start.as_account(), stranger.public);
                }
                other => panic!("expected blocks request, got {:?}", other),
            },
            other => panic!("expected AscPullReq, got {:?}", other),
        }
        fx.processor.stop();
    }

    #[test]
    fn valid_response_feeds_blocks_and_raises_priority() {
        let fx = fixture();
        let (channel, _sink) = channel(&fx);
        let receiver = keypair_from_seed(&[2u8; 32]);
        let (open, change) = receivable_chain(&fx, &receiver);

        let id = fx.service.request_blocks(receiver.public).unwrap();
        let before = fx.service.priority(&receiver.public);

        let ack = AscPullAck {
            id,
            payload: AscPullAckPayload::Blocks(BlocksAckPayload {
                blocks: vec![Arc::clone(&open), Arc::clone(&change)],
            }),
        };
        fx.service.process(&ack, &channel);
        assert_eq!(fx.service.tags_len(), 0);

        fx.processor.flush();
        let tx = fx.ledger.store.tx_begin_read();
        assert!(fx.ledger.block_exists(&tx, &open.hash()));
        assert!(fx.ledger.block_exists(&tx, &change.hash()));

        // Two progress results for the account: priority bumped twice.
        let after = fx.service.priority(&receiver.public);
        assert!(after > before, "priority {before} -> {after}");
        fx.processor.stop();
    }

    #[test]
    fn nothing_new_decrements_priority() {
        let fx = fixture();
        let (channel, _sink) = channel(&fx);

        fx.service.prioritize(&fx.genesis.public);
        fx.service.prioritize(&fx.genesis.public); // 4.0
        let before = fx.service.priority(&fx.genesis.public);

        let id = fx.service.request_blocks(fx.genesis.public).unwrap();
        // Peer echoes just the requested head block.
        let tx = fx.ledger.store.tx_begin_read();
        let head = fx
            .ledger
            .account_info(&tx, &fx.genesis.public)
            .unwrap()
            .head;
        let head_block = fx.ledger.block(&tx, &head).unwrap().block;
        drop(tx);

        let ack = AscPullAck {
            id,
            payload: AscPullAckPayload::Blocks(BlocksAckPayload {
                blocks: vec![head_block],
            }),
        };
        fx.service.process(&ack, &channel);

        assert!(fx.service.priority(&fx.genesis.public) < before);
        assert_eq!(
            fx.stats.count(StatType::BootstrapAscending, "nothing_new"),
            1
        );
        fx.processor.stop();
    }

    #[test]
    fn invalid_response_counts_without_penalty() {
        let fx = fixture();
        let (channel, _sink) = channel(&fx);
        let receiver = keypair_from_seed(&[2u8; 32]);
        let (open, _) = receivable_chain(&fx, &receiver);

        let id = fx.service.request_blocks(fx.genesis.public).unwrap();
        // Response does not start at the requested block.
        let ack = AscPullAck {
            id,
            payload: AscPullAckPayload::Blocks(BlocksAckPayload {
                blocks: vec![open, receivable_chain(&fx, &keypair_from_seed(&[9u8; 32])).0],
            }),
        };
        fx.service.process(&ack, &channel);
        assert_eq!(fx.stats.count(StatType::BootstrapAscending, "invalid"), 1);
        fx.processor.stop();
    }

    #[test]
    fn unknown_id_counts_missing_tag() {
        let fx = fixture();
        let (channel, _sink) = channel(&fx);
        let ack = AscPullAck {
            id: 0xDEAD,
            payload: AscPullAckPayload::Blocks(BlocksAckPayload { blocks: vec![] }),
        };
        fx.service.process(&ack, &channel);
        assert_eq!(
            fx.stats.count(StatType::BootstrapAscending, "missing_tag"),
            1
        );
        fx.processor.stop();
    }

    #[test]
    fn gap_source_blocks_account_until_dependency_arrives() {
        let fx = fixture();
        let receiver = keypair_from_seed(&[2u8; 32]);

        // An open whose source we do not have: gap_source.
        let missing_send = BlockHash::new([0xAA; 32]);
        let open = Arc::new(StateBlock::new(
            receiver.public,
            BlockHash::ZERO,
            receiver.public,
            Amount::raw(100),
            HashOrAccount::from(missing_send),
            &receiver,
            WorkNonce(0),
        ));
        fx.processor.add(Arc::clone(&open), BlockSource::Bootstrap);
        fx.processor.flush();
        // Give the observer a beat; it runs on the processor thread
        // before flush returns.
        assert!(fx.service.blocked(&receiver.public));
        assert_eq!(fx.service.blocked_size(), 1);
        fx.processor.stop();
    }

    #[test]
    fn stop_joins_threads() {
        let fx = fixture();
        fx.service.start();
        std::thread::sleep(Duration::from_millis(50));
        fx.service.stop();
        fx.processor.stop();
    }
}
