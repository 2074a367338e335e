//! The node: owns the component graph and dispatches inbound messages.

use std::sync::Arc;

use quill_consensus::{
    ElectionContainer, LocalVoteHistory, OnlineReps, VoteCache, VoteCacheConfig,
};
use quill_crypto::{generate_keypair, sign_message, KeyPair};
use quill_ledger::{Ledger, WorkThresholds};
use quill_messages::{
    HandshakeResponse, HandshakeResponseV2, Message, NodeIdHandshake, TelemetryAck, TelemetryData,
};
use quill_network::{
    Channel, ChannelRegistry, DropPolicy, OutboundBandwidthLimiter, TrafficType,
};
use quill_store::Store;
use quill_types::{Amount, BlockHash};
use quill_utils::{Direction, StatType, Stats};

use crate::block_broadcast::{BlockBroadcast, BlockBroadcastConfig};
use crate::block_processor::{BlockProcessor, BlockProcessorConfig, BlockSource};
use crate::bootstrap::BootstrapService;
use crate::bootstrap_server::BootstrapServer;
use crate::config::NodeConfig;
use crate::scheduler::{HintedScheduler, HintedSchedulerConfig, PriorityScheduler};
use crate::unchecked::UncheckedMap;

const UNCHECKED_MAX: usize = 65536;

/// A Quill node. Owns every pipeline component; `start` brings them up and
/// `stop` joins them in reverse dependency order.
pub struct Node {
    pub config: NodeConfig,
    pub node_id: KeyPair,
    pub stats: Arc<Stats>,
    pub store: Arc<Store>,
    pub ledger: Arc<Ledger>,
    pub unchecked: Arc<UncheckedMap>,
    pub active_elections: Arc<ElectionContainer>,
    pub history: Arc<LocalVoteHistory>,
    pub vote_cache: Arc<VoteCache>,
    pub online_reps: Arc<OnlineReps>,
    pub registry: Arc<ChannelRegistry>,
    pub limiter: Arc<OutboundBandwidthLimiter>,
    pub block_processor: Arc<BlockProcessor>,
    pub bootstrap_server: BootstrapServer,
    pub bootstrap: Arc<BootstrapService>,
    pub priority_scheduler: Arc<PriorityScheduler>,
    pub hinted_scheduler: HintedScheduler,
    pub block_broadcast: Arc<BlockBroadcast>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Arc<Self> {
        let stats = Arc::new(Stats::new());
        let store = Arc::new(Store::new());
        let work = WorkThresholds::for_network(config.network);
        let ledger = Arc::new(Ledger::new(Arc::clone(&store), work));
        let unchecked = Arc::new(UncheckedMap::new(UNCHECKED_MAX));
        let active_elections = Arc::new(ElectionContainer::new(config.max_elections));
        let history = Arc::new(LocalVoteHistory::new());
        let online_reps = Arc::new(OnlineReps::new());
        let registry = Arc::new(ChannelRegistry::new());
        let limiter = Arc::new(OutboundBandwidthLimiter::default());

        // Representative weight: the representative's own balance. A full
        // delegated-weight table lives with the consensus engine.
        let weight_ledger = Arc::clone(&ledger);
        let vote_cache = Arc::new(VoteCache::new(
            VoteCacheConfig::default(),
            Box::new(move |account| {
                let tx = weight_ledger.store.tx_begin_read();
                weight_ledger
                    .account_info(&tx, account)
                    .map(|info| info.balance)
                    .unwrap_or(Amount::ZERO)
            }),
        ));

        let processor_config = if config.network.is_dev() {
            BlockProcessorConfig::dev()
        } else {
            BlockProcessorConfig::default()
        };
        let block_processor = Arc::new(BlockProcessor::new(
            processor_config,
            Arc::clone(&ledger),
            Arc::clone(&unchecked),
            active_elections.clone(),
            Arc::clone(&history),
            work,
            Arc::clone(&stats),
        ));

        let bootstrap_server = BootstrapServer::new(Arc::clone(&ledger), Arc::clone(&stats));

        let bootstrap = BootstrapService::new(
            config.bootstrap_ascending.clone(),
            Arc::clone(&ledger),
            Arc::clone(&block_processor),
            Arc::clone(&registry),
            Arc::clone(&stats),
        );

        let priority_scheduler = Arc::new(PriorityScheduler::new(
            Arc::clone(&ledger),
            active_elections.clone(),
            Arc::clone(&stats),
        ));

        let hinted_config = if config.network.is_dev() {
            HintedSchedulerConfig::dev()
        } else {
            HintedSchedulerConfig::default()
        };
        let hinted_stats = Arc::clone(&stats);
        let hinted_cache = Arc::clone(&vote_cache);
        let hinted_scheduler = HintedScheduler::new(
            hinted_config,
            Arc::clone(&ledger),
            Arc::clone(&vote_cache),
            active_elections.clone(),
            Arc::clone(&online_reps),
            Arc::clone(&stats),
            // Missing hinted blocks: keep the cache entry queued and
            // count; by-hash lazy pulling is deliberately inert.
            Box::new(move |hash: BlockHash| {
                hinted_stats.inc(StatType::Hinting, "bootstrap_triggered");
                hinted_cache.trigger(&hash);
            }),
        );

        let broadcast_config = if config.network.is_dev() {
            BlockBroadcastConfig {
                enabled: config.enable_local_block_broadcast,
                ..BlockBroadcastConfig::dev()
            }
        } else {
            BlockBroadcastConfig {
                enabled: config.enable_local_block_broadcast,
                ..Default::default()
            }
        };
        let flood_registry = Arc::clone(&registry);
        let block_broadcast = BlockBroadcast::new(
            broadcast_config,
            Arc::clone(&ledger),
            &block_processor,
            Arc::clone(&stats),
            Box::new(move |block| {
                for channel in flood_registry.list() {
                    channel.send(
                        &Message::Publish(quill_messages::Publish {
                            block: Arc::clone(block),
                        }),
                        None,
                        DropPolicy::NoDrop,
                        TrafficType::Generic,
                    );
                }
            }),
        );

        Arc::new(Self {
            config,
            node_id: generate_keypair(),
            stats,
            store,
            ledger,
            unchecked,
            active_elections,
            history,
            vote_cache,
            online_reps,
            registry,
            limiter,
            block_processor,
            bootstrap_server,
            bootstrap,
            priority_scheduler,
            hinted_scheduler,
            block_broadcast,
        })
    }

    /// Bring up the pipeline threads.
    pub fn start(&self) {
        tracing::info!(
            network = self.config.network.as_str(),
            port = self.config.peering_port(),
            io_threads = self.config.io_thread_count(),
            "starting node"
        );
        self.block_processor.start();
        self.bootstrap_server.start();
        self.bootstrap.start();
        self.priority_scheduler.start();
        self.hinted_scheduler.start();
        self.block_broadcast.start();
    }

    /// Join everything, reverse dependency order. Idempotent.
    pub fn stop(&self) {
        self.block_broadcast.stop();
        self.hinted_scheduler.stop();
        self.priority_scheduler.stop();
        self.bootstrap.stop();
        self.bootstrap_server.stop();
        self.block_processor.stop();

        for (counter, value) in self.stats.snapshot() {
            tracing::debug!(counter, value, "final counter");
        }
        tracing::info!("node stopped");
    }

    /// Dispatch one parsed inbound message from `channel`.
    pub fn process_message(&self, message: Message, channel: &Arc<Channel>) {
        self.stats.inc_dir(
            StatType::Message,
            message.message_type().as_str(),
            Direction::In,
        );

        match message {
            Message::Publish(publish) => {
                self.block_processor.add(publish.block, BlockSource::Live);
            }
            Message::ConfirmAck(ack) => {
                if !ack.vote.validate() {
                    self.stats.inc(StatType::Message, "invalid_vote");
                    return;
                }
                let weight = {
                    let tx = self.store.tx_begin_read();
                    self.ledger
                        .account_info(&tx, &ack.vote.account)
                        .map(|info| info.balance)
                        .unwrap_or(Amount::ZERO)
                };
                self.online_reps.observe(ack.vote.account, weight);
                for hash in &ack.vote.hashes {
                    self.vote_cache.vote(hash, &ack.vote);
                }
            }
            Message::ConfirmReq(_) => {
                // Vote generation belongs to the consensus engine; the
                // pipeline only counts these.
            }
            Message::AscPullReq(request) => {
                self.bootstrap_server.request(request, Arc::clone(channel));
            }
            Message::AscPullAck(ack) => {
                self.bootstrap.process(&ack, channel);
            }
            Message::NodeIdHandshake(handshake) => {
                if let Some(query) = handshake.query {
                    self.respond_handshake(&query.cookie, channel);
                }
            }
            Message::TelemetryReq => {
                self.send_telemetry(channel);
            }
            Message::Keepalive(_)
            | Message::TelemetryAck(_)
            | Message::BulkPull(_)
            | Message::BulkPullAccount(_)
            | Message::FrontierReq(_)
            | Message::BulkPush => {
                // Legacy bulk endpoints and gossip bookkeeping are served
                // elsewhere; counting them is enough here.
            }
        }
    }

    fn respond_handshake(&self, cookie: &[u8; 32], channel: &Arc<Channel>) {
        let response = NodeIdHandshake {
            query: None,
            response: Some(HandshakeResponse {
                node_id: self.node_id.public,
                signature: sign_message(cookie, &self.node_id),
                v2: Some(HandshakeResponseV2 {
                    salt: [0u8; 32],
                    genesis: BlockHash::ZERO,
                }),
            }),
        };
        channel.send(
            &Message::NodeIdHandshake(response),
            None,
            DropPolicy::NoDrop,
            TrafficType::Generic,
        );
    }

    fn send_telemetry(&self, channel: &Arc<Channel>) {
        let data = TelemetryData {
            node_id: self.node_id.public,
            block_count: self.store.block_count(),
            account_count: self.store.accounts.count(),
            unchecked_count: self.unchecked.len() as u64,
            protocol_version: quill_types::ProtocolInfo::default().version_using,
            ..Default::default()
        };
        channel.send(
            &Message::TelemetryAck(TelemetryAck { data: Some(data) }),
            None,
            DropPolicy::Limiter,
            TrafficType::Generic,
        );
    }
}
