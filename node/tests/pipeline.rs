//! End-to-end pipeline scenarios, driven through the public node API with
//! null channels in place of sockets.

use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;

use quill_consensus::{ActiveElections, ElectionBehavior};
use quill_crypto::{keypair_from_seed, KeyPair};
use quill_ledger::{Block, BlockStatus, StateBlock, Vote, WorkThresholds};
use quill_messages::{
    AscPullAck, AscPullAckPayload, BlocksAckPayload, ConfirmAck, Keepalive, Message,
};
use quill_network::{Channel, ChannelSink, NullSink, TrafficType};
use quill_node::{BlockSource, Node, NodeConfig};
use quill_store::{Table, Writer};
use quill_types::{Amount, BlockHash, HashOrAccount, NetworkId, ProtocolInfo, WorkNonce};
use quill_utils::StatType;

const TABLES: &[Table] = &[
    Table::Accounts,
    Table::Blocks,
    Table::Pending,
    Table::ConfirmationHeight,
];

const GENESIS_SEED: [u8; 32] = [1u8; 32];

fn dev_node() -> (Arc<Node>, KeyPair) {
    let node = Node::new(NodeConfig::default());
    let genesis = keypair_from_seed(&GENESIS_SEED);
    {
        let tx = node.store.tx_begin_write(Writer::Generic, TABLES);
        node.ledger.initialize(&tx, &genesis);
    }
    (node, genesis)
}

fn attach_channel(node: &Node) -> (Arc<Channel>, Arc<NullSink>) {
    let sink = NullSink::new();
    let channel = Channel::new(
        SocketAddrV6::new(Ipv6Addr::LOCALHOST, 7075, 0, 0),
        NetworkId::Dev,
        ProtocolInfo::default(),
        sink.clone() as Arc<dyn ChannelSink>,
        Arc::clone(&node.limiter),
        Arc::clone(&node.stats),
    );
    node.registry.add(Arc::clone(&channel));
    node.bootstrap.sync_channels();
    (channel, sink)
}

/// A signed state block with valid work for the node's network.
fn solved_state(
    node: &Node,
    keypair: &KeyPair,
    previous: BlockHash,
    balance: Amount,
    link: HashOrAccount,
) -> Arc<Block> {
    let work = WorkThresholds::for_network(node.config.network);
    let mut block = StateBlock::new(
        keypair.public,
        previous,
        keypair.public,
        balance,
        link,
        keypair,
        WorkNonce(0),
    );
    let root = block.work_root();
    if let Block::State(ref mut state) = block {
        state.work = WorkNonce(work.solve(&root));
    }
    Arc::new(block)
}

fn solved_send(
    node: &Node,
    keypair: &KeyPair,
    previous: BlockHash,
    balance: Amount,
    destination: quill_types::Account,
) -> Arc<Block> {
    solved_state(node, keypair, previous, balance, HashOrAccount::from(destination))
}

fn solved_receive(
    node: &Node,
    keypair: &KeyPair,
    previous: BlockHash,
    balance: Amount,
    source: BlockHash,
) -> Arc<Block> {
    solved_state(node, keypair, previous, balance, HashOrAccount::from(source))
}

// ── Scenario: fork rollback on force ────────────────────────────────────

#[test]
fn forced_block_rolls_back_competing_chain() {
    let (node, genesis) = dev_node();
    node.block_processor.start();

    let receiver = keypair_from_seed(&[2u8; 32]);
    let other = keypair_from_seed(&[3u8; 32]);
    let tx = node.store.tx_begin_read();
    let genesis_head = node
        .ledger
        .account_info(&tx, &genesis.public)
        .unwrap()
        .head;
    drop(tx);

    // A1 → A2 → A3 via the normal path.
    let a1 = solved_send(
        &node,
        &genesis,
        genesis_head,
        Amount::MAX - Amount::raw(10),
        receiver.public,
    );
    let a2 = solved_send(
        &node,
        &genesis,
        a1.hash(),
        Amount::MAX - Amount::raw(20),
        receiver.public,
    );
    let a3 = solved_send(
        &node,
        &genesis,
        a2.hash(),
        Amount::MAX - Amount::raw(30),
        receiver.public,
    );
    for block in [&a1, &a2, &a3] {
        assert_eq!(
            node.block_processor
                .add_blocking(Arc::clone(block), BlockSource::Live),
            Some(BlockStatus::Progress)
        );
    }

    // B3 competes with A3 for the slot after A2.
    let b3 = solved_send(
        &node,
        &genesis,
        a2.hash(),
        Amount::MAX - Amount::raw(40),
        other.public,
    );
    node.block_processor.force(Arc::clone(&b3));
    node.block_processor.flush();

    let tx = node.store.tx_begin_read();
    let slot = node.ledger.successor(&tx, &b3.qualified_root()).unwrap();
    assert_eq!(slot.hash(), b3.hash());
    assert!(!node.ledger.block_exists(&tx, &a3.hash()));
    assert_eq!(node.stats.count(StatType::Ledger, "rollback_failed"), 0);
    drop(tx);
    node.stop();
}

// ── Scenario: bootstrap blocks response ─────────────────────────────────

#[test]
fn bootstrap_response_verifies_and_raises_priority_twice() {
    let (node, genesis) = dev_node();
    node.block_processor.start();
    let (channel, _sink) = attach_channel(&node);

    // Genesis funds a fresh account out-of-band (straight to the ledger).
    let receiver = keypair_from_seed(&[2u8; 32]);
    let send = {
        let tx = node.store.tx_begin_write(Writer::Generic, TABLES);
        let info = node.ledger.account_info(&tx, &genesis.public).unwrap();
        let send = solved_send(
            &node,
            &genesis,
            info.head,
            info.balance - Amount::raw(100),
            receiver.public,
        );
        assert_eq!(node.ledger.process(&tx, &send), BlockStatus::Progress);
        send
    };

    // The peer's copy of the receiver chain: X = open, Y chains on X.
    let x = solved_receive(
        &node,
        &receiver,
        BlockHash::ZERO,
        Amount::raw(100),
        send.hash(),
    );
    let y = solved_send(
        &node,
        &receiver,
        x.hash(),
        Amount::raw(100),
        quill_types::Account::ZERO,
    );

    let id = node.bootstrap.request_blocks(receiver.public).unwrap();
    let before = node.bootstrap.priority(&receiver.public);

    node.process_message(
        Message::AscPullAck(AscPullAck {
            id,
            payload: AscPullAckPayload::Blocks(BlocksAckPayload {
                blocks: vec![Arc::clone(&x), Arc::clone(&y)],
            }),
        }),
        &channel,
    );
    node.block_processor.flush();

    let tx = node.store.tx_begin_read();
    assert!(node.ledger.block_exists(&tx, &x.hash()));
    assert!(node.ledger.block_exists(&tx, &y.hash()));
    drop(tx);

    // Two progress results for the account: two priority increases.
    let after = node.bootstrap.priority(&receiver.public);
    assert_eq!(before, 0.0);
    assert_eq!(after, 4.0);
    node.stop();
}

// ── Scenario: nothing-new response lowers priority ──────────────────────

#[test]
fn nothing_new_response_strictly_lowers_priority() {
    let (node, genesis) = dev_node();
    let (channel, _sink) = attach_channel(&node);

    node.bootstrap.prioritize(&genesis.public);
    node.bootstrap.prioritize(&genesis.public);
    let before = node.bootstrap.priority(&genesis.public);

    let id = node.bootstrap.request_blocks(genesis.public).unwrap();
    let tx = node.store.tx_begin_read();
    let head = node
        .ledger
        .account_info(&tx, &genesis.public)
        .unwrap()
        .head;
    let head_block = node.ledger.block(&tx, &head).unwrap().block;
    drop(tx);

    node.process_message(
        Message::AscPullAck(AscPullAck {
            id,
            payload: AscPullAckPayload::Blocks(BlocksAckPayload {
                blocks: vec![head_block],
            }),
        }),
        &channel,
    );

    assert!(node.bootstrap.priority(&genesis.public) < before);
    node.stop();
}

// ── Scenario: hinted activation by final tally ──────────────────────────

#[test]
fn hinted_scheduler_activates_block_with_final_quorum() {
    let (node, genesis) = dev_node();
    node.block_processor.start();

    let receiver = keypair_from_seed(&[2u8; 32]);
    let tx = node.store.tx_begin_read();
    let info = node.ledger.account_info(&tx, &genesis.public).unwrap();
    drop(tx);
    let send = solved_send(
        &node,
        &genesis,
        info.head,
        info.balance - Amount::raw(10),
        receiver.public,
    );
    assert_eq!(
        node.block_processor
            .add_blocking(Arc::clone(&send), BlockSource::Live),
        Some(BlockStatus::Progress)
    );

    // Genesis (the whole supply) votes final for the send.
    let (channel, _sink) = attach_channel(&node);
    let vote = Vote::new_final(&genesis, 1, vec![send.hash()]);
    node.process_message(Message::ConfirmAck(ConfirmAck { vote }), &channel);

    assert!(node.vote_cache.find(&send.hash()).is_some());
    node.hinted_scheduler.run_iterative();
    assert!(node.active_elections.active_or_confirmed(&send.hash()));
    node.stop();
}

#[test]
fn hinted_scheduler_bootstraps_missing_block_and_keeps_cache_entry() {
    let (node, genesis) = dev_node();
    let (channel, _sink) = attach_channel(&node);

    let unknown = BlockHash::new([0xAB; 32]);
    let vote = Vote::new_final(&genesis, 1, vec![unknown]);
    node.process_message(Message::ConfirmAck(ConfirmAck { vote }), &channel);

    node.hinted_scheduler.run_iterative();
    assert!(!node.active_elections.active_or_confirmed(&unknown));
    assert_eq!(node.stats.count(StatType::Hinting, "bootstrap_triggered"), 1);
    // The cached votes survive for when the block arrives.
    assert!(node.vote_cache.find(&unknown).is_some());
    node.stop();
}

// ── Scenario: priority scheduler end to end ─────────────────────────────

#[test]
fn priority_scheduler_elects_next_unconfirmed_block() {
    let (node, genesis) = dev_node();
    node.block_processor.start();
    node.priority_scheduler.start();

    let receiver = keypair_from_seed(&[2u8; 32]);
    let tx = node.store.tx_begin_read();
    let info = node.ledger.account_info(&tx, &genesis.public).unwrap();
    drop(tx);
    let send = solved_send(
        &node,
        &genesis,
        info.head,
        info.balance - Amount::raw(10),
        receiver.public,
    );
    node.block_processor
        .add_blocking(Arc::clone(&send), BlockSource::Live);

    let tx = node.store.tx_begin_read();
    assert!(node.priority_scheduler.activate(&tx, &genesis.public));
    drop(tx);

    for _ in 0..100 {
        if node.active_elections.active_or_confirmed(&send.hash()) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    assert!(node.active_elections.active_or_confirmed(&send.hash()));

    // Confirming the election and re-activating finds nothing new.
    {
        let tx = node.store.tx_begin_write(Writer::ConfirmationHeight, TABLES);
        node.ledger.confirm(&tx, &send.hash());
        node.active_elections
            .confirmed(&send.qualified_root(), &send.hash());
    }
    let tx = node.store.tx_begin_read();
    assert!(!node.priority_scheduler.activate(&tx, &genesis.public));
    drop(tx);
    node.stop();
}

// ── Scenario: manual elections ──────────────────────────────────────────

#[test]
fn manual_election_request_bypasses_buckets() {
    let (node, genesis) = dev_node();
    node.block_processor.start();
    node.priority_scheduler.start();

    let receiver = keypair_from_seed(&[2u8; 32]);
    let tx = node.store.tx_begin_read();
    let info = node.ledger.account_info(&tx, &genesis.public).unwrap();
    drop(tx);
    let send = solved_send(
        &node,
        &genesis,
        info.head,
        info.balance - Amount::raw(10),
        receiver.public,
    );
    node.block_processor
        .add_blocking(Arc::clone(&send), BlockSource::Local);

    node.priority_scheduler
        .manual(Arc::clone(&send), ElectionBehavior::Manual);
    for _ in 0..100 {
        if node.active_elections.active_or_confirmed(&send.hash()) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    assert!(node.active_elections.active_or_confirmed(&send.hash()));
    node.stop();
}

// ── Scenario: keepalive round trip over the frame layer ─────────────────

#[test]
fn keepalive_round_trips_at_160_bytes() {
    let keepalive = Message::Keepalive(Keepalive::default());
    let bytes = keepalive.to_bytes(NetworkId::Dev, ProtocolInfo::default(), 1);
    assert_eq!(bytes.len(), 160);

    let (decoded, consumed) =
        quill_network::parse_frame(&bytes, NetworkId::Dev, ProtocolInfo::default()).unwrap();
    assert_eq!(consumed, 160);
    assert_eq!(decoded, keepalive);
}

// ── Scenario: bootstrap server answers over a channel ───────────────────

#[test]
fn node_answers_asc_pull_req_on_the_bootstrap_lane() {
    let (node, genesis) = dev_node();
    node.bootstrap_server.start();
    let (channel, sink) = attach_channel(&node);

    let tx = node.store.tx_begin_read();
    let head = node
        .ledger
        .account_info(&tx, &genesis.public)
        .unwrap()
        .head;
    drop(tx);

    node.process_message(
        Message::AscPullReq(quill_messages::AscPullReq {
            id: 99,
            payload: quill_messages::AscPullReqPayload::Blocks(quill_messages::BlocksReqPayload {
                start: HashOrAccount::from(head),
                count: 16,
                start_type: quill_messages::HashType::Block,
            }),
        }),
        &channel,
    );

    for _ in 0..100 {
        if sink.sent_count() > 0 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    let sent = sink.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, TrafficType::Bootstrap);
    let (message, _) =
        quill_network::parse_frame(&sent[0].1, NetworkId::Dev, ProtocolInfo::default()).unwrap();
    match message {
        Message::AscPullAck(ack) => {
            assert_eq!(ack.id, 99);
            match ack.payload {
                AscPullAckPayload::Blocks(payload) => {
                    assert_eq!(payload.blocks.len(), 1);
                    assert_eq!(payload.blocks[0].hash(), head);
                }
                other => panic!("expected blocks payload, got {:?}", other),
            }
        }
        other => panic!("expected AscPullAck, got {:?}", other),
    }
    node.stop();
}
