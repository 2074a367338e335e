//! Binary wire protocol for Quill node-to-node messages.
//!
//! Every frame is a 16-byte envelope (header + id) followed by a payload
//! whose length is derived from the header's type and extensions bitfield.
//! Deserialization is non-panicking: corrupt input yields a [`ParseError`],
//! never a partially constructed message.

pub mod asc_pull;
pub mod error;
pub mod header;
pub mod message;
pub mod telemetry;

pub use asc_pull::{
    AccountInfoAckPayload, AccountInfoReqPayload, AscPullAck, AscPullAckPayload, AscPullReq,
    AscPullReqPayload, AscPullType, BlocksAckPayload, BlocksReqPayload, FrontiersAckPayload,
    FrontiersReqPayload, HashType, ASC_PULL_PARTIAL_SIZE, MAX_PULL_BLOCKS, MAX_PULL_FRONTIERS,
};
pub use error::ParseError;
pub use header::{MessageHeader, MessageType, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{
    BulkPull, BulkPullAccount, ConfirmAck, ConfirmReq, FrontierReq, HandshakeQuery,
    HandshakeResponse, HandshakeResponseV2, Keepalive, Message, NodeIdHandshake, Publish,
    TelemetryAck,
};
pub use telemetry::TelemetryData;

#[cfg(test)]
mod tests {
    use super::*;
    use quill_crypto::keypair_from_seed;
    use quill_ledger::{StateBlock, Vote};
    use quill_types::{
        Account, Amount, BlockHash, HashOrAccount, NetworkId, ProtocolInfo, Root, WorkNonce,
    };
    use std::net::{Ipv6Addr, SocketAddrV6};
    use std::sync::Arc;

    fn network() -> NetworkId {
        NetworkId::Dev
    }

    fn protocol() -> ProtocolInfo {
        ProtocolInfo::default()
    }

    fn sample_block() -> Arc<quill_ledger::Block> {
        let kp = keypair_from_seed(&[5u8; 32]);
        Arc::new(StateBlock::new(
            kp.public,
            BlockHash::new([1; 32]),
            kp.public,
            Amount::raw(1000),
            HashOrAccount::new([2; 32]),
            &kp,
            WorkNonce(0xFEED),
        ))
    }

    /// Serialize, re-parse the envelope, derive the payload length, parse
    /// the payload. The same path the framing reader takes.
    fn roundtrip(message: &Message) -> Message {
        let bytes = message.to_bytes(network(), protocol(), 7);
        let header = MessageHeader::deserialize(&bytes[..HEADER_SIZE]).unwrap();
        header.validate(network(), protocol()).unwrap();
        let payload_length = header.payload_length().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + payload_length);
        Message::deserialize(&header, &bytes[HEADER_SIZE..]).unwrap()
    }

    #[test]
    fn keepalive_roundtrip_is_160_bytes() {
        let message = Message::Keepalive(Keepalive::default());
        let bytes = message.to_bytes(network(), protocol(), 1);
        assert_eq!(bytes.len(), 160);
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn keepalive_with_peers_roundtrip() {
        let mut keepalive = Keepalive::default();
        keepalive.peers[0] = SocketAddrV6::new(Ipv6Addr::LOCALHOST, 7075, 0, 0);
        keepalive.peers[3] = SocketAddrV6::new(Ipv6Addr::new(0, 0, 0, 0, 0, 0xFFFF, 0x7F00, 1), 54000, 0, 0);
        let message = Message::Keepalive(keepalive);
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn publish_roundtrip() {
        let message = Message::Publish(Publish {
            block: sample_block(),
        });
        match roundtrip(&message) {
            Message::Publish(decoded) => assert_eq!(decoded.block, sample_block()),
            other => panic!("expected Publish, got {:?}", other),
        }
    }

    #[test]
    fn confirm_req_hashes_roundtrip() {
        let pairs = vec![
            (BlockHash::new([1; 32]), Root::new([2; 32])),
            (BlockHash::new([3; 32]), Root::new([4; 32])),
        ];
        let message = Message::ConfirmReq(ConfirmReq::RootsHashes(pairs.clone()));
        match roundtrip(&message) {
            Message::ConfirmReq(ConfirmReq::RootsHashes(decoded)) => assert_eq!(decoded, pairs),
            other => panic!("expected ConfirmReq, got {:?}", other),
        }
    }

    #[test]
    fn confirm_req_block_roundtrip() {
        let message = Message::ConfirmReq(ConfirmReq::Block(sample_block()));
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn confirm_req_with_zero_count_is_rejected() {
        let message = Message::ConfirmReq(ConfirmReq::RootsHashes(vec![(
            BlockHash::new([1; 32]),
            Root::new([2; 32]),
        )]));
        let mut bytes = message.to_bytes(network(), protocol(), 1);
        // Forge count = 0 while keeping not_a_block.
        let mut header = MessageHeader::deserialize(&bytes[..HEADER_SIZE]).unwrap();
        header.set_count(0);
        let mut forged = Vec::new();
        header.serialize(&mut forged);
        bytes[..HEADER_SIZE].copy_from_slice(&forged);

        let header = MessageHeader::deserialize(&bytes[..HEADER_SIZE]).unwrap();
        let result = Message::deserialize(&header, &bytes[HEADER_SIZE..header.payload_length().unwrap() + HEADER_SIZE]);
        assert_eq!(result, Err(ParseError::Generic));
    }

    #[test]
    fn confirm_ack_roundtrip() {
        let kp = keypair_from_seed(&[6u8; 32]);
        let vote = Vote::new_final(&kp, 999, vec![BlockHash::new([7; 32]); 3]);
        let message = Message::ConfirmAck(ConfirmAck { vote });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn bulk_pull_roundtrip_with_count() {
        let message = Message::BulkPull(BulkPull {
            start: HashOrAccount::new([1; 32]),
            end: BlockHash::new([2; 32]),
            count: 500,
            ascending: true,
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn bulk_pull_zero_count_omits_extended_parameters() {
        let without = Message::BulkPull(BulkPull {
            start: HashOrAccount::new([1; 32]),
            end: BlockHash::ZERO,
            count: 0,
            ascending: false,
        });
        let bytes = without.to_bytes(network(), protocol(), 1);
        assert_eq!(bytes.len(), HEADER_SIZE + 64);
        assert_eq!(roundtrip(&without), without);
    }

    #[test]
    fn bulk_pull_count_present_zero_equals_absent() {
        // count_present=1 with count=0 must parse to the same message as
        // count_present=0.
        let plain = Message::BulkPull(BulkPull {
            start: HashOrAccount::new([1; 32]),
            end: BlockHash::ZERO,
            count: 0,
            ascending: false,
        });
        let mut header = MessageHeader::new(network(), protocol(), MessageType::BulkPull, 1);
        header.set_flag(header::BULK_PULL_COUNT_PRESENT_FLAG, true);
        let mut payload = Vec::new();
        payload.extend_from_slice(&[1; 32]);
        payload.extend_from_slice(&[0; 32]);
        payload.extend_from_slice(&[0u8; 8]); // extended block, count = 0

        let decoded = Message::deserialize(&header, &payload).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn frontier_req_roundtrip() {
        let message = Message::FrontierReq(FrontierReq {
            start: Account::from_bytes([9; 32]),
            age: 3600,
            count: 1000,
            only_confirmed: true,
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn bulk_pull_account_roundtrip() {
        let message = Message::BulkPullAccount(BulkPullAccount {
            account: Account::from_bytes([3; 32]),
            minimum_amount: Amount::raw(12345),
            flags: 1,
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn empty_payload_messages_roundtrip() {
        assert_eq!(roundtrip(&Message::BulkPush), Message::BulkPush);
        assert_eq!(roundtrip(&Message::TelemetryReq), Message::TelemetryReq);
    }

    #[test]
    fn telemetry_ack_roundtrip_preserves_unknown_tail() {
        let message = Message::TelemetryAck(TelemetryAck {
            data: Some(TelemetryData {
                block_count: 1_000_000,
                peer_count: 200,
                protocol_version: 19,
                unknown_data: vec![1, 2, 3, 4, 5],
                ..Default::default()
            }),
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn empty_telemetry_ack_roundtrip() {
        let message = Message::TelemetryAck(TelemetryAck { data: None });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn handshake_query_and_response_roundtrip() {
        let kp = keypair_from_seed(&[8u8; 32]);
        let message = Message::NodeIdHandshake(NodeIdHandshake {
            query: Some(HandshakeQuery { cookie: [0xCC; 32] }),
            response: Some(HandshakeResponse {
                node_id: kp.public,
                signature: quill_crypto::sign_message(b"cookie", &kp),
                v2: Some(HandshakeResponseV2 {
                    salt: [0xAB; 32],
                    genesis: BlockHash::new([0xEF; 32]),
                }),
            }),
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn handshake_v1_response_roundtrip() {
        let kp = keypair_from_seed(&[8u8; 32]);
        let message = Message::NodeIdHandshake(NodeIdHandshake {
            query: None,
            response: Some(HandshakeResponse {
                node_id: kp.public,
                signature: quill_crypto::sign_message(b"cookie", &kp),
                v2: None,
            }),
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn asc_pull_req_blocks_roundtrip() {
        let message = Message::AscPullReq(AscPullReq {
            id: 0xDEADBEEF,
            payload: AscPullReqPayload::Blocks(BlocksReqPayload {
                start: HashOrAccount::new([4; 32]),
                count: 128,
                start_type: HashType::Block,
            }),
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn asc_pull_req_frontiers_roundtrip() {
        let message = Message::AscPullReq(AscPullReq {
            id: 11,
            payload: AscPullReqPayload::Frontiers(FrontiersReqPayload {
                start: Account::from_bytes([1; 32]),
                count: 1000,
            }),
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn asc_pull_ack_blocks_roundtrip() {
        let message = Message::AscPullAck(AscPullAck {
            id: 77,
            payload: AscPullAckPayload::Blocks(BlocksAckPayload {
                blocks: vec![sample_block(), sample_block()],
            }),
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn asc_pull_ack_empty_blocks_is_just_a_terminator() {
        let message = Message::AscPullAck(AscPullAck {
            id: 1,
            payload: AscPullAckPayload::Blocks(BlocksAckPayload { blocks: vec![] }),
        });
        let bytes = message.to_bytes(network(), protocol(), 1);
        // Envelope + sub_type + id + lone not_a_block byte.
        assert_eq!(bytes.len(), HEADER_SIZE + ASC_PULL_PARTIAL_SIZE + 1);
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn asc_pull_ack_account_info_roundtrip() {
        let message = Message::AscPullAck(AscPullAck {
            id: 42,
            payload: AscPullAckPayload::AccountInfo(AccountInfoAckPayload {
                account: Account::from_bytes([1; 32]),
                open: BlockHash::new([2; 32]),
                head: BlockHash::new([3; 32]),
                block_count: 7,
                conf_frontier: BlockHash::new([4; 32]),
                conf_height: 5,
            }),
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn asc_pull_ack_frontiers_roundtrip() {
        let message = Message::AscPullAck(AscPullAck {
            id: 13,
            payload: AscPullAckPayload::Frontiers(FrontiersAckPayload {
                frontiers: vec![
                    (Account::from_bytes([1; 32]), BlockHash::new([2; 32])),
                    (Account::from_bytes([3; 32]), BlockHash::new([4; 32])),
                ],
            }),
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let message = Message::ConfirmAck(ConfirmAck {
            vote: Vote::new(&keypair_from_seed(&[1u8; 32]), 5, vec![BlockHash::new([1; 32])]),
        });
        let bytes = message.to_bytes(network(), protocol(), 1);
        let header = MessageHeader::deserialize(&bytes[..HEADER_SIZE]).unwrap();
        let truncated = &bytes[HEADER_SIZE..bytes.len() - 10];
        assert!(Message::deserialize(&header, truncated).is_err());
    }

    #[test]
    fn unknown_asc_pull_sub_type_is_rejected() {
        let mut header = MessageHeader::new(network(), protocol(), MessageType::AscPullReq, 1);
        header.set_asc_pull_payload_length(34);
        let mut payload = vec![0x09]; // unknown sub-type
        payload.extend_from_slice(&0u64.to_be_bytes());
        payload.extend_from_slice(&[0u8; 34]);
        assert_eq!(
            Message::deserialize(&header, &payload),
            Err(ParseError::InvalidMessageType)
        );
    }
}
