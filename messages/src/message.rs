//! The message union and per-variant payload codecs.

use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;

use quill_ledger::{Block, BlockType, Vote};
use quill_types::stream::StreamReader;
use quill_types::{Account, Amount, BlockHash, HashOrAccount, NetworkId, ProtocolInfo, Root, Signature};

use crate::asc_pull::{AscPullAck, AscPullReq};
use crate::error::ParseError;
use crate::header::{
    MessageHeader, MessageType, BULK_PULL_ASCENDING_FLAG, BULK_PULL_COUNT_PRESENT_FLAG,
    FRONTIER_REQ_ONLY_CONFIRMED_FLAG, HANDSHAKE_QUERY_FLAG, HANDSHAKE_RESPONSE_FLAG,
    HANDSHAKE_V2_FLAG, HEADER_SIZE,
};
use crate::telemetry::TelemetryData;

/// Every message the node sends or receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Keepalive(Keepalive),
    Publish(Publish),
    ConfirmReq(ConfirmReq),
    ConfirmAck(ConfirmAck),
    BulkPull(BulkPull),
    BulkPush,
    FrontierReq(FrontierReq),
    BulkPullAccount(BulkPullAccount),
    TelemetryReq,
    TelemetryAck(TelemetryAck),
    NodeIdHandshake(NodeIdHandshake),
    AscPullReq(AscPullReq),
    AscPullAck(AscPullAck),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Keepalive(_) => MessageType::Keepalive,
            Self::Publish(_) => MessageType::Publish,
            Self::ConfirmReq(_) => MessageType::ConfirmReq,
            Self::ConfirmAck(_) => MessageType::ConfirmAck,
            Self::BulkPull(_) => MessageType::BulkPull,
            Self::BulkPush => MessageType::BulkPush,
            Self::FrontierReq(_) => MessageType::FrontierReq,
            Self::BulkPullAccount(_) => MessageType::BulkPullAccount,
            Self::TelemetryReq => MessageType::TelemetryReq,
            Self::TelemetryAck(_) => MessageType::TelemetryAck,
            Self::NodeIdHandshake(_) => MessageType::NodeIdHandshake,
            Self::AscPullReq(_) => MessageType::AscPullReq,
            Self::AscPullAck(_) => MessageType::AscPullAck,
        }
    }

    /// Serialize the full frame: envelope plus payload. The variant fills
    /// in its extensions bits before the header is written.
    pub fn to_bytes(&self, network: NetworkId, protocol: ProtocolInfo, id: u64) -> Vec<u8> {
        let mut header = MessageHeader::new(network, protocol, self.message_type(), id);
        let mut payload = Vec::new();
        match self {
            Self::Keepalive(m) => m.serialize(&mut payload),
            Self::Publish(m) => m.serialize(&mut payload, &mut header),
            Self::ConfirmReq(m) => m.serialize(&mut payload, &mut header),
            Self::ConfirmAck(m) => m.serialize(&mut payload, &mut header),
            Self::BulkPull(m) => m.serialize(&mut payload, &mut header),
            Self::BulkPush | Self::TelemetryReq => {}
            Self::FrontierReq(m) => m.serialize(&mut payload, &mut header),
            Self::BulkPullAccount(m) => m.serialize(&mut payload),
            Self::TelemetryAck(m) => m.serialize(&mut payload, &mut header),
            Self::NodeIdHandshake(m) => m.serialize(&mut payload, &mut header),
            Self::AscPullReq(m) => m.serialize(&mut payload, &mut header),
            Self::AscPullAck(m) => m.serialize(&mut payload, &mut header),
        }

        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        header.serialize(&mut out);
        out.extend_from_slice(&payload);
        out
    }

    /// Parse a payload whose length was already derived from the header.
    pub fn deserialize(header: &MessageHeader, payload: &[u8]) -> Result<Self, ParseError> {
        let mut reader = StreamReader::new(payload);
        match header.message_type {
            MessageType::Keepalive => Ok(Self::Keepalive(Keepalive::deserialize(&mut reader)?)),
            MessageType::Publish => Ok(Self::Publish(Publish::deserialize(header, &mut reader)?)),
            MessageType::ConfirmReq => {
                Ok(Self::ConfirmReq(ConfirmReq::deserialize(header, &mut reader)?))
            }
            MessageType::ConfirmAck => {
                Ok(Self::ConfirmAck(ConfirmAck::deserialize(header, &mut reader)?))
            }
            MessageType::BulkPull => Ok(Self::BulkPull(BulkPull::deserialize(header, &mut reader)?)),
            MessageType::BulkPush => Ok(Self::BulkPush),
            MessageType::FrontierReq => Ok(Self::FrontierReq(FrontierReq::deserialize(
                header,
                &mut reader,
            )?)),
            MessageType::BulkPullAccount => Ok(Self::BulkPullAccount(BulkPullAccount::deserialize(
                &mut reader,
            )?)),
            MessageType::TelemetryReq => Ok(Self::TelemetryReq),
            MessageType::TelemetryAck => Ok(Self::TelemetryAck(TelemetryAck::deserialize(
                header,
                &mut reader,
            )?)),
            MessageType::NodeIdHandshake => Ok(Self::NodeIdHandshake(NodeIdHandshake::deserialize(
                header,
                &mut reader,
            )?)),
            MessageType::AscPullReq => {
                Ok(Self::AscPullReq(AscPullReq::deserialize(header, &mut reader)?))
            }
            MessageType::AscPullAck => {
                Ok(Self::AscPullAck(AscPullAck::deserialize(header, &mut reader)?))
            }
            MessageType::Invalid | MessageType::NotAType => Err(ParseError::InvalidMessageType),
        }
    }
}

// ── keepalive ───────────────────────────────────────────────────────────

/// Eight peer endpoints for gossip. Unused slots stay as the zero endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keepalive {
    pub peers: [SocketAddrV6; 8],
}

impl Keepalive {
    pub const SIZE: usize = 8 * 18;

    pub fn serialize(&self, out: &mut Vec<u8>) {
        for peer in &self.peers {
            out.extend_from_slice(&peer.ip().octets());
            out.extend_from_slice(&peer.port().to_le_bytes());
        }
    }

    pub fn deserialize(reader: &mut StreamReader) -> Result<Self, ParseError> {
        let mut peers = [Keepalive::zero_endpoint(); 8];
        for peer in &mut peers {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(reader.take(16)?);
            let port = reader.read_u16_le()?;
            *peer = SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0);
        }
        Ok(Self { peers })
    }

    fn zero_endpoint() -> SocketAddrV6 {
        SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0)
    }
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            peers: [Self::zero_endpoint(); 8],
        }
    }
}

// ── publish ─────────────────────────────────────────────────────────────

/// Flood a block to the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publish {
    pub block: Arc<Block>,
}

impl Publish {
    pub fn serialize(&self, out: &mut Vec<u8>, header: &mut MessageHeader) {
        header.set_block_type(self.block.block_type());
        self.block.serialize(out);
    }

    pub fn deserialize(
        header: &MessageHeader,
        reader: &mut StreamReader,
    ) -> Result<Self, ParseError> {
        let block = Block::deserialize(header.block_type(), reader).map_err(ParseError::from)?;
        Ok(Self {
            block: Arc::new(block),
        })
    }
}

// ── confirm_req ─────────────────────────────────────────────────────────

/// Solicit votes, either for a full block or for (hash, root) pairs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmReq {
    Block(Arc<Block>),
    RootsHashes(Vec<(BlockHash, Root)>),
}

impl ConfirmReq {
    pub fn serialize(&self, out: &mut Vec<u8>, header: &mut MessageHeader) {
        match self {
            Self::Block(block) => {
                header.set_block_type(block.block_type());
                block.serialize(out);
            }
            Self::RootsHashes(pairs) => {
                debug_assert!(!pairs.is_empty() && pairs.len() < 16);
                header.set_block_type(BlockType::NotABlock);
                header.set_count(pairs.len() as u8);
                for (hash, root) in pairs {
                    out.extend_from_slice(hash.as_bytes());
                    out.extend_from_slice(root.as_bytes());
                }
            }
        }
    }

    pub fn deserialize(
        header: &MessageHeader,
        reader: &mut StreamReader,
    ) -> Result<Self, ParseError> {
        if header.block_type() == BlockType::NotABlock {
            let count = header.count() as usize;
            let mut pairs = Vec::with_capacity(count);
            for _ in 0..count {
                let hash = BlockHash::new(reader.read_array_32()?);
                let root = Root::new(reader.read_array_32()?);
                if !hash.is_zero() || !root.is_zero() {
                    pairs.push((hash, root));
                }
            }
            // A hashes request with nothing in it is a protocol error.
            if pairs.is_empty() || pairs.len() != count {
                return Err(ParseError::Generic);
            }
            Ok(Self::RootsHashes(pairs))
        } else {
            let block =
                Block::deserialize(header.block_type(), reader).map_err(ParseError::from)?;
            Ok(Self::Block(Arc::new(block)))
        }
    }
}

// ── confirm_ack ─────────────────────────────────────────────────────────

/// A representative's vote for up to 15 hashes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmAck {
    pub vote: Vote,
}

impl ConfirmAck {
    pub fn serialize(&self, out: &mut Vec<u8>, header: &mut MessageHeader) {
        debug_assert!(self.vote.hashes.len() < 16);
        header.set_block_type(BlockType::NotABlock);
        header.set_count(self.vote.hashes.len() as u8);
        self.vote.serialize(out);
    }

    pub fn deserialize(
        header: &MessageHeader,
        reader: &mut StreamReader,
    ) -> Result<Self, ParseError> {
        let vote = Vote::deserialize(reader, header.count() as usize)?;
        Ok(Self { vote })
    }
}

// ── bulk_pull ───────────────────────────────────────────────────────────

/// Legacy chain pull: serve blocks from `start` toward `end`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkPull {
    pub start: HashOrAccount,
    pub end: BlockHash,
    /// 0 means "no limit" and is never encoded as an extended block.
    pub count: u32,
    pub ascending: bool,
}

impl BulkPull {
    /// Zero pad byte, 4-byte little-endian count, 3 zero pad bytes.
    pub const EXTENDED_PARAMETERS_SIZE: usize = 8;

    pub fn serialize(&self, out: &mut Vec<u8>, header: &mut MessageHeader) {
        header.set_flag(BULK_PULL_COUNT_PRESENT_FLAG, self.count != 0);
        header.set_flag(BULK_PULL_ASCENDING_FLAG, self.ascending);
        out.extend_from_slice(self.start.as_bytes());
        out.extend_from_slice(self.end.as_bytes());
        if self.count != 0 {
            let mut extended = [0u8; Self::EXTENDED_PARAMETERS_SIZE];
            extended[1..5].copy_from_slice(&self.count.to_le_bytes());
            out.extend_from_slice(&extended);
        }
    }

    pub fn deserialize(
        header: &MessageHeader,
        reader: &mut StreamReader,
    ) -> Result<Self, ParseError> {
        let start = HashOrAccount::new(reader.read_array_32()?);
        let end = BlockHash::new(reader.read_array_32()?);
        let count = if header.flag(BULK_PULL_COUNT_PRESENT_FLAG) {
            let extended = reader.take(Self::EXTENDED_PARAMETERS_SIZE)?;
            if extended[0] != 0 {
                return Err(ParseError::Generic);
            }
            u32::from_le_bytes([extended[1], extended[2], extended[3], extended[4]])
        } else {
            0
        };
        Ok(Self {
            start,
            end,
            count,
            ascending: header.flag(BULK_PULL_ASCENDING_FLAG),
        })
    }
}

// ── frontier_req ────────────────────────────────────────────────────────

/// Ask for (account, head) pairs starting at `start`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrontierReq {
    pub start: Account,
    pub age: u32,
    pub count: u32,
    pub only_confirmed: bool,
}

impl FrontierReq {
    pub fn serialize(&self, out: &mut Vec<u8>, header: &mut MessageHeader) {
        header.set_flag(FRONTIER_REQ_ONLY_CONFIRMED_FLAG, self.only_confirmed);
        out.extend_from_slice(self.start.as_bytes());
        out.extend_from_slice(&self.age.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
    }

    pub fn deserialize(
        header: &MessageHeader,
        reader: &mut StreamReader,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            start: Account::from_bytes(reader.read_array_32()?),
            age: reader.read_u32_le()?,
            count: reader.read_u32_le()?,
            only_confirmed: header.flag(FRONTIER_REQ_ONLY_CONFIRMED_FLAG),
        })
    }
}

// ── bulk_pull_account ───────────────────────────────────────────────────

/// Pull the pending entries of one account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkPullAccount {
    pub account: Account,
    pub minimum_amount: Amount,
    pub flags: u8,
}

impl BulkPullAccount {
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.account.as_bytes());
        out.extend_from_slice(&self.minimum_amount.to_be_bytes());
        out.push(self.flags);
    }

    pub fn deserialize(reader: &mut StreamReader) -> Result<Self, ParseError> {
        let account = Account::from_bytes(reader.read_array_32()?);
        let mut amount = [0u8; 16];
        amount.copy_from_slice(reader.take(16)?);
        Ok(Self {
            account,
            minimum_amount: Amount::from_be_bytes(amount),
            flags: reader.read_u8()?,
        })
    }
}

// ── telemetry_ack ───────────────────────────────────────────────────────

/// Node statistics; an empty payload acknowledges without data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryAck {
    pub data: Option<TelemetryData>,
}

impl TelemetryAck {
    pub fn serialize(&self, out: &mut Vec<u8>, header: &mut MessageHeader) {
        if let Some(data) = &self.data {
            header.set_telemetry_size(TelemetryData::LATEST_SIZE + data.unknown_data.len());
            data.serialize(out);
        }
    }

    pub fn deserialize(
        header: &MessageHeader,
        reader: &mut StreamReader,
    ) -> Result<Self, ParseError> {
        let size = header.telemetry_size();
        if size == 0 {
            return Ok(Self { data: None });
        }
        Ok(Self {
            data: Some(TelemetryData::deserialize(reader, size)?),
        })
    }
}

// ── node_id_handshake ───────────────────────────────────────────────────

/// Cookie challenge proving a peer controls its node id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeIdHandshake {
    pub query: Option<HandshakeQuery>,
    pub response: Option<HandshakeResponse>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeQuery {
    pub cookie: [u8; 32],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub node_id: Account,
    pub signature: Signature,
    pub v2: Option<HandshakeResponseV2>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeResponseV2 {
    pub salt: [u8; 32],
    pub genesis: BlockHash,
}

impl NodeIdHandshake {
    pub fn serialize(&self, out: &mut Vec<u8>, header: &mut MessageHeader) {
        if let Some(query) = &self.query {
            header.set_flag(HANDSHAKE_QUERY_FLAG, true);
            // Querying peers always advertise v2 support.
            header.set_flag(HANDSHAKE_V2_FLAG, true);
            out.extend_from_slice(&query.cookie);
        }
        if let Some(response) = &self.response {
            header.set_flag(HANDSHAKE_RESPONSE_FLAG, true);
            header.set_flag(HANDSHAKE_V2_FLAG, response.v2.is_some());
            out.extend_from_slice(response.node_id.as_bytes());
            if let Some(v2) = &response.v2 {
                out.extend_from_slice(&v2.salt);
                out.extend_from_slice(v2.genesis.as_bytes());
            }
            out.extend_from_slice(response.signature.as_bytes());
        }
    }

    pub fn deserialize(
        header: &MessageHeader,
        reader: &mut StreamReader,
    ) -> Result<Self, ParseError> {
        let query = if header.flag(HANDSHAKE_QUERY_FLAG) {
            Some(HandshakeQuery {
                cookie: reader.read_array_32()?,
            })
        } else {
            None
        };
        let response = if header.flag(HANDSHAKE_RESPONSE_FLAG) {
            let node_id = Account::from_bytes(reader.read_array_32()?);
            let v2 = if header.flag(HANDSHAKE_V2_FLAG) {
                Some(HandshakeResponseV2 {
                    salt: reader.read_array_32()?,
                    genesis: BlockHash::new(reader.read_array_32()?),
                })
            } else {
                None
            };
            let signature = Signature(reader.read_array_64()?);
            Some(HandshakeResponse {
                node_id,
                signature,
                v2,
            })
        } else {
            None
        };
        if query.is_none() && response.is_none() {
            return Err(ParseError::Generic);
        }
        Ok(Self { query, response })
    }
}
