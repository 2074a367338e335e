//! The 16-byte message envelope: header fields plus the message id.

use quill_ledger::BlockType;
use quill_types::stream::StreamReader;
use quill_types::{NetworkId, ProtocolInfo};

use crate::error::ParseError;

/// Serialized size of the envelope: 8 header bytes + 8-byte id.
pub const HEADER_SIZE: usize = 16;

/// Hard cap on any payload; frames declaring more close the channel.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Extensions bits 8–11 encode a block type.
const BLOCK_TYPE_MASK: u16 = 0x0F00;
/// Extensions bits 12–15 encode an item count (< 16).
const COUNT_MASK: u16 = 0xF000;
/// For telemetry_ack the low bits carry the payload size instead.
const TELEMETRY_SIZE_MASK: u16 = 0x03FF;

/// bulk_pull: a trailing extended-parameters block is present.
pub const BULK_PULL_COUNT_PRESENT_FLAG: u8 = 0;
/// bulk_pull: serve the chain oldest-first.
pub const BULK_PULL_ASCENDING_FLAG: u8 = 1;
/// frontier_req: only report confirmed frontiers.
pub const FRONTIER_REQ_ONLY_CONFIRMED_FLAG: u8 = 1;
/// node_id_handshake: a query payload is present.
pub const HANDSHAKE_QUERY_FLAG: u8 = 0;
/// node_id_handshake: a response payload is present.
pub const HANDSHAKE_RESPONSE_FLAG: u8 = 1;
/// node_id_handshake: the response uses the v2 layout.
pub const HANDSHAKE_V2_FLAG: u8 = 2;

/// Wire tag of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    Invalid,
    NotAType,
    Keepalive,
    Publish,
    ConfirmReq,
    ConfirmAck,
    BulkPull,
    BulkPush,
    FrontierReq,
    NodeIdHandshake,
    BulkPullAccount,
    TelemetryReq,
    TelemetryAck,
    AscPullReq,
    AscPullAck,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Invalid => 0x00,
            Self::NotAType => 0x01,
            Self::Keepalive => 0x02,
            Self::Publish => 0x03,
            Self::ConfirmReq => 0x04,
            Self::ConfirmAck => 0x05,
            Self::BulkPull => 0x06,
            Self::BulkPush => 0x07,
            Self::FrontierReq => 0x08,
            Self::NodeIdHandshake => 0x0A,
            Self::BulkPullAccount => 0x0B,
            Self::TelemetryReq => 0x0C,
            Self::TelemetryAck => 0x0D,
            Self::AscPullReq => 0x0E,
            Self::AscPullAck => 0x0F,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Invalid),
            0x01 => Some(Self::NotAType),
            0x02 => Some(Self::Keepalive),
            0x03 => Some(Self::Publish),
            0x04 => Some(Self::ConfirmReq),
            0x05 => Some(Self::ConfirmAck),
            0x06 => Some(Self::BulkPull),
            0x07 => Some(Self::BulkPush),
            0x08 => Some(Self::FrontierReq),
            0x0A => Some(Self::NodeIdHandshake),
            0x0B => Some(Self::BulkPullAccount),
            0x0C => Some(Self::TelemetryReq),
            0x0D => Some(Self::TelemetryAck),
            0x0E => Some(Self::AscPullReq),
            0x0F => Some(Self::AscPullAck),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::NotAType => "not_a_type",
            Self::Keepalive => "keepalive",
            Self::Publish => "publish",
            Self::ConfirmReq => "confirm_req",
            Self::ConfirmAck => "confirm_ack",
            Self::BulkPull => "bulk_pull",
            Self::BulkPush => "bulk_push",
            Self::FrontierReq => "frontier_req",
            Self::NodeIdHandshake => "node_id_handshake",
            Self::BulkPullAccount => "bulk_pull_account",
            Self::TelemetryReq => "telemetry_req",
            Self::TelemetryAck => "telemetry_ack",
            Self::AscPullReq => "asc_pull_req",
            Self::AscPullAck => "asc_pull_ack",
        }
    }
}

/// The envelope prefixed to every message.
///
/// Layout: network (2, big-endian) | version_max | version_using |
/// version_min | type | extensions (2, little-endian) | id (8, little-endian).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    /// Raw network identifier as read off the wire; may not name a known
    /// network.
    pub network: u16,
    pub version_max: u8,
    pub version_using: u8,
    pub version_min: u8,
    pub message_type: MessageType,
    pub extensions: u16,
    pub id: u64,
}

impl MessageHeader {
    pub fn new(network: NetworkId, protocol: ProtocolInfo, message_type: MessageType, id: u64) -> Self {
        Self {
            network: network.wire_id(),
            version_max: protocol.version_max,
            version_using: protocol.version_using,
            version_min: protocol.version_min,
            message_type,
            extensions: 0,
            id,
        }
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.network.to_be_bytes());
        out.push(self.version_max);
        out.push(self.version_using);
        out.push(self.version_min);
        out.push(self.message_type.as_u8());
        out.extend_from_slice(&self.extensions.to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());
    }

    /// Parse an envelope. Truncation is `InvalidHeader`; an unknown type
    /// byte is `InvalidMessageType`. Network and version are carried
    /// through for [`MessageHeader::validate`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut reader = StreamReader::new(bytes);
        let network = reader.read_u16_be().map_err(|_| ParseError::InvalidHeader)?;
        let version_max = reader.read_u8().map_err(|_| ParseError::InvalidHeader)?;
        let version_using = reader.read_u8().map_err(|_| ParseError::InvalidHeader)?;
        let version_min = reader.read_u8().map_err(|_| ParseError::InvalidHeader)?;
        let type_byte = reader.read_u8().map_err(|_| ParseError::InvalidHeader)?;
        let extensions = reader.read_u16_le().map_err(|_| ParseError::InvalidHeader)?;
        let id = reader.read_u64_le().map_err(|_| ParseError::InvalidHeader)?;

        let message_type =
            MessageType::from_u8(type_byte).ok_or(ParseError::InvalidMessageType)?;
        if matches!(message_type, MessageType::Invalid | MessageType::NotAType) {
            return Err(ParseError::InvalidMessageType);
        }

        Ok(Self {
            network,
            version_max,
            version_using,
            version_min,
            message_type,
            extensions,
            id,
        })
    }

    /// Reject peers on the wrong network or below our minimum version.
    pub fn validate(&self, network: NetworkId, protocol: ProtocolInfo) -> Result<(), ParseError> {
        if self.network != network.wire_id() {
            return Err(ParseError::InvalidNetwork);
        }
        if self.version_using < protocol.version_min {
            return Err(ParseError::OutdatedVersion);
        }
        Ok(())
    }

    // ── Extensions accessors ────────────────────────────────────────────

    pub fn block_type(&self) -> BlockType {
        BlockType::from_u8(((self.extensions & BLOCK_TYPE_MASK) >> 8) as u8)
            .unwrap_or(BlockType::Invalid)
    }

    pub fn set_block_type(&mut self, block_type: BlockType) {
        self.extensions &= !BLOCK_TYPE_MASK;
        self.extensions |= (block_type.as_u8() as u16) << 8;
    }

    pub fn count(&self) -> u8 {
        ((self.extensions & COUNT_MASK) >> 12) as u8
    }

    pub fn set_count(&mut self, count: u8) {
        debug_assert!(count < 16);
        self.extensions &= !COUNT_MASK;
        self.extensions |= (count as u16) << 12;
    }

    pub fn flag(&self, bit: u8) -> bool {
        debug_assert!(bit < 8, "flags above 7 are block_type and count");
        self.extensions & (1 << bit) != 0
    }

    pub fn set_flag(&mut self, bit: u8, enable: bool) {
        debug_assert!(bit < 8, "flags above 7 are block_type and count");
        if enable {
            self.extensions |= 1 << bit;
        } else {
            self.extensions &= !(1 << bit);
        }
    }

    pub fn telemetry_size(&self) -> usize {
        (self.extensions & TELEMETRY_SIZE_MASK) as usize
    }

    pub fn set_telemetry_size(&mut self, size: usize) {
        debug_assert!(size <= TELEMETRY_SIZE_MASK as usize);
        self.extensions &= !TELEMETRY_SIZE_MASK;
        self.extensions |= size as u16 & TELEMETRY_SIZE_MASK;
    }

    /// asc_pull payload length (the whole extensions word).
    pub fn asc_pull_payload_length(&self) -> usize {
        self.extensions as usize
    }

    pub fn set_asc_pull_payload_length(&mut self, length: usize) {
        debug_assert!(length <= u16::MAX as usize);
        self.extensions = length as u16;
    }

    /// Bytes following the envelope, derived from type and extensions.
    pub fn payload_length(&self) -> Result<usize, ParseError> {
        let length = match self.message_type {
            MessageType::Keepalive => crate::message::Keepalive::SIZE,
            MessageType::Publish => self
                .block_type()
                .block_size()
                .ok_or(ParseError::InvalidHeader)?,
            MessageType::ConfirmReq => match self.block_type() {
                BlockType::NotABlock => self.count() as usize * 64,
                block_type => block_type.block_size().ok_or(ParseError::InvalidHeader)?,
            },
            MessageType::ConfirmAck => quill_ledger::Vote::serialized_size(self.count() as usize),
            MessageType::BulkPull => {
                32 + 32
                    + if self.flag(BULK_PULL_COUNT_PRESENT_FLAG) {
                        crate::message::BulkPull::EXTENDED_PARAMETERS_SIZE
                    } else {
                        0
                    }
            }
            MessageType::BulkPush | MessageType::TelemetryReq => 0,
            MessageType::FrontierReq => 32 + 4 + 4,
            MessageType::BulkPullAccount => 32 + 16 + 1,
            MessageType::NodeIdHandshake => {
                let mut size = 0;
                if self.flag(HANDSHAKE_QUERY_FLAG) {
                    size += 32;
                }
                if self.flag(HANDSHAKE_RESPONSE_FLAG) {
                    size += if self.flag(HANDSHAKE_V2_FLAG) {
                        32 + 32 + 32 + 64
                    } else {
                        32 + 64
                    };
                }
                size
            }
            MessageType::TelemetryAck => self.telemetry_size(),
            MessageType::AscPullReq | MessageType::AscPullAck => {
                crate::asc_pull::ASC_PULL_PARTIAL_SIZE + self.asc_pull_payload_length()
            }
            MessageType::Invalid | MessageType::NotAType => {
                return Err(ParseError::InvalidMessageType)
            }
        };
        if length > MAX_PAYLOAD_SIZE {
            return Err(ParseError::SizeTooLarge);
        }
        Ok(length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(message_type: MessageType) -> MessageHeader {
        MessageHeader::new(NetworkId::Dev, ProtocolInfo::default(), message_type, 42)
    }

    #[test]
    fn envelope_roundtrip() {
        let mut original = header(MessageType::ConfirmAck);
        original.set_block_type(BlockType::NotABlock);
        original.set_count(7);

        let mut bytes = Vec::new();
        original.serialize(&mut bytes);
        assert_eq!(bytes.len(), HEADER_SIZE);

        let decoded = MessageHeader::deserialize(&bytes).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.count(), 7);
        assert_eq!(decoded.block_type(), BlockType::NotABlock);
    }

    #[test]
    fn network_bytes_are_big_endian() {
        let mut bytes = Vec::new();
        header(MessageType::Keepalive).serialize(&mut bytes);
        assert_eq!(&bytes[..2], &[0x51, 0x41]); // "QA"
    }

    #[test]
    fn truncated_header_is_invalid_header() {
        let mut bytes = Vec::new();
        header(MessageType::Keepalive).serialize(&mut bytes);
        assert_eq!(
            MessageHeader::deserialize(&bytes[..7]),
            Err(ParseError::InvalidHeader)
        );
    }

    #[test]
    fn unknown_type_byte_is_invalid_type() {
        let mut bytes = Vec::new();
        header(MessageType::Keepalive).serialize(&mut bytes);
        bytes[5] = 0xF3;
        assert_eq!(
            MessageHeader::deserialize(&bytes),
            Err(ParseError::InvalidMessageType)
        );
    }

    #[test]
    fn wrong_network_rejected_at_validate() {
        let parsed = header(MessageType::Keepalive);
        assert_eq!(
            parsed.validate(NetworkId::Live, ProtocolInfo::default()),
            Err(ParseError::InvalidNetwork)
        );
        assert!(parsed
            .validate(NetworkId::Dev, ProtocolInfo::default())
            .is_ok());
    }

    #[test]
    fn outdated_version_parses_but_fails_validate() {
        let mut bytes = Vec::new();
        header(MessageType::Keepalive).serialize(&mut bytes);
        bytes[3] = 1; // version_using

        let parsed = MessageHeader::deserialize(&bytes).unwrap();
        assert_eq!(
            parsed.validate(NetworkId::Dev, ProtocolInfo::default()),
            Err(ParseError::OutdatedVersion)
        );
    }

    #[test]
    fn flag_bits_are_independent_of_block_type() {
        let mut h = header(MessageType::BulkPull);
        h.set_flag(BULK_PULL_COUNT_PRESENT_FLAG, true);
        h.set_flag(BULK_PULL_ASCENDING_FLAG, true);
        h.set_block_type(BlockType::State);
        h.set_count(3);

        assert!(h.flag(BULK_PULL_COUNT_PRESENT_FLAG));
        assert!(h.flag(BULK_PULL_ASCENDING_FLAG));
        assert_eq!(h.block_type(), BlockType::State);
        assert_eq!(h.count(), 3);

        h.set_flag(BULK_PULL_ASCENDING_FLAG, false);
        assert!(!h.flag(BULK_PULL_ASCENDING_FLAG));
        assert_eq!(h.count(), 3);
    }

    #[test]
    fn oversized_asc_pull_payload_is_size_too_large() {
        // The telemetry mask caps at 0x3FF, inside MAX_PAYLOAD_SIZE, so the
        // cap is only reachable through asc_pull's full-width length word.
        let mut h = header(MessageType::AscPullAck);
        h.set_asc_pull_payload_length(4096);
        assert_eq!(h.payload_length().unwrap(), 4096 + 9);

        h.extensions = u16::MAX;
        assert_eq!(h.payload_length(), Err(ParseError::SizeTooLarge));
    }
}
