//! Telemetry payload carried by `telemetry_ack`.

use quill_types::stream::StreamReader;
use quill_types::{Account, BlockHash, Signature};

use crate::error::ParseError;

/// Signed node statistics. Fields are big-endian on the wire. Bytes past
/// the known schema are kept verbatim in `unknown_data` so newer peers'
/// fields survive relay and re-serialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryData {
    pub signature: Signature,
    pub node_id: Account,
    pub block_count: u64,
    pub cemented_count: u64,
    pub unchecked_count: u64,
    pub account_count: u64,
    pub bandwidth_cap: u64,
    pub peer_count: u32,
    pub protocol_version: u8,
    pub uptime: u64,
    pub genesis_block: BlockHash,
    pub major_version: u8,
    pub minor_version: u8,
    pub patch_version: u8,
    pub pre_release_version: u8,
    pub maker: u8,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    pub active_difficulty: u64,
    pub unknown_data: Vec<u8>,
}

impl TelemetryData {
    /// Serialized size of every known field.
    pub const LATEST_SIZE: usize = 64 + 32 + 8 * 5 + 4 + 1 + 8 + 32 + 5 + 8 + 8;

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.signature.as_bytes());
        out.extend_from_slice(self.node_id.as_bytes());
        out.extend_from_slice(&self.block_count.to_be_bytes());
        out.extend_from_slice(&self.cemented_count.to_be_bytes());
        out.extend_from_slice(&self.unchecked_count.to_be_bytes());
        out.extend_from_slice(&self.account_count.to_be_bytes());
        out.extend_from_slice(&self.bandwidth_cap.to_be_bytes());
        out.extend_from_slice(&self.peer_count.to_be_bytes());
        out.push(self.protocol_version);
        out.extend_from_slice(&self.uptime.to_be_bytes());
        out.extend_from_slice(self.genesis_block.as_bytes());
        out.push(self.major_version);
        out.push(self.minor_version);
        out.push(self.patch_version);
        out.push(self.pre_release_version);
        out.push(self.maker);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.active_difficulty.to_be_bytes());
        out.extend_from_slice(&self.unknown_data);
    }

    pub fn deserialize(
        reader: &mut StreamReader,
        payload_length: usize,
    ) -> Result<Self, ParseError> {
        let signature = Signature(reader.read_array_64()?);
        let node_id = Account::from_bytes(reader.read_array_32()?);
        let block_count = reader.read_u64_be()?;
        let cemented_count = reader.read_u64_be()?;
        let unchecked_count = reader.read_u64_be()?;
        let account_count = reader.read_u64_be()?;
        let bandwidth_cap = reader.read_u64_be()?;
        let peer_count = reader.read_u32_be()?;
        let protocol_version = reader.read_u8()?;
        let uptime = reader.read_u64_be()?;
        let genesis_block = BlockHash::new(reader.read_array_32()?);
        let major_version = reader.read_u8()?;
        let minor_version = reader.read_u8()?;
        let patch_version = reader.read_u8()?;
        let pre_release_version = reader.read_u8()?;
        let maker = reader.read_u8()?;
        let timestamp = reader.read_u64_be()?;
        let active_difficulty = reader.read_u64_be()?;
        let unknown_data = if payload_length > Self::LATEST_SIZE {
            reader.take(payload_length - Self::LATEST_SIZE)?.to_vec()
        } else {
            Vec::new()
        };
        Ok(Self {
            signature,
            node_id,
            block_count,
            cemented_count,
            unchecked_count,
            account_count,
            bandwidth_cap,
            peer_count,
            protocol_version,
            uptime,
            genesis_block,
            major_version,
            minor_version,
            patch_version,
            pre_release_version,
            maker,
            timestamp,
            active_difficulty,
            unknown_data,
        })
    }
}

impl Default for TelemetryData {
    fn default() -> Self {
        Self {
            signature: Signature::ZERO,
            node_id: Account::ZERO,
            block_count: 0,
            cemented_count: 0,
            unchecked_count: 0,
            account_count: 0,
            bandwidth_cap: 0,
            peer_count: 0,
            protocol_version: 0,
            uptime: 0,
            genesis_block: BlockHash::ZERO,
            major_version: 0,
            minor_version: 0,
            patch_version: 0,
            pre_release_version: 0,
            maker: 0,
            timestamp: 0,
            active_difficulty: 0,
            unknown_data: Vec::new(),
        }
    }
}
