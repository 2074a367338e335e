//! Ascending-bootstrap pull request/response messages.
//!
//! Both directions share the same envelope shape: a sub-type byte and a
//! big-endian correlation id, followed by a payload whose form depends on
//! the sub-type. The extensions word of the header stores the payload
//! length so the framing reader can size the frame before parsing.

use std::sync::Arc;

use quill_ledger::{Block, BlockType};
use quill_types::stream::StreamReader;
use quill_types::{Account, BlockHash, HashOrAccount};

use crate::error::ParseError;
use crate::header::MessageHeader;

/// Size of the sub_type byte plus the 8-byte correlation id.
pub const ASC_PULL_PARTIAL_SIZE: usize = 9;

/// Maximum blocks in one blocks response.
pub const MAX_PULL_BLOCKS: usize = 128;

/// Maximum frontier pairs in one frontiers response.
pub const MAX_PULL_FRONTIERS: usize = 1024;

/// Sub-type of an asc_pull exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AscPullType {
    Invalid,
    Blocks,
    AccountInfo,
    Frontiers,
}

impl AscPullType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Invalid => 0x00,
            Self::Blocks => 0x01,
            Self::AccountInfo => 0x02,
            Self::Frontiers => 0x03,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Invalid),
            0x01 => Some(Self::Blocks),
            0x02 => Some(Self::AccountInfo),
            0x03 => Some(Self::Frontiers),
            _ => None,
        }
    }
}

/// Whether a 32-byte target names a block or an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashType {
    Account,
    Block,
}

impl HashType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Account => 0,
            Self::Block => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Account),
            1 => Some(Self::Block),
            _ => None,
        }
    }
}

// ── Request ─────────────────────────────────────────────────────────────

/// A bootstrap pull request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AscPullReq {
    /// Correlation id echoed back in the matching ack.
    pub id: u64,
    pub payload: AscPullReqPayload,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AscPullReqPayload {
    Blocks(BlocksReqPayload),
    AccountInfo(AccountInfoReqPayload),
    Frontiers(FrontiersReqPayload),
}

/// Pull up to `count` blocks starting at a block hash or an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlocksReqPayload {
    pub start: HashOrAccount,
    pub count: u8,
    pub start_type: HashType,
}

/// Ask for the summary of one account (by account or by any of its block
/// hashes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountInfoReqPayload {
    pub target: HashOrAccount,
    pub target_type: HashType,
}

/// Ask for up to `count` (account, head) pairs starting at `start`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrontiersReqPayload {
    pub start: Account,
    pub count: u16,
}

impl AscPullReq {
    pub fn payload_type(&self) -> AscPullType {
        match self.payload {
            AscPullReqPayload::Blocks(_) => AscPullType::Blocks,
            AscPullReqPayload::AccountInfo(_) => AscPullType::AccountInfo,
            AscPullReqPayload::Frontiers(_) => AscPullType::Frontiers,
        }
    }

    pub fn serialize(&self, out: &mut Vec<u8>, header: &mut MessageHeader) {
        out.push(self.payload_type().as_u8());
        out.extend_from_slice(&self.id.to_be_bytes());

        let payload_start = out.len();
        match &self.payload {
            AscPullReqPayload::Blocks(payload) => {
                out.extend_from_slice(payload.start.as_bytes());
                out.push(payload.count);
                out.push(payload.start_type.as_u8());
            }
            AscPullReqPayload::AccountInfo(payload) => {
                out.extend_from_slice(payload.target.as_bytes());
                out.push(payload.target_type.as_u8());
            }
            AscPullReqPayload::Frontiers(payload) => {
                out.extend_from_slice(payload.start.as_bytes());
                out.extend_from_slice(&payload.count.to_be_bytes());
            }
        }
        header.set_asc_pull_payload_length(out.len() - payload_start);
    }

    pub fn deserialize(
        _header: &MessageHeader,
        reader: &mut StreamReader,
    ) -> Result<Self, ParseError> {
        let sub_type =
            AscPullType::from_u8(reader.read_u8()?).ok_or(ParseError::InvalidMessageType)?;
        let id = reader.read_u64_be()?;
        let payload = match sub_type {
            AscPullType::Blocks => AscPullReqPayload::Blocks(BlocksReqPayload {
                start: HashOrAccount::new(reader.read_array_32()?),
                count: reader.read_u8()?,
                start_type: HashType::from_u8(reader.read_u8()?).ok_or(ParseError::Generic)?,
            }),
            AscPullType::AccountInfo => AscPullReqPayload::AccountInfo(AccountInfoReqPayload {
                target: HashOrAccount::new(reader.read_array_32()?),
                target_type: HashType::from_u8(reader.read_u8()?).ok_or(ParseError::Generic)?,
            }),
            AscPullType::Frontiers => AscPullReqPayload::Frontiers(FrontiersReqPayload {
                start: Account::from_bytes(reader.read_array_32()?),
                count: reader.read_u16_be()?,
            }),
            AscPullType::Invalid => return Err(ParseError::InvalidMessageType),
        };
        Ok(Self { id, payload })
    }
}

// ── Response ────────────────────────────────────────────────────────────

/// A bootstrap pull response, correlated to its request by id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AscPullAck {
    pub id: u64,
    pub payload: AscPullAckPayload,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AscPullAckPayload {
    Blocks(BlocksAckPayload),
    AccountInfo(AccountInfoAckPayload),
    Frontiers(FrontiersAckPayload),
}

/// A run of blocks, empty when neither the start block nor the account was
/// found. On the wire the run ends with a `not_a_block` terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlocksAckPayload {
    pub blocks: Vec<Arc<Block>>,
}

/// Summary of one account. All fields except `account` are zero when the
/// account is unknown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountInfoAckPayload {
    pub account: Account,
    pub open: BlockHash,
    pub head: BlockHash,
    pub block_count: u64,
    pub conf_frontier: BlockHash,
    pub conf_height: u64,
}

/// (account, head) pairs; on the wire the run ends with a zero pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrontiersAckPayload {
    pub frontiers: Vec<(Account, BlockHash)>,
}

impl AscPullAck {
    pub fn payload_type(&self) -> AscPullType {
        match self.payload {
            AscPullAckPayload::Blocks(_) => AscPullType::Blocks,
            AscPullAckPayload::AccountInfo(_) => AscPullType::AccountInfo,
            AscPullAckPayload::Frontiers(_) => AscPullType::Frontiers,
        }
    }

    pub fn serialize(&self, out: &mut Vec<u8>, header: &mut MessageHeader) {
        out.push(self.payload_type().as_u8());
        out.extend_from_slice(&self.id.to_be_bytes());

        let payload_start = out.len();
        match &self.payload {
            AscPullAckPayload::Blocks(payload) => {
                debug_assert!(payload.blocks.len() <= MAX_PULL_BLOCKS);
                for block in &payload.blocks {
                    block.serialize_with_type(out);
                }
                out.push(BlockType::NotABlock.as_u8());
            }
            AscPullAckPayload::AccountInfo(payload) => {
                out.extend_from_slice(payload.account.as_bytes());
                out.extend_from_slice(payload.open.as_bytes());
                out.extend_from_slice(payload.head.as_bytes());
                out.extend_from_slice(&payload.block_count.to_be_bytes());
                out.extend_from_slice(payload.conf_frontier.as_bytes());
                out.extend_from_slice(&payload.conf_height.to_be_bytes());
            }
            AscPullAckPayload::Frontiers(payload) => {
                debug_assert!(payload.frontiers.len() <= MAX_PULL_FRONTIERS);
                for (account, head) in &payload.frontiers {
                    out.extend_from_slice(account.as_bytes());
                    out.extend_from_slice(head.as_bytes());
                }
                out.extend_from_slice(Account::ZERO.as_bytes());
                out.extend_from_slice(BlockHash::ZERO.as_bytes());
            }
        }
        header.set_asc_pull_payload_length(out.len() - payload_start);
    }

    pub fn deserialize(
        _header: &MessageHeader,
        reader: &mut StreamReader,
    ) -> Result<Self, ParseError> {
        let sub_type =
            AscPullType::from_u8(reader.read_u8()?).ok_or(ParseError::InvalidMessageType)?;
        let id = reader.read_u64_be()?;
        let payload = match sub_type {
            AscPullType::Blocks => {
                let mut blocks = Vec::new();
                while let Some(block) =
                    Block::deserialize_with_type(reader).map_err(ParseError::from)?
                {
                    if blocks.len() == MAX_PULL_BLOCKS {
                        return Err(ParseError::SizeTooLarge);
                    }
                    blocks.push(Arc::new(block));
                }
                AscPullAckPayload::Blocks(BlocksAckPayload { blocks })
            }
            AscPullType::AccountInfo => AscPullAckPayload::AccountInfo(AccountInfoAckPayload {
                account: Account::from_bytes(reader.read_array_32()?),
                open: BlockHash::new(reader.read_array_32()?),
                head: BlockHash::new(reader.read_array_32()?),
                block_count: reader.read_u64_be()?,
                conf_frontier: BlockHash::new(reader.read_array_32()?),
                conf_height: reader.read_u64_be()?,
            }),
            AscPullType::Frontiers => {
                let mut frontiers = Vec::new();
                loop {
                    let account = Account::from_bytes(reader.read_array_32()?);
                    let head = BlockHash::new(reader.read_array_32()?);
                    if account.is_zero() && head.is_zero() {
                        break;
                    }
                    if frontiers.len() == MAX_PULL_FRONTIERS {
                        return Err(ParseError::SizeTooLarge);
                    }
                    frontiers.push((account, head));
                }
                AscPullAckPayload::Frontiers(FrontiersAckPayload { frontiers })
            }
            AscPullType::Invalid => return Err(ParseError::InvalidMessageType),
        };
        Ok(Self { id, payload })
    }
}
