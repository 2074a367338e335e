//! Block variants and their wire serialization.

use quill_crypto::{blake2b_multi, sign_message, KeyPair};
use quill_types::stream::{StreamError, StreamReader};
use quill_types::{
    Account, Amount, BlockHash, HashOrAccount, QualifiedRoot, Root, Signature, WorkNonce,
};
use std::sync::Arc;

use quill_store::Sideband;

/// Wire tag for block variants. Also used as the terminator of block
/// sequences (`NotABlock`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockType {
    Invalid,
    NotABlock,
    Send,
    Receive,
    Open,
    Change,
    State,
}

impl BlockType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::NotABlock => 1,
            Self::Send => 2,
            Self::Receive => 3,
            Self::Open => 4,
            Self::Change => 5,
            Self::State => 6,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Invalid),
            1 => Some(Self::NotABlock),
            2 => Some(Self::Send),
            3 => Some(Self::Receive),
            4 => Some(Self::Open),
            5 => Some(Self::Change),
            6 => Some(Self::State),
            _ => None,
        }
    }

    /// Serialized size of this block variant's payload, if it has one.
    pub fn block_size(self) -> Option<usize> {
        match self {
            Self::Send => Some(152),
            Self::Receive => Some(136),
            Self::Open => Some(168),
            Self::Change => Some(136),
            Self::State => Some(216),
            Self::Invalid | Self::NotABlock => None,
        }
    }
}

/// Legacy send: moves funds to a destination, recording the new balance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendBlock {
    pub previous: BlockHash,
    pub destination: Account,
    pub balance: Amount,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// Legacy receive: pockets a pending send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveBlock {
    pub previous: BlockHash,
    pub source: BlockHash,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// Legacy open: the first block of an account chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenBlock {
    pub source: BlockHash,
    pub representative: Account,
    pub account: Account,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// Legacy change: switches representative only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeBlock {
    pub previous: BlockHash,
    pub representative: Account,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// Universal state block: every transition carries the full account state.
/// The link is the destination for sends, the source hash for receives and
/// zero for a pure representative change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateBlock {
    pub account: Account,
    pub previous: BlockHash,
    pub representative: Account,
    pub balance: Amount,
    pub link: HashOrAccount,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// An immutable block. Shared via [`Arc`] across queues; never mutated
/// after creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    Send(SendBlock),
    Receive(ReceiveBlock),
    Open(OpenBlock),
    Change(ChangeBlock),
    State(StateBlock),
}

const STATE_PREAMBLE: [u8; 32] = {
    let mut preamble = [0u8; 32];
    preamble[31] = 6;
    preamble
};

impl Block {
    pub fn block_type(&self) -> BlockType {
        match self {
            Self::Send(_) => BlockType::Send,
            Self::Receive(_) => BlockType::Receive,
            Self::Open(_) => BlockType::Open,
            Self::Change(_) => BlockType::Change,
            Self::State(_) => BlockType::State,
        }
    }

    /// The blake2b hash of the canonical fields.
    pub fn hash(&self) -> BlockHash {
        let digest = match self {
            Self::Send(b) => blake2b_multi(&[
                b.previous.as_bytes(),
                b.destination.as_bytes(),
                &b.balance.to_be_bytes(),
            ]),
            Self::Receive(b) => blake2b_multi(&[b.previous.as_bytes(), b.source.as_bytes()]),
            Self::Open(b) => blake2b_multi(&[
                b.source.as_bytes(),
                b.representative.as_bytes(),
                b.account.as_bytes(),
            ]),
            Self::Change(b) => blake2b_multi(&[b.previous.as_bytes(), b.representative.as_bytes()]),
            Self::State(b) => blake2b_multi(&[
                &STATE_PREAMBLE,
                b.account.as_bytes(),
                b.previous.as_bytes(),
                b.representative.as_bytes(),
                &b.balance.to_be_bytes(),
                b.link.as_bytes(),
            ]),
        };
        BlockHash::new(digest)
    }

    /// Previous block hash; zero for open blocks and state-open blocks.
    pub fn previous(&self) -> BlockHash {
        match self {
            Self::Send(b) => b.previous,
            Self::Receive(b) => b.previous,
            Self::Open(_) => BlockHash::ZERO,
            Self::Change(b) => b.previous,
            Self::State(b) => b.previous,
        }
    }

    /// The chain slot this block claims: previous, or the account for the
    /// first block of a chain.
    pub fn root(&self) -> Root {
        let previous = self.previous();
        if !previous.is_zero() {
            return Root::from(previous);
        }
        match self {
            Self::Open(b) => Root::from(b.account),
            Self::State(b) => Root::from(b.account),
            // Legacy send/receive/change with a zero previous never
            // validate, so the root value is inconsequential.
            _ => Root::ZERO,
        }
    }

    pub fn qualified_root(&self) -> QualifiedRoot {
        QualifiedRoot::new(self.root(), self.previous())
    }

    /// The root the proof-of-work is computed against.
    pub fn work_root(&self) -> [u8; 32] {
        *self.root().as_bytes()
    }

    /// The account field, for variants that carry one.
    pub fn account_field(&self) -> Option<Account> {
        match self {
            Self::Open(b) => Some(b.account),
            Self::State(b) => Some(b.account),
            _ => None,
        }
    }

    /// Destination of a legacy send.
    pub fn destination(&self) -> Option<Account> {
        match self {
            Self::Send(b) => Some(b.destination),
            _ => None,
        }
    }

    /// Source hash of a legacy receive or open.
    pub fn source(&self) -> Option<BlockHash> {
        match self {
            Self::Receive(b) => Some(b.source),
            Self::Open(b) => Some(b.source),
            _ => None,
        }
    }

    /// State block link field.
    pub fn link(&self) -> Option<HashOrAccount> {
        match self {
            Self::State(b) => Some(b.link),
            _ => None,
        }
    }

    /// The missing dependency to park under on a gap-source result: the
    /// legacy source or the state link.
    pub fn source_or_link(&self) -> BlockHash {
        self.source()
            .unwrap_or_else(|| match self {
                Self::State(b) => b.link.as_block_hash(),
                _ => BlockHash::ZERO,
            })
    }

    pub fn representative(&self) -> Option<Account> {
        match self {
            Self::Open(b) => Some(b.representative),
            Self::Change(b) => Some(b.representative),
            Self::State(b) => Some(b.representative),
            _ => None,
        }
    }

    /// Balance field, for variants that carry one.
    pub fn balance_field(&self) -> Option<Amount> {
        match self {
            Self::Send(b) => Some(b.balance),
            Self::State(b) => Some(b.balance),
            _ => None,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Self::Send(b) => &b.signature,
            Self::Receive(b) => &b.signature,
            Self::Open(b) => &b.signature,
            Self::Change(b) => &b.signature,
            Self::State(b) => &b.signature,
        }
    }

    pub fn work(&self) -> WorkNonce {
        match self {
            Self::Send(b) => b.work,
            Self::Receive(b) => b.work,
            Self::Open(b) => b.work,
            Self::Change(b) => b.work,
            Self::State(b) => b.work,
        }
    }

    /// Serialize the block payload (no type byte).
    ///
    /// Legacy work is little-endian on the wire, state work big-endian; a
    /// compatibility quirk every implementation preserves.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            Self::Send(b) => {
                out.extend_from_slice(b.previous.as_bytes());
                out.extend_from_slice(b.destination.as_bytes());
                out.extend_from_slice(&b.balance.to_be_bytes());
                out.extend_from_slice(b.signature.as_bytes());
                out.extend_from_slice(&b.work.number().to_le_bytes());
            }
            Self::Receive(b) => {
                out.extend_from_slice(b.previous.as_bytes());
                out.extend_from_slice(b.source.as_bytes());
                out.extend_from_slice(b.signature.as_bytes());
                out.extend_from_slice(&b.work.number().to_le_bytes());
            }
            Self::Open(b) => {
                out.extend_from_slice(b.source.as_bytes());
                out.extend_from_slice(b.representative.as_bytes());
                out.extend_from_slice(b.account.as_bytes());
                out.extend_from_slice(b.signature.as_bytes());
                out.extend_from_slice(&b.work.number().to_le_bytes());
            }
            Self::Change(b) => {
                out.extend_from_slice(b.previous.as_bytes());
                out.extend_from_slice(b.representative.as_bytes());
                out.extend_from_slice(b.signature.as_bytes());
                out.extend_from_slice(&b.work.number().to_le_bytes());
            }
            Self::State(b) => {
                out.extend_from_slice(b.account.as_bytes());
                out.extend_from_slice(b.previous.as_bytes());
                out.extend_from_slice(b.representative.as_bytes());
                out.extend_from_slice(&b.balance.to_be_bytes());
                out.extend_from_slice(b.link.as_bytes());
                out.extend_from_slice(b.signature.as_bytes());
                out.extend_from_slice(&b.work.number().to_be_bytes());
            }
        }
    }

    /// Serialize with a leading type byte.
    pub fn serialize_with_type(&self, out: &mut Vec<u8>) {
        out.push(self.block_type().as_u8());
        self.serialize(out);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.block_type().block_size().unwrap_or(0));
        self.serialize(&mut out);
        out
    }

    /// Deserialize a block payload of a known type.
    pub fn deserialize(block_type: BlockType, reader: &mut StreamReader) -> Result<Self, StreamError> {
        match block_type {
            BlockType::Send => Ok(Self::Send(SendBlock {
                previous: BlockHash::new(reader.read_array_32()?),
                destination: Account::from_bytes(reader.read_array_32()?),
                balance: Amount::from_be_bytes({
                    let bytes = reader.take(16)?;
                    let mut out = [0u8; 16];
                    out.copy_from_slice(bytes);
                    out
                }),
                signature: Signature(reader.read_array_64()?),
                work: WorkNonce(reader.read_u64_le()?),
            })),
            BlockType::Receive => Ok(Self::Receive(ReceiveBlock {
                previous: BlockHash::new(reader.read_array_32()?),
                source: BlockHash::new(reader.read_array_32()?),
                signature: Signature(reader.read_array_64()?),
                work: WorkNonce(reader.read_u64_le()?),
            })),
            BlockType::Open => Ok(Self::Open(OpenBlock {
                source: BlockHash::new(reader.read_array_32()?),
                representative: Account::from_bytes(reader.read_array_32()?),
                account: Account::from_bytes(reader.read_array_32()?),
                signature: Signature(reader.read_array_64()?),
                work: WorkNonce(reader.read_u64_le()?),
            })),
            BlockType::Change => Ok(Self::Change(ChangeBlock {
                previous: BlockHash::new(reader.read_array_32()?),
                representative: Account::from_bytes(reader.read_array_32()?),
                signature: Signature(reader.read_array_64()?),
                work: WorkNonce(reader.read_u64_le()?),
            })),
            BlockType::State => Ok(Self::State(StateBlock {
                account: Account::from_bytes(reader.read_array_32()?),
                previous: BlockHash::new(reader.read_array_32()?),
                representative: Account::from_bytes(reader.read_array_32()?),
                balance: Amount::from_be_bytes({
                    let bytes = reader.take(16)?;
                    let mut out = [0u8; 16];
                    out.copy_from_slice(bytes);
                    out
                }),
                link: HashOrAccount::new(reader.read_array_32()?),
                signature: Signature(reader.read_array_64()?),
                work: WorkNonce(reader.read_u64_be()?),
            })),
            BlockType::Invalid | BlockType::NotABlock => Err(StreamError),
        }
    }

    /// Read a type byte and the following block. `Ok(None)` on the
    /// `not_a_block` terminator.
    pub fn deserialize_with_type(reader: &mut StreamReader) -> Result<Option<Self>, StreamError> {
        let type_byte = reader.read_u8()?;
        match BlockType::from_u8(type_byte) {
            Some(BlockType::NotABlock) => Ok(None),
            Some(BlockType::Invalid) | None => Err(StreamError),
            Some(block_type) => Ok(Some(Self::deserialize(block_type, reader)?)),
        }
    }
}

impl StateBlock {
    /// Build and sign a state block.
    pub fn new(
        account: Account,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        link: HashOrAccount,
        keypair: &KeyPair,
        work: WorkNonce,
    ) -> Block {
        let mut block = StateBlock {
            account,
            previous,
            representative,
            balance,
            link,
            signature: Signature::ZERO,
            work,
        };
        let hash = Block::State(block.clone()).hash();
        block.signature = sign_message(hash.as_bytes(), keypair);
        Block::State(block)
    }
}

impl SendBlock {
    pub fn new(
        previous: BlockHash,
        destination: Account,
        balance: Amount,
        keypair: &KeyPair,
        work: WorkNonce,
    ) -> Block {
        let mut block = SendBlock {
            previous,
            destination,
            balance,
            signature: Signature::ZERO,
            work,
        };
        let hash = Block::Send(block.clone()).hash();
        block.signature = sign_message(hash.as_bytes(), keypair);
        Block::Send(block)
    }
}

impl OpenBlock {
    pub fn new(
        source: BlockHash,
        representative: Account,
        keypair: &KeyPair,
        work: WorkNonce,
    ) -> Block {
        let mut block = OpenBlock {
            source,
            representative,
            account: keypair.public,
            signature: Signature::ZERO,
            work,
        };
        let hash = Block::Open(block.clone()).hash();
        block.signature = sign_message(hash.as_bytes(), keypair);
        Block::Open(block)
    }
}

impl ReceiveBlock {
    pub fn new(previous: BlockHash, source: BlockHash, keypair: &KeyPair, work: WorkNonce) -> Block {
        let mut block = ReceiveBlock {
            previous,
            source,
            signature: Signature::ZERO,
            work,
        };
        let hash = Block::Receive(block.clone()).hash();
        block.signature = sign_message(hash.as_bytes(), keypair);
        Block::Receive(block)
    }
}

impl ChangeBlock {
    pub fn new(
        previous: BlockHash,
        representative: Account,
        keypair: &KeyPair,
        work: WorkNonce,
    ) -> Block {
        let mut block = ChangeBlock {
            previous,
            representative,
            signature: Signature::ZERO,
            work,
        };
        let hash = Block::Change(block.clone()).hash();
        block.signature = sign_message(hash.as_bytes(), keypair);
        Block::Change(block)
    }
}

/// A block as stored in the ledger: the block plus its sideband.
#[derive(Clone, Debug)]
pub struct SavedBlock {
    pub block: Arc<Block>,
    pub sideband: Sideband,
}

impl SavedBlock {
    pub fn hash(&self) -> BlockHash {
        self.block.hash()
    }

    pub fn height(&self) -> u64 {
        self.sideband.height
    }

    pub fn account(&self) -> Account {
        self.sideband.account
    }

    pub fn balance(&self) -> Amount {
        self.sideband.balance
    }
}
