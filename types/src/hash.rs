//! Block hashes and chain roots.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Account;

/// A 32-byte blake2b block hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash(")?;
        for b in &self.0[..4] {
            write!(f, "{:02X}", b)?;
        }
        write!(f, "..)")
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// The root of a block: its previous hash, or the account for open blocks.
///
/// Two blocks with the same root compete for the same slot in an account
/// chain, which is how forks are detected.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Root([u8; 32]);

impl Root {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl From<BlockHash> for Root {
    fn from(hash: BlockHash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl From<Account> for Root {
    fn from(account: Account) -> Self {
        Self(*account.as_bytes())
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Root(")?;
        for b in &self.0[..4] {
            write!(f, "{:02X}", b)?;
        }
        write!(f, "..)")
    }
}

/// (root, previous) pair uniquely identifying a slot in an account chain.
///
/// For an open block the root is the account and previous is zero; for any
/// other block both are the previous hash. Two blocks with the same
/// qualified root are a fork.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedRoot {
    pub root: Root,
    pub previous: BlockHash,
}

impl QualifiedRoot {
    pub fn new(root: Root, previous: BlockHash) -> Self {
        Self { root, previous }
    }
}

/// A 32-byte value that is either a block hash or an account, depending on
/// context (block links, unchecked dependency keys).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HashOrAccount([u8; 32]);

impl HashOrAccount {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_block_hash(&self) -> BlockHash {
        BlockHash::new(self.0)
    }

    pub fn as_account(&self) -> Account {
        Account::from_bytes(self.0)
    }
}

impl From<BlockHash> for HashOrAccount {
    fn from(hash: BlockHash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl From<Account> for HashOrAccount {
    fn from(account: Account) -> Self {
        Self(*account.as_bytes())
    }
}

impl fmt::Debug for HashOrAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashOrAccount(")?;
        for b in &self.0[..4] {
            write!(f, "{:02X}", b)?;
        }
        write!(f, "..)")
    }
}
