//! Fundamental types shared across the Quill node.
//!
//! This crate defines the core newtypes every other crate in the workspace
//! builds on: accounts, hashes, roots, amounts, signatures, and network
//! identifiers. Everything here is cheap to copy and free of business logic.

pub mod account;
pub mod amount;
pub mod hash;
pub mod keys;
pub mod network;
pub mod stream;

pub use account::Account;
pub use amount::Amount;
pub use hash::{BlockHash, HashOrAccount, QualifiedRoot, Root};
pub use keys::{Signature, WorkNonce};
pub use network::{NetworkId, ProtocolInfo};
pub use stream::{StreamError, StreamReader};
