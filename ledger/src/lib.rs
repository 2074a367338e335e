//! Block types and the ledger engine.
//!
//! A block is an immutable record identified by its blake2b hash and shared
//! by `Arc` across the pipeline. The [`Ledger`] applies blocks to the store
//! under a write transaction, producing one [`BlockStatus`] per block, and
//! can roll unconfirmed blocks back out again.

pub mod block;
pub mod ledger;
pub mod status;
pub mod vote;
pub mod work;

mod error;

pub use block::{
    Block, BlockType, ChangeBlock, OpenBlock, ReceiveBlock, SavedBlock, SendBlock, StateBlock,
};
pub use error::LedgerError;
pub use ledger::Ledger;
pub use status::BlockStatus;
pub use vote::{Vote, TIMESTAMP_FINAL_BIT};
pub use work::WorkThresholds;
