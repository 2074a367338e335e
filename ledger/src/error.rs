use quill_types::BlockHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("block not found: {0}")]
    BlockNotFound(BlockHash),

    #[error("cannot roll back {0}: it or a successor is confirmed")]
    RollbackConfirmed(BlockHash),

    #[error("store error: {0}")]
    Store(#[from] quill_store::StoreError),

    #[error("malformed stored block for {0}")]
    CorruptBlock(BlockHash),
}
