use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("ledger error: {0}")]
    Ledger(#[from] quill_ledger::LedgerError),

    #[error("store error: {0}")]
    Store(#[from] quill_store::StoreError),

    #[error("network error: {0}")]
    Network(#[from] quill_network::NetworkError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
