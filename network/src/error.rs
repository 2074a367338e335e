use quill_messages::ParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Parse(#[from] ParseError),

    #[error("channel closed")]
    ChannelClosed,
}
