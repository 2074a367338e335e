use quill_types::StreamError;
use thiserror::Error;

/// Why an incoming frame failed to parse. The channel that produced the
/// frame is closed; the process never panics on remote input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed message payload")]
    Generic,

    #[error("malformed message header")]
    InvalidHeader,

    #[error("message from a different network")]
    InvalidNetwork,

    #[error("unknown or unexpected message type")]
    InvalidMessageType,

    #[error("peer protocol version is below the minimum")]
    OutdatedVersion,

    #[error("declared payload exceeds the maximum frame size")]
    SizeTooLarge,
}

impl From<StreamError> for ParseError {
    fn from(_: StreamError) -> Self {
        Self::Generic
    }
}
