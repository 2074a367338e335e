//! TCP channel layer.
//!
//! A [`Channel`] is the sending half of a peer connection: it serializes a
//! message once, consults the outbound bandwidth limiter, and hands the
//! bytes to a per-peer writer. The receiving half is the framing reader,
//! which reads the fixed envelope, derives the payload length, and
//! dispatches to the message codec.

pub mod channel;
pub mod error;
pub mod framing;
pub mod limiter;
pub mod registry;
pub mod sink;

pub use channel::{Channel, DropPolicy, TrafficType, WriteCallback};
pub use error::NetworkError;
pub use framing::{parse_frame, read_frame};
pub use limiter::{OutboundBandwidthLimiter, TokenBucket};
pub use registry::ChannelRegistry;
pub use sink::{ChannelSink, NullSink, TcpSink};
