//! The sending half of a peer connection.

use std::io;
use std::net::SocketAddrV6;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use quill_messages::Message;
use quill_types::{NetworkId, ProtocolInfo};
use quill_utils::{Direction, StatType, Stats};
use rand::Rng;

use crate::limiter::OutboundBandwidthLimiter;
use crate::sink::ChannelSink;

/// Logical class of traffic, each with its own queue budget and outbound
/// token bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrafficType {
    Generic = 0,
    Bootstrap = 1,
}

/// What to do when the outbound limiter denies a send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropPolicy {
    /// Queue anyway; used for messages that must not be lost.
    NoDrop,
    /// Drop the message and complete with `Unsupported`.
    Limiter,
}

/// Completion for a send: byte count written, or the error.
pub type WriteCallback = Box<dyn FnOnce(io::Result<usize>) + Send>;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// A peer channel. Serializes messages once, applies the shared outbound
/// limiter, and queues bytes on the sink. Cheap to clone via `Arc`;
/// sending is safe from any thread.
pub struct Channel {
    id: u64,
    remote: SocketAddrV6,
    network: NetworkId,
    protocol: ProtocolInfo,
    /// Peer protocol version learned during the handshake.
    network_version: AtomicU8,
    sink: Arc<dyn ChannelSink>,
    limiter: Arc<OutboundBandwidthLimiter>,
    stats: Arc<Stats>,
    next_message_id: AtomicU64,
}

impl Channel {
    pub fn new(
        remote: SocketAddrV6,
        network: NetworkId,
        protocol: ProtocolInfo,
        sink: Arc<dyn ChannelSink>,
        limiter: Arc<OutboundBandwidthLimiter>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            remote,
            network,
            protocol,
            network_version: AtomicU8::new(protocol.version_using),
            sink,
            limiter,
            stats,
            next_message_id: AtomicU64::new(rand::thread_rng().gen()),
        })
    }

    /// Process-unique id; peer scoring and the async-tag table key on it.
    pub fn channel_id(&self) -> u64 {
        self.id
    }

    pub fn remote(&self) -> SocketAddrV6 {
        self.remote
    }

    pub fn network_version(&self) -> u8 {
        self.network_version.load(Ordering::Relaxed)
    }

    pub fn set_network_version(&self, version: u8) {
        self.network_version.store(version, Ordering::Relaxed);
    }

    pub fn alive(&self) -> bool {
        self.sink.alive()
    }

    pub fn close(&self) {
        self.sink.close();
    }

    /// Whether `traffic`'s queue is at its budget; senders that can defer
    /// should back off instead of queueing.
    pub fn max(&self, traffic: TrafficType) -> bool {
        self.sink.is_full(traffic)
    }

    /// Serialize and queue `message`.
    ///
    /// The bytes are serialized exactly once. Before queueing, the shared
    /// outbound limiter is consulted: under `DropPolicy::Limiter` a denied
    /// send is dropped and the callback is posted to the executor with
    /// `Unsupported` (never invoked on the caller's stack); under
    /// `NoDrop` the message is queued regardless. On flush the callback
    /// gets the byte count; on socket failure, the error.
    pub fn send(
        &self,
        message: &Message,
        callback: Option<WriteCallback>,
        policy: DropPolicy,
        traffic: TrafficType,
    ) {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let bytes = message.to_bytes(self.network, self.protocol, message_id);
        let message_type = message.message_type();

        tracing::trace!(
            target: "channel",
            channel = self.id,
            buffer_id = message_id,
            message_type = message_type.as_str(),
            size = bytes.len(),
            "send"
        );

        let pass = self.limiter.should_pass(bytes.len(), traffic);
        if !pass && policy == DropPolicy::Limiter {
            self.stats
                .inc_dir(StatType::Channel, "drop", Direction::Out);
            tracing::trace!(
                target: "channel",
                channel = self.id,
                buffer_id = message_id,
                result = "drop",
                "send_result"
            );
            if let Some(callback) = callback {
                self.sink.post(Box::new(move || {
                    callback(Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "dropped by outbound limiter",
                    )))
                }));
            }
            return;
        }

        self.stats
            .inc_dir(StatType::Message, message_type.as_str(), Direction::Out);

        let stats = Arc::clone(&self.stats);
        let channel_id = self.id;
        let wrapped: WriteCallback = Box::new(move |result| {
            match &result {
                Ok(size) => {
                    tracing::trace!(
                        target: "channel",
                        channel = channel_id,
                        buffer_id = message_id,
                        size,
                        result = "ok",
                        "send_result"
                    );
                }
                Err(error) => {
                    stats.inc_dir(StatType::Channel, "write_error", Direction::Out);
                    tracing::trace!(
                        target: "channel",
                        channel = channel_id,
                        buffer_id = message_id,
                        error = %error,
                        result = "error",
                        "send_result"
                    );
                }
            }
            if let Some(callback) = callback {
                callback(result);
            }
        });
        self.sink.write(traffic, bytes, Some(wrapped));
    }
}
