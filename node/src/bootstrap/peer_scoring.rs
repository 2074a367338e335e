//! Per-peer bootstrap scoring.
//!
//! Each channel used for bootstrap carries an outstanding-request count
//! and lifetime totals. Channel selection walks peers by ascending
//! outstanding count so load spreads; channels at their quota, below the
//! bootstrap protocol version, or with a saturated bootstrap lane are
//! skipped. Dead channels are evicted and counters decayed on the
//! periodic timeout sweep.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use quill_network::{Channel, TrafficType};
use quill_types::ProtocolInfo;

struct PeerScore {
    channel: Weak<Channel>,
    outstanding: u32,
    request_count_total: u64,
    response_count_total: u64,
}

/// Scoring table. Not internally synchronized; the bootstrap service owns
/// it under its own mutex.
pub struct PeerScoring {
    requests_limit: u32,
    scores: HashMap<u64, PeerScore>,
}

impl PeerScoring {
    pub fn new(requests_limit: u32) -> Self {
        Self {
            requests_limit,
            scores: HashMap::new(),
        }
    }

    /// Account one outgoing request against `channel`. Fails when the
    /// channel is at its outstanding quota (0 = unlimited).
    pub fn try_send_message(&mut self, channel: &Arc<Channel>) -> bool {
        let score = self
            .scores
            .entry(channel.channel_id())
            .or_insert_with(|| PeerScore {
                channel: Arc::downgrade(channel),
                outstanding: 0,
                request_count_total: 0,
                response_count_total: 0,
            });
        if self.requests_limit != 0 && score.outstanding >= self.requests_limit {
            return false;
        }
        score.outstanding += 1;
        score.request_count_total += 1;
        true
    }

    /// Account a response from `channel`.
    pub fn received_message(&mut self, channel: &Arc<Channel>) {
        if let Some(score) = self.scores.get_mut(&channel.channel_id()) {
            if score.outstanding > 1 {
                score.outstanding -= 1;
            }
            score.response_count_total += 1;
        }
    }

    /// Pick a channel with spare quota, least-loaded first, and account a
    /// request against it.
    pub fn channel(&mut self) -> Option<Arc<Channel>> {
        let mut candidates: Vec<(u32, u64)> = self
            .scores
            .iter()
            .map(|(id, score)| (score.outstanding, *id))
            .collect();
        candidates.sort_unstable();

        for (_, id) in candidates {
            let Some(score) = self.scores.get(&id) else {
                continue;
            };
            let Some(channel) = score.channel.upgrade() else {
                continue;
            };
            if !channel.alive() {
                continue;
            }
            if channel.network_version() < ProtocolInfo::BOOTSTRAP_VERSION_MIN {
                continue;
            }
            if channel.max(TrafficType::Bootstrap) {
                continue;
            }
            if self.try_send_message(&channel) {
                return Some(channel);
            }
        }
        None
    }

    /// Evict channels that died and decay the counters of the rest, so a
    /// peer that stops responding gradually regains quota.
    pub fn timeout(&mut self) {
        self.scores.retain(|_, score| {
            score
                .channel
                .upgrade()
                .map(|channel| channel.alive())
                .unwrap_or(false)
        });
        for score in self.scores.values_mut() {
            if score.outstanding > 1 {
                score.outstanding = (score.outstanding / 2).max(1);
            }
        }
    }

    /// Track any new channel speaking at least the bootstrap protocol
    /// version.
    pub fn sync(&mut self, channels: &[Arc<Channel>]) {
        for channel in channels {
            if channel.network_version() >= ProtocolInfo::BOOTSTRAP_VERSION_MIN {
                self.scores
                    .entry(channel.channel_id())
                    .or_insert_with(|| PeerScore {
                        channel: Arc::downgrade(channel),
                        outstanding: 0,
                        request_count_total: 0,
                        response_count_total: 0,
                    });
            }
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn outstanding(&self, channel: &Arc<Channel>) -> u32 {
        self.scores
            .get(&channel.channel_id())
            .map(|score| score.outstanding)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_network::{ChannelSink, NullSink, OutboundBandwidthLimiter};
    use quill_types::NetworkId;
    use quill_utils::Stats;
    use std::net::{Ipv6Addr, SocketAddrV6};

    fn channel() -> (Arc<Channel>, Arc<NullSink>) {
        let sink = NullSink::new();
        let channel = Channel::new(
            SocketAddrV6::new(Ipv6Addr::LOCALHOST, 7075, 0, 0),
            NetworkId::Dev,
            ProtocolInfo::default(),
            sink.clone() as Arc<dyn ChannelSink>,
            Arc::new(OutboundBandwidthLimiter::default()),
            Arc::new(Stats::new()),
        );
        (channel, sink)
    }

    #[test]
    fn requests_limit_caps_outstanding() {
        let mut scoring = PeerScoring::new(2);
        let (channel, _sink) = channel();
        assert!(scoring.try_send_message(&channel));
        assert!(scoring.try_send_message(&channel));
        assert!(!scoring.try_send_message(&channel));
        assert_eq!(scoring.outstanding(&channel), 2);
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let mut scoring = PeerScoring::new(0);
        let (channel, _sink) = channel();
        for _ in 0..100 {
            assert!(scoring.try_send_message(&channel));
        }
    }

    #[test]
    fn received_message_frees_quota_with_floor() {
        let mut scoring = PeerScoring::new(2);
        let (channel, _sink) = channel();
        scoring.try_send_message(&channel);
        scoring.try_send_message(&channel);
        scoring.received_message(&channel);
        assert_eq!(scoring.outstanding(&channel), 1);
        // Floor of one until the timeout sweep.
        scoring.received_message(&channel);
        assert_eq!(scoring.outstanding(&channel), 1);
    }

    #[test]
    fn channel_selection_prefers_least_loaded() {
        let mut scoring = PeerScoring::new(8);
        let (busy, _s1) = channel();
        let (idle, _s2) = channel();
        scoring.sync(&[busy.clone(), idle.clone()]);
        scoring.try_send_message(&busy);
        scoring.try_send_message(&busy);

        let selected = scoring.channel().unwrap();
        assert_eq!(selected.channel_id(), idle.channel_id());
    }

    #[test]
    fn saturated_bootstrap_lane_is_skipped() {
        let mut scoring = PeerScoring::new(8);
        let (channel, sink) = channel();
        scoring.sync(&[channel.clone()]);
        sink.set_full(TrafficType::Bootstrap, true);
        assert!(scoring.channel().is_none());
    }

    #[test]
    fn old_protocol_versions_are_excluded() {
        let mut scoring = PeerScoring::new(8);
        let (channel, _sink) = channel();
        channel.set_network_version(ProtocolInfo::BOOTSTRAP_VERSION_MIN - 1);
        scoring.sync(&[channel.clone()]);
        assert!(scoring.is_empty());

        channel.set_network_version(ProtocolInfo::BOOTSTRAP_VERSION_MIN);
        scoring.sync(&[channel.clone()]);
        assert_eq!(scoring.len(), 1);
        assert!(scoring.channel().is_some());
    }

    #[test]
    fn timeout_evicts_dead_and_decays() {
        let mut scoring = PeerScoring::new(8);
        let (alive, _s1) = channel();
        let (dead, _s2) = channel();
        scoring.sync(&[alive.clone(), dead.clone()]);
        for _ in 0..6 {
            scoring.try_send_message(&alive);
        }

        dead.close();
        scoring.timeout();
        assert_eq!(scoring.len(), 1);
        assert_eq!(scoring.outstanding(&alive), 3);
    }
}
