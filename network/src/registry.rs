//! Live channel registry.

use std::sync::{Arc, Mutex};

use crate::channel::Channel;

/// All currently connected peer channels. Consumers (keepalive gossip,
/// bootstrap peer scoring) take snapshots via `list`.
pub struct ChannelRegistry {
    channels: Mutex<Vec<Arc<Channel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, channel: Arc<Channel>) {
        self.channels.lock().unwrap().push(channel);
    }

    /// Snapshot of live channels; dead ones are pruned as a side effect.
    pub fn list(&self) -> Vec<Arc<Channel>> {
        let mut channels = self.channels.lock().unwrap();
        channels.retain(|channel| channel.alive());
        channels.clone()
    }

    pub fn len(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().unwrap().is_empty()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
