use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::channel::Channel;
use crate::error::ChannelError;

/// Registry of channels keyed by controller host name.
///
/// Lookup never creates: a feature naming an unknown host is a wiring
/// error its render loop surfaces, not something to paper over.
#[derive(Default)]
pub struct ChannelController {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
}

impl ChannelController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, channel: Arc<Channel>) -> Result<(), ChannelError> {
        let mut channels = self.channels.write().unwrap();
        let host = channel.host_name().to_string();
        if channels.contains_key(&host) {
            return Err(ChannelError::Duplicate(host));
        }
        debug!(host = %host, "channel registered");
        channels.insert(host, channel);
        Ok(())
    }

    /// Unregisters and closes the channel for `host`, returning it if
    /// it existed.
    pub async fn remove_channel(&self, host: &str) -> Option<Arc<Channel>> {
        let removed = self.channels.write().unwrap().remove(host);
        if let Some(channel) = &removed {
            channel.close().await;
        }
        removed
    }

    pub fn find_channel_by_host(&self, host: &str) -> Option<Arc<Channel>> {
        self.channels.read().unwrap().get(host).cloned()
    }

    /// Snapshot of every registered channel, ordered by id for stable
    /// listings.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        let mut all: Vec<Arc<Channel>> =
            self.channels.read().unwrap().values().cloned().collect();
        all.sort_by_key(|c| c.id());
        all
    }

    pub async fn start_all(&self) {
        for channel in self.channels() {
            channel.open().await;
        }
    }

    pub async fn stop_all(&self) {
        for channel in self.channels() {
            channel.close().await;
        }
    }
}
