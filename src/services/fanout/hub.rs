use dashmap::DashMap;
use tokio::sync::broadcast;

use super::Envelope;

/// Local subscribers, one broadcast sender per channel name.
pub(crate) struct FanoutHub {
    channels: DashMap<String, broadcast::Sender<Envelope>>,
    capacity: usize,
}

impl FanoutHub {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { channels: DashMap::new(), capacity: capacity.max(1) }
    }

    pub(crate) fn subscribe(&self, channel: &str) -> broadcast::Receiver<Envelope> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Returns how many local subscribers got the envelope.
    pub(crate) fn deliver(&self, channel: &str, envelope: Envelope) -> usize {
        let delivered = match self.channels.get(channel) {
            Some(sender) => sender.send(envelope).unwrap_or(0),
            None => return 0,
        };

        if delivered == 0 {
            self.channels.remove_if(channel, |_, sender| sender.receiver_count() == 0);
        }
        delivered
    }

    pub(crate) fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
