use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{redis::RedisHandle, time::now_utc};

use super::{Channel, Envelope, EventPublisher, FanoutError, FanoutHub, QuizEvent};

/// Publishes through Redis when connected so every instance's relay sees the
/// event; otherwise delivers straight to this process's hub.
#[derive(Clone)]
pub(crate) struct FanoutPublisher {
    hub: Arc<FanoutHub>,
    redis: RedisHandle,
    prefix: String,
}

impl FanoutPublisher {
    pub(crate) fn new(hub: Arc<FanoutHub>, redis: RedisHandle, prefix: String) -> Self {
        Self { hub, redis, prefix }
    }
}

#[async_trait]
impl EventPublisher for FanoutPublisher {
    async fn publish(&self, channel: Channel, event: QuizEvent) -> Result<(), FanoutError> {
        let envelope = Envelope::new(&event, now_utc())?;
        let channel = channel.to_string();
        let encoded = serde_json::to_string(&envelope)?;

        match self.redis.publish(&format!("{}:{channel}", self.prefix), &encoded).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                let delivered = self.hub.deliver(&channel, envelope);
                tracing::debug!(channel = %channel, event = event.name(), delivered, "Event delivered locally");
                Ok(())
            }
            Err(err) => {
                // Local subscribers still hear about it.
                self.hub.deliver(&channel, envelope);
                Err(err.into())
            }
        }
    }
}
