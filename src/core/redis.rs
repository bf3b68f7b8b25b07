use std::sync::Arc;

use redis::aio::{ConnectionManager, PubSub};
use redis::{cmd, Client, RedisError};
use tokio::sync::RwLock;

#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    pub(crate) async fn is_connected(&self) -> bool {
        self.manager.read().await.is_some()
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    /// Returns `Ok(None)` when no connection is configured, otherwise the
    /// number of Redis subscribers that received the message.
    pub(crate) async fn publish(
        &self,
        channel: &str,
        payload: &str,
    ) -> Result<Option<i64>, RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(None);
        };

        let receivers: i64 =
            cmd("PUBLISH").arg(channel).arg(payload).query_async(&mut manager).await?;
        Ok(Some(receivers))
    }

    /// Dedicated connection for pattern subscriptions; pub/sub cannot share
    /// the multiplexed manager.
    pub(crate) async fn pubsub(&self) -> Result<PubSub, RedisError> {
        let client = Client::open(self.url.clone())?;
        client.get_async_pubsub().await
    }
}

#[cfg(test)]
mod tests {
    use super::{RedisHandle, RedisHealth};

    #[tokio::test]
    async fn unconnected_handle_reports_disconnected_and_skips_publish() {
        let redis = RedisHandle::new("redis://127.0.0.1:6379/1".to_string());

        assert!(!redis.is_connected().await);
        assert!(matches!(redis.health().await, RedisHealth::Disconnected));
        assert_eq!(redis.publish("quiz-events:global", "{}").await.expect("publish"), None);
    }
}
