use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::core::redis::RedisHandle;

use super::{Envelope, FanoutHub};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Feeds events published by any instance into the local hub. Runs until
/// the returned handle is aborted; reconnects with backoff.
pub(crate) fn spawn_redis_relay(
    redis: RedisHandle,
    hub: Arc<FanoutHub>,
    prefix: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = Duration::from_millis(500);
        loop {
            match relay_once(&redis, &hub, &prefix).await {
                Ok(()) => {
                    tracing::warn!("Redis event subscription closed; resubscribing");
                    backoff = Duration::from_millis(500);
                }
                Err(err) => {
                    tracing::error!(error = %err, retry_in = ?backoff, "Redis event relay failed");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    })
}

async fn relay_once(
    redis: &RedisHandle,
    hub: &FanoutHub,
    prefix: &str,
) -> Result<(), redis::RedisError> {
    let mut pubsub = redis.pubsub().await?;
    pubsub.psubscribe(format!("{prefix}:*")).await?;
    tracing::info!(pattern = %format!("{prefix}:*"), "Subscribed to Redis event channels");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let Some(channel) = local_channel(message.get_channel_name(), prefix) else {
            continue;
        };
        let raw: String = match message.get_payload() {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping non-text Redis event");
                continue;
            }
        };
        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => {
                hub.deliver(channel, envelope);
            }
            Err(err) => tracing::warn!(channel, error = %err, "Skipping malformed Redis event"),
        }
    }

    Ok(())
}

fn local_channel<'a>(redis_channel: &'a str, prefix: &str) -> Option<&'a str> {
    redis_channel.strip_prefix(prefix)?.strip_prefix(':')
}
