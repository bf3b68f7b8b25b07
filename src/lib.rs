pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::{
    config::Settings,
    redis::RedisHandle,
    state::{AppState, Collaborators},
    telemetry,
};
use crate::repositories::PgStore;
use crate::services::fanout::{spawn_redis_relay, FanoutHub, FanoutPublisher};
use crate::services::judge::judge_from_settings;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; events stay local to this instance");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let hub = Arc::new(FanoutHub::new(settings.fanout().channel_capacity));
    let prefix = settings.fanout().redis_channel_prefix.clone();
    let relay = if redis.is_connected().await {
        Some(spawn_redis_relay(redis.clone(), hub.clone(), prefix.clone()))
    } else {
        None
    };
    let publisher = Arc::new(FanoutPublisher::new(hub.clone(), redis.clone(), prefix));
    let judge = judge_from_settings(&settings);

    let state = AppState::new(
        settings,
        Collaborators {
            store: Arc::new(PgStore::new(db_pool)),
            judge,
            publisher,
            hub,
            redis: redis.clone(),
        },
    );

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        judge = state.settings().judge().is_configured(),
        "Quizgrade API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    if let Some(relay) = relay {
        relay.abort();
    }
    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}
