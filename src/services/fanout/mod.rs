//! Best-effort event fan-out. Events are addressed to a channel; whoever is
//! subscribed at publish time receives them, nobody else ever will.

mod hub;
mod publisher;
mod relay;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::{metrics, time::format_offset};

pub(crate) use hub::FanoutHub;
pub(crate) use publisher::FanoutPublisher;
pub(crate) use relay::spawn_redis_relay;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Channel {
    Student(String),
    Course(String),
    Global,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Student(id) => write!(f, "student:{id}"),
            Self::Course(id) => write!(f, "course:{id}"),
            Self::Global => f.write_str("global"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AttemptGraded {
    pub(crate) attempt_id: String,
    pub(crate) quiz_id: String,
    pub(crate) student_id: String,
    pub(crate) course_id: String,
    pub(crate) score: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatsUpdated {
    pub(crate) quiz_id: String,
    pub(crate) course_id: String,
    pub(crate) submission_count: i64,
    pub(crate) average_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuizCreated {
    pub(crate) quiz_id: String,
    pub(crate) course_id: String,
    pub(crate) title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuizDeleted {
    pub(crate) quiz_id: String,
    pub(crate) course_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DataChanged {
    pub(crate) reason: &'static str,
    pub(crate) course_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum QuizEvent {
    AttemptGraded(AttemptGraded),
    StatsUpdated(StatsUpdated),
    QuizCreated(QuizCreated),
    QuizDeleted(QuizDeleted),
    DataChanged(DataChanged),
}

impl QuizEvent {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::AttemptGraded(_) => "attempt.graded",
            Self::StatsUpdated(_) => "stats.updated",
            Self::QuizCreated(_) => "quiz.created",
            Self::QuizDeleted(_) => "quiz.deleted",
            Self::DataChanged(_) => "data.changed",
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::AttemptGraded(body) => serde_json::to_value(body),
            Self::StatsUpdated(body) => serde_json::to_value(body),
            Self::QuizCreated(body) => serde_json::to_value(body),
            Self::QuizDeleted(body) => serde_json::to_value(body),
            Self::DataChanged(body) => serde_json::to_value(body),
        }
    }
}

/// Wire form shared by Redis and WebSocket subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub(crate) event: String,
    pub(crate) payload: Value,
    pub(crate) ts: String,
}

impl Envelope {
    pub(crate) fn new(event: &QuizEvent, at: OffsetDateTime) -> Result<Self, FanoutError> {
        Ok(Self { event: event.name().to_string(), payload: event.payload()?, ts: format_offset(at) })
    }
}

#[derive(Debug, Error)]
pub(crate) enum FanoutError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("redis publish failed: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub(crate) trait EventPublisher: Send + Sync {
    async fn publish(&self, channel: Channel, event: QuizEvent) -> Result<(), FanoutError>;
}

/// Publishes and swallows the failure. A mutation that already committed is
/// never rolled back because a subscriber could not be told about it.
pub(crate) async fn publish_or_warn(
    publisher: &dyn EventPublisher,
    channel: Channel,
    event: QuizEvent,
) {
    let name = event.name();
    if let Err(err) = publisher.publish(channel.clone(), event).await {
        metrics::fanout_publish_failed(name);
        tracing::warn!(event = name, channel = %channel, error = %err, "Failed to publish event");
    }
}
