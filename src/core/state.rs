use std::sync::Arc;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::repositories::Store;
use crate::services::attempts::{AttemptPolicy, AttemptService};
use crate::services::fanout::{EventPublisher, FanoutHub};
use crate::services::judge::{self, EssayJudge};
use crate::services::quizzes::QuizService;
use crate::services::scoring::ScoringEngine;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn Store>,
    redis: RedisHandle,
    hub: Arc<FanoutHub>,
    attempts: AttemptService,
    quizzes: QuizService,
}

/// Collaborators injected into the services; production wiring lives in
/// `lib::run`, tests swap in in-memory and recording versions.
pub(crate) struct Collaborators {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) judge: Arc<dyn EssayJudge>,
    pub(crate) publisher: Arc<dyn EventPublisher>,
    pub(crate) hub: Arc<FanoutHub>,
    pub(crate) redis: RedisHandle,
}

impl AppState {
    pub(crate) fn new(settings: Settings, parts: Collaborators) -> Self {
        let judge_timeout = judge::overall_timeout(settings.judge());
        let policy = AttemptPolicy {
            submit_grace: time::Duration::seconds(settings.quiz().submit_grace_seconds),
            max_integrity_event_len: settings.quiz().max_integrity_event_len,
        };

        let scoring = ScoringEngine::new(parts.judge, judge_timeout);
        let attempts =
            AttemptService::new(parts.store.clone(), scoring, parts.publisher.clone(), policy);
        let quizzes = QuizService::new(parts.store.clone(), parts.publisher);

        Self {
            inner: Arc::new(InnerState {
                settings,
                store: parts.store,
                redis: parts.redis,
                hub: parts.hub,
                attempts,
                quizzes,
            }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn hub(&self) -> &Arc<FanoutHub> {
        &self.inner.hub
    }

    pub(crate) fn attempts(&self) -> &AttemptService {
        &self.inner.attempts
    }

    pub(crate) fn quizzes(&self) -> &QuizService {
        &self.inner.quizzes
    }
}
