use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use sqlx::types::Json;
use time::{macros::datetime, Duration, OffsetDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{
    config::Settings,
    redis::RedisHandle,
    security,
    state::{AppState, Collaborators},
    time::now_utc,
};
use crate::db::models::{Question, Quiz};
use crate::db::types::{QuestionKind, Role};
use crate::repositories::{memory::InMemoryStore, NewQuiz, QuizRepository};
use crate::services::attempts::{AttemptPolicy, AttemptService};
use crate::services::fanout::{
    Channel, EventPublisher, FanoutError, FanoutHub, FanoutPublisher, QuizEvent,
};
use crate::services::judge::{EssayJudge, JudgeError, JudgeRequest, JudgeVerdict};
use crate::services::scoring::{RawAnswer, ScoringEngine};

const TEST_SECRET_KEY: &str = "test-secret";
const TEST_REDIS_URL: &str = "redis://127.0.0.1:6379/1";

pub(crate) const COURSE_ID: &str = "course-1";
pub(crate) const INSTRUCTOR_ID: &str = "instructor-1";
pub(crate) const STUDENT_ID: &str = "student-1";
pub(crate) const QUIZ_ID: &str = "quiz-1";

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("QUIZGRADE_ENV", "test");
    std::env::remove_var("QUIZGRADE_STRICT_CONFIG");
    std::env::set_var("SECRET_KEY", TEST_SECRET_KEY);
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::remove_var("QUIZ_SUBMIT_GRACE_SECONDS");
    std::env::remove_var("JUDGE_API_KEY");
}

pub(crate) fn choice(id: &str, reference: &str) -> Question {
    Question {
        id: id.to_string(),
        prompt: format!("Pick the right option for {id}"),
        kind: QuestionKind::MultipleChoice,
        options: vec![reference.to_string(), "None of the above".to_string()],
        grading_reference: reference.to_string(),
    }
}

pub(crate) fn essay(id: &str, rubric: &str) -> Question {
    Question {
        id: id.to_string(),
        prompt: format!("Discuss {id}"),
        kind: QuestionKind::Essay,
        options: Vec::new(),
        grading_reference: rubric.to_string(),
    }
}

pub(crate) fn answer(question_id: &str, text: &str) -> RawAnswer {
    RawAnswer { question_id: question_id.to_string(), answer: text.to_string() }
}

pub(crate) fn quiz_with(questions: Vec<Question>) -> Quiz {
    let opens_at = datetime!(2025-03-01 08:00 UTC);
    Quiz {
        id: QUIZ_ID.to_string(),
        course_id: COURSE_ID.to_string(),
        title: "Weekly check".to_string(),
        questions: Json(questions),
        time_allowance_minutes: 30,
        opens_at,
        closes_at: opens_at + Duration::hours(2),
        created_at: opens_at,
    }
}

/// Judge that replays queued verdicts and records what it was asked.
#[derive(Default)]
pub(crate) struct ScriptedJudge {
    replies: StdMutex<VecDeque<Result<JudgeVerdict, JudgeError>>>,
    requests: StdMutex<Vec<JudgeRequest>>,
}

impl ScriptedJudge {
    pub(crate) fn new(replies: Vec<Result<JudgeVerdict, JudgeError>>) -> Self {
        Self { replies: StdMutex::new(replies.into()), requests: StdMutex::default() }
    }

    pub(crate) fn requests(&self) -> Vec<JudgeRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl EssayJudge for ScriptedJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
        self.requests.lock().expect("requests lock").push(request.clone());
        self.replies.lock().expect("replies lock").pop_front().unwrap_or(Err(JudgeError::Unavailable))
    }
}

pub(crate) struct HangingJudge;

#[async_trait]
impl EssayJudge for HangingJudge {
    async fn judge(&self, _request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
        std::future::pending().await
    }
}

#[derive(Default)]
pub(crate) struct RecordingPublisher {
    events: StdMutex<Vec<(Channel, QuizEvent)>>,
}

impl RecordingPublisher {
    pub(crate) fn events(&self) -> Vec<(Channel, QuizEvent)> {
        self.events.lock().expect("events lock").clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, channel: Channel, event: QuizEvent) -> Result<(), FanoutError> {
        self.events.lock().expect("events lock").push((channel, event));
        Ok(())
    }
}

pub(crate) struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish(&self, _channel: Channel, _event: QuizEvent) -> Result<(), FanoutError> {
        let err = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
        Err(FanoutError::Encode(err))
    }
}

async fn seed_store(questions: Vec<Question>, now: OffsetDateTime) -> (Arc<InMemoryStore>, Quiz) {
    let store = Arc::new(InMemoryStore::default());
    store.add_course(COURSE_ID, "Chemistry 101", INSTRUCTOR_ID).await;
    store.enroll(COURSE_ID, STUDENT_ID, "Ada Lovelace", Some("S-001")).await;

    let quiz = store
        .create_quiz(NewQuiz {
            id: QUIZ_ID.to_string(),
            course_id: COURSE_ID.to_string(),
            title: "Weekly check".to_string(),
            questions,
            time_allowance_minutes: 30,
            opens_at: now - Duration::hours(1),
            closes_at: now + Duration::hours(1),
            created_at: now - Duration::hours(2),
        })
        .await
        .expect("seed quiz");

    (store, quiz)
}

/// Attempt service over an in-memory store with one course, one enrolled
/// student and one quiz open an hour either side of `now`.
pub(crate) struct LifecycleFixture {
    pub(crate) service: AttemptService,
    pub(crate) store: Arc<InMemoryStore>,
    pub(crate) publisher: Arc<RecordingPublisher>,
    pub(crate) quiz: Quiz,
    pub(crate) now: OffsetDateTime,
}

impl LifecycleFixture {
    pub(crate) async fn new(questions: Vec<Question>) -> Self {
        Self::build(questions, ScriptedJudge::default(), None).await
    }

    pub(crate) async fn with_judge(questions: Vec<Question>, judge: ScriptedJudge) -> Self {
        Self::build(questions, judge, None).await
    }

    pub(crate) async fn with_publisher(
        questions: Vec<Question>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self::build(questions, ScriptedJudge::default(), Some(publisher)).await
    }

    async fn build(
        questions: Vec<Question>,
        judge: ScriptedJudge,
        publisher: Option<Arc<dyn EventPublisher>>,
    ) -> Self {
        let now = datetime!(2025-03-01 09:00 UTC);
        let (store, quiz) = seed_store(questions, now).await;
        let recorder = Arc::new(RecordingPublisher::default());
        let publisher =
            publisher.unwrap_or_else(|| recorder.clone() as Arc<dyn EventPublisher>);

        let scoring = ScoringEngine::new(Arc::new(judge), std::time::Duration::from_secs(5));
        let policy =
            AttemptPolicy { submit_grace: Duration::minutes(5), max_integrity_event_len: 200 };
        let service = AttemptService::new(store.clone(), scoring, publisher, policy);

        Self { service, store, publisher: recorder, quiz, now }
    }
}

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) store: Arc<InMemoryStore>,
    pub(crate) hub: Arc<FanoutHub>,
    _guard: OwnedMutexGuard<()>,
}

/// Full router over the in-memory store. Redis stays disconnected, so
/// events land on the local hub.
pub(crate) async fn setup_test_app() -> TestContext {
    setup_test_app_with_judge(ScriptedJudge::default()).await
}

pub(crate) async fn setup_test_app_with_judge(judge: ScriptedJudge) -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let (store, _) =
        seed_store(vec![choice("q1", "Paris"), essay("q2", "Mentions the Seine")], now_utc())
            .await;

    let hub = Arc::new(FanoutHub::new(settings.fanout().channel_capacity));
    let redis = RedisHandle::new(TEST_REDIS_URL.to_string());
    let publisher = Arc::new(FanoutPublisher::new(
        hub.clone(),
        redis.clone(),
        settings.fanout().redis_channel_prefix.clone(),
    ));

    let state = AppState::new(
        settings,
        Collaborators {
            store: store.clone(),
            judge: Arc::new(judge),
            publisher,
            hub: hub.clone(),
            redis,
        },
    );
    let app = api::router::router(state.clone());

    TestContext { state, app, store, hub, _guard: guard }
}

pub(crate) fn bearer_token(user_id: &str, role: Role, settings: &Settings) -> String {
    security::create_access_token(user_id, role, settings, None).expect("token")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
