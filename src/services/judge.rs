use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::config::{JudgeSettings, Settings};
use crate::core::metrics;

const JUDGE_SYSTEM_PROMPT: &str = "You are a teaching assistant grading short essay answers. \
Reply with exactly one line in the form SCORE|FEEDBACK where SCORE is a number between 0 and \
the maximum points and FEEDBACK is one or two sentences for the student. \
Example: 8|Clear explanation, but the second cause is missing.";

const EMPTY_FEEDBACK: &str = "No additional feedback.";
const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub(crate) struct JudgeRequest {
    pub(crate) question: String,
    pub(crate) rubric: String,
    pub(crate) answer: String,
    pub(crate) max_points: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct JudgeVerdict {
    pub(crate) score: f64,
    pub(crate) feedback: String,
}

/// Never surfaced to callers; the scoring engine turns every variant into
/// the per-question fallback.
#[derive(Debug, Error)]
pub(crate) enum JudgeError {
    #[error("essay judge is not configured")]
    Unavailable,
    #[error("essay judge timed out")]
    Timeout,
    #[error("essay judge request failed: {0}")]
    Http(String),
    #[error("essay judge returned an unusable reply: {0}")]
    Malformed(String),
}

impl JudgeError {
    pub(crate) fn metric_label(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::Http(_) => "http_error",
            Self::Malformed(_) => "malformed",
        }
    }
}

#[async_trait]
pub(crate) trait EssayJudge: Send + Sync {
    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError>;
}

/// Stand-in used when no API key is configured.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DisabledJudge;

#[async_trait]
impl EssayJudge for DisabledJudge {
    async fn judge(&self, _request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
        Err(JudgeError::Unavailable)
    }
}

/// OpenAI-compatible chat completions client.
#[derive(Debug, Clone)]
pub(crate) struct OpenAiJudge {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    max_retries: u32,
}

impl OpenAiJudge {
    pub(crate) fn from_settings(settings: &JudgeSettings) -> Result<Self, JudgeError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .map_err(|err| JudgeError::Http(err.to_string()))?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            max_retries: settings.max_retries,
        })
    }

    async fn complete(&self, payload: &Value) -> Result<Value, JudgeError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error = JudgeError::Http("no attempt made".to_string());

        for attempt in 0..=self.max_retries {
            match self.client.post(&url).bearer_auth(&self.api_key).json(payload).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let body: Value = resp.json().await.unwrap_or(Value::Null);
                    if status.is_success() {
                        return Ok(body);
                    }
                    last_error = JudgeError::Http(format!("status {status}: {body}"));
                    // Client errors will not improve on retry, except rate limiting.
                    if status.is_client_error() && status.as_u16() != 429 {
                        break;
                    }
                }
                Err(err) if err.is_timeout() => last_error = JudgeError::Timeout,
                Err(err) => last_error = JudgeError::Http(err.to_string()),
            }

            if attempt < self.max_retries {
                tracing::debug!(attempt, error = %last_error, "Retrying essay judge call");
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl EssayJudge for OpenAiJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
        let timer = Instant::now();
        let user_prompt = format!(
            "Maximum points: {max}\nQuestion: {question}\nGrading criteria: {rubric}\nStudent answer: {answer}",
            max = request.max_points,
            question = request.question,
            rubric = request.rubric,
            answer = request.answer,
        );

        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": JUDGE_SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt}
            ],
            "max_completion_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let outcome = self.complete(&payload).await.and_then(|body| {
            let content = body
                .get("choices")
                .and_then(|choices| choices.get(0))
                .and_then(|choice| choice.get("message"))
                .and_then(|message| message.get("content"))
                .and_then(Value::as_str)
                .ok_or_else(|| JudgeError::Malformed("missing message content".to_string()))?;
            parse_verdict(content)
        });

        let label = match &outcome {
            Ok(_) => "ok",
            Err(err) => err.metric_label(),
        };
        metrics::judge_call(label, timer.elapsed().as_secs_f64());

        outcome
    }
}

pub(crate) fn judge_from_settings(settings: &Settings) -> Arc<dyn EssayJudge> {
    let judge = settings.judge();
    if !judge.is_configured() {
        tracing::warn!("Essay judge API key not set; essay answers will use fallback grading");
        return Arc::new(DisabledJudge);
    }

    match OpenAiJudge::from_settings(judge) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            tracing::error!(error = %err, "Failed to build essay judge client");
            Arc::new(DisabledJudge)
        }
    }
}

/// Sleep before retry `attempt + 1`: 500ms doubling, capped at 30s.
fn backoff_delay(attempt: u32) -> Duration {
    let millis = 2_u64
        .checked_pow(attempt)
        .and_then(|factor| factor.checked_mul(BASE_BACKOFF_MS))
        .map_or(MAX_BACKOFF_MS, |millis| millis.min(MAX_BACKOFF_MS));
    Duration::from_millis(millis)
}

/// Upper bound for one essay judgement, retries and backoff included.
pub(crate) fn overall_timeout(settings: &JudgeSettings) -> Duration {
    let attempts = u64::from(settings.max_retries) + 1;
    let requests = Duration::from_secs(settings.request_timeout_seconds.saturating_mul(attempts));
    (0..settings.max_retries)
        .map(backoff_delay)
        .fold(requests, |total, delay| total.saturating_add(delay))
}

/// Parses `SCORE|FEEDBACK`. Text after the first separator is feedback.
pub(crate) fn parse_verdict(content: &str) -> Result<JudgeVerdict, JudgeError> {
    let trimmed = content.trim().trim_matches('"');
    let (score, feedback) = trimmed
        .split_once('|')
        .ok_or_else(|| JudgeError::Malformed(format!("missing separator in {trimmed:?}")))?;

    let score: f64 = score
        .trim()
        .parse()
        .map_err(|_| JudgeError::Malformed(format!("score is not a number: {score:?}")))?;
    if !score.is_finite() {
        return Err(JudgeError::Malformed(format!("score is not finite: {score}")));
    }

    let feedback = feedback.trim();
    let feedback = if feedback.is_empty() { EMPTY_FEEDBACK } else { feedback };

    Ok(JudgeVerdict { score, feedback: feedback.to_string() })
}
