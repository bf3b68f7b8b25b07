use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

pub(crate) fn attempt_started(created: bool) {
    let outcome = if created { "created" } else { "resumed" };
    metrics::counter!("quiz_attempts_started_total", "outcome" => outcome).increment(1);
}

pub(crate) fn attempt_graded(source: &'static str, score: i32) {
    metrics::counter!("quiz_attempts_graded_total", "source" => source).increment(1);
    metrics::histogram!("quiz_attempt_score", "source" => source).record(f64::from(score));
}

pub(crate) fn judge_call(outcome: &'static str, seconds: f64) {
    metrics::counter!("essay_judge_calls_total", "outcome" => outcome).increment(1);
    metrics::histogram!("essay_judge_duration_seconds", "outcome" => outcome).record(seconds);
}

pub(crate) fn fanout_publish_failed(event: &'static str) {
    metrics::counter!("fanout_publish_failures_total", "event" => event).increment(1);
}
