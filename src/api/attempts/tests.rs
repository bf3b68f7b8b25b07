use axum::http::{Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::db::types::Role;
use crate::services::judge::JudgeVerdict;
use crate::test_support::{self, ScriptedJudge, TestContext, INSTRUCTOR_ID, QUIZ_ID, STUDENT_ID};

async fn start_attempt(ctx: &TestContext, token: &str) -> String {
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/quizzes/{QUIZ_ID}/start"),
            Some(token),
            None,
        ))
        .await
        .expect("start attempt");
    assert_eq!(response.status(), StatusCode::OK);
    let body = test_support::read_json(response).await;
    body["id"].as_str().expect("attempt id").to_string()
}

#[tokio::test]
async fn submit_grades_once_and_notifies_the_student() {
    let judge = ScriptedJudge::new(vec![Ok(JudgeVerdict {
        score: 40.0,
        feedback: "Good reference to the river".to_string(),
    })]);
    let ctx = test_support::setup_test_app_with_judge(judge).await;
    let student = test_support::bearer_token(STUDENT_ID, Role::Student, ctx.state.settings());
    let attempt_id = start_attempt(&ctx, &student).await;
    let mut own_channel = ctx.hub.subscribe("student:student-1");
    let mut course_channel = ctx.hub.subscribe("course:course-1");

    let payload = json!({
        "answers": [
            {"questionId": "q1", "answerText": " paris "},
            {"questionId": "q2", "answerText": "The Seine runs through it."}
        ]
    });
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&student),
            Some(payload.clone()),
        ))
        .await
        .expect("submit");
    assert_eq!(response.status(), StatusCode::OK);
    let graded = test_support::read_json(response).await;
    assert_eq!(graded["state"], "graded");
    assert_eq!(graded["score"], 90);
    assert_eq!(graded["answers"][0]["correct"], true);
    assert_eq!(graded["answers"][1]["feedback"], "Good reference to the river");
    assert!(graded["submitted_at"].is_string());

    let event = own_channel.recv().await.expect("attempt.graded");
    assert_eq!(event.event, "attempt.graded");
    assert_eq!(event.payload["score"], 90);
    let stats = course_channel.recv().await.expect("stats.updated");
    assert_eq!(stats.event, "stats.updated");
    assert_eq!(stats.payload["submissionCount"], 1);

    let again = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&student),
            Some(payload),
        ))
        .await
        .expect("resubmit");
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn submit_requires_the_attempt_owner() {
    let ctx = test_support::setup_test_app().await;
    let student = test_support::bearer_token(STUDENT_ID, Role::Student, ctx.state.settings());
    let intruder = test_support::bearer_token("student-2", Role::Student, ctx.state.settings());
    let attempt_id = start_attempt(&ctx, &student).await;

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&intruder),
            Some(json!({"answers": []})),
        ))
        .await
        .expect("submit");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/attempts/unknown/submit",
            Some(&student),
            Some(json!({"answers": []})),
        ))
        .await
        .expect("submit");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn instructor_override_marks_feedback() {
    let ctx = test_support::setup_test_app().await;
    let student = test_support::bearer_token(STUDENT_ID, Role::Student, ctx.state.settings());
    let instructor = test_support::bearer_token(INSTRUCTOR_ID, Role::Instructor, ctx.state.settings());
    let attempt_id = start_attempt(&ctx, &student).await;
    let uri = format!("/api/v1/attempts/{attempt_id}/override");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &uri,
            Some(&student),
            Some(json!({"score": 100, "feedback": "I deserve it"})),
        ))
        .await
        .expect("student override");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &uri,
            Some(&instructor),
            Some(json!({"score": 150})),
        ))
        .await
        .expect("out of range override");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &uri,
            Some(&instructor),
            Some(json!({"score": 85, "feedback": "Accepted the alternate spelling"})),
        ))
        .await
        .expect("override");
    assert_eq!(response.status(), StatusCode::OK);
    let updated = test_support::read_json(response).await;
    assert_eq!(updated["score"], 85);
    assert_eq!(updated["state"], "graded");
    assert_eq!(updated["feedback"], "(Regraded) Accepted the alternate spelling");
}

#[tokio::test]
async fn integrity_events_are_logged_for_the_owner() {
    let ctx = test_support::setup_test_app().await;
    let student = test_support::bearer_token(STUDENT_ID, Role::Student, ctx.state.settings());
    let attempt_id = start_attempt(&ctx, &student).await;
    let uri = format!("/api/v1/attempts/{attempt_id}/integrity-events");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &uri,
            Some(&student),
            Some(json!({"event": "tab_hidden"})),
        ))
        .await
        .expect("log event");
    assert_eq!(response.status(), StatusCode::OK);
    let body = test_support::read_json(response).await;
    assert_eq!(body["message"], "Integrity event recorded");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &uri,
            Some(&student),
            Some(json!({"event": ""})),
        ))
        .await
        .expect("log empty event");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/quizzes/{QUIZ_ID}/attempts/me"),
            Some(&student),
            None,
        ))
        .await
        .expect("own attempt");
    let own = test_support::read_json(response).await;
    assert_eq!(own["attempt"]["integrity_log"][0]["event"], "tab_hidden");
    assert_eq!(own["attempt"]["state"], "in_progress");
}

#[tokio::test]
async fn expired_token_is_unauthorized() {
    let ctx = test_support::setup_test_app().await;
    let token = crate::core::security::create_access_token(
        STUDENT_ID,
        Role::Student,
        ctx.state.settings(),
        Some(time::Duration::minutes(-5)),
    )
    .expect("token");

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/attempts/any/submit",
            Some(&token),
            Some(json!({"answers": []})),
        ))
        .await
        .expect("submit");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn oversized_answer_list_is_rejected() {
    let ctx = test_support::setup_test_app().await;
    let student = test_support::bearer_token(STUDENT_ID, Role::Student, ctx.state.settings());
    let attempt_id = start_attempt(&ctx, &student).await;
    let answers: Vec<_> =
        (0..501).map(|i| json!({"questionId": format!("q{i}"), "answerText": "x"})).collect();

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&student),
            Some(json!({ "answers": answers })),
        ))
        .await
        .expect("submit");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = test_support::read_json(response).await;
    assert!(body["detail"].as_str().unwrap_or_default().contains("too many answers"));
    assert_eq!(ctx.store.attempt_count().await, 1);
}
