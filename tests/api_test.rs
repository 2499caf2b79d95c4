mod common;

use assessment_backend::middleware::auth::Claims;
use assessment_backend::routes;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use common::{Harness, JWT_SECRET};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

fn token_for(role: &str) -> String {
    let claims = Claims {
        sub: "admin-1".into(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
        role: Some(role.into()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<JsonValue>,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let body = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, body)
}

#[tokio::test]
async fn health_is_public() {
    let h = Harness::new();
    let app = routes::router(h.state.clone(), 100);

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn admin_routes_require_admin_or_hr_role() {
    let h = Harness::new();
    let app = routes::router(h.state.clone(), 100);

    let (status, body) = send(&app, "GET", "/api/admin/sessions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing_authorization");

    let (status, _) = send(&app, "GET", "/api/admin/sessions", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let candidate = token_for("candidate");
    let (status, _) = send(&app, "GET", "/api/admin/sessions", Some(&candidate), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let hr = token_for("hr");
    let (status, body) = send(&app, "GET", "/api/admin/sessions", Some(&hr), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn participant_runs_a_session_end_to_end() {
    let h = Harness::new();
    let test = h.catalog.add("Logic", 20, 10);
    let app = routes::router(h.state.clone(), 100);
    let admin = token_for("admin");

    let (status, session) = send(
        &app,
        "POST",
        "/api/admin/sessions",
        Some(&admin),
        Some(json!({
            "name": "Spring intake",
            "start_time": "2026-03-02T09:00:00Z",
            "end_time": "2026-03-02T11:00:00Z",
            "modules": [{ "test_id": test }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["status"], "draft");
    assert_eq!(session["effective_status"], "active");
    let session_id = session["id"].as_str().unwrap().to_string();

    let (status, activated) = send(
        &app,
        "POST",
        &format!("/api/admin/sessions/{}/activate", session_id),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activated["status"], "active");

    let (status, invited) = send(
        &app,
        "POST",
        &format!("/api/admin/sessions/{}/participants", session_id),
        Some(&admin),
        Some(json!({
            "user_id": uuid::Uuid::new_v4(),
            "name": "Ana",
            "email": "ana@example.com"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let link = invited["participant"]["unique_link"].as_str().unwrap().to_string();

    let (status, opened) = send(&app, "GET", &format!("/api/public/sessions/{}", link), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(opened["status"], "registered");
    assert_eq!(opened["modules"][0]["status"], "not_started");

    let (status, next) = send(&app, "GET", &format!("/api/public/sessions/{}/next", link), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next["step"], "next_test");

    let base = format!("/api/public/sessions/{}/tests/{}", link, test);
    let (status, started) = send(&app, "POST", &format!("{}/start", base), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["status"], "in_progress");

    let (status, again) = send(&app, "POST", &format!("{}/start", base), None, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["error"], "already_started");

    h.advance(Duration::minutes(4));
    let (status, progress) = send(
        &app,
        "PATCH",
        &format!("{}/activity", base),
        None,
        Some(json!({ "answered_questions": 7, "time_spent_delta": 240 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["progress_percentage"], 70);
    assert_eq!(progress["time_remaining_seconds"], 16 * 60);

    let (status, done) = send(&app, "POST", &format!("{}/complete", base), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["progress"]["status"], "completed");
    assert_eq!(done["next"]["step"], "session_complete");

    let (status, summary) = send(
        &app,
        "GET",
        &format!("/api/admin/sessions/{}/summary", session_id),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["participants_by_status"]["completed"], 1);

    let (status, report) = send(&app, "POST", "/api/admin/status/sweep", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["failures"], 0);
}

#[tokio::test]
async fn expired_link_is_gone() {
    let h = Harness::new();
    let test = h.catalog.add("Logic", 20, 10);
    let session = h.active_session(&[test]).await;
    let participant = h.invite(session.id, "Ana").await;
    let app = routes::router(h.state.clone(), 100);

    h.advance(Duration::hours(73));
    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/public/sessions/{}", participant.unique_link),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"], "link_expired");
}

#[tokio::test]
async fn public_routes_are_rate_limited_per_link() {
    let h = Harness::new();
    let test = h.catalog.add("Logic", 20, 10);
    let session = h.active_session(&[test]).await;
    let participant = h.invite(session.id, "Ana").await;
    let app = routes::router(h.state.clone(), 2);
    let uri = format!("/api/public/sessions/{}/next", participant.unique_link);

    assert_eq!(send(&app, "GET", &uri, None, None).await.0, StatusCode::OK);
    assert_eq!(send(&app, "GET", &uri, None, None).await.0, StatusCode::OK);
    assert_eq!(
        send(&app, "GET", &uri, None, None).await.0,
        StatusCode::TOO_MANY_REQUESTS
    );
}
