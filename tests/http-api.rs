//! HTTP surface tests: auth enforcement, status codes, and a blame round trip
//! through the full router.

use agent_trace_service::api::{AppState, router};
use agent_trace_service::config::AppConfig;
use agent_trace_service::db::schema;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use sea_orm::{ConnectOptions, Database};
use serde_json::{Value, json};
use tower::ServiceExt;

async fn test_app() -> Router {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = Database::connect(options).await.expect("connect sqlite");
    schema::create_tables(&db).await.expect("create schema");
    router(AppState {
        db,
        config: AppConfig::default(),
    })
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(v) => Body::from(v.to_string()),
        None => Body::empty(),
    };
    builder.body(body).expect("request")
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

async fn bearer_token(app: &Router, user_id: &str) -> String {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/api/v1/tokens/generate",
            None,
            Some(json!({"user_id": user_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().expect("token").to_string()
}

#[tokio::test]
async fn health_reports_connected_db() {
    let app = test_app().await;
    let (status, body) = send(&app, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db"], "connected");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn protected_endpoints_require_bearer() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        request("POST", "/api/v1/projects", None, Some(json!({"project_id": "p"}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/v1/projects",
            Some("not-a-real-token"),
            Some(json!({"project_id": "p"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_generate_and_verify_round_trip() {
    let app = test_app().await;
    let token = bearer_token(&app, "alice").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/tokens/verify",
            None,
            Some(json!({"token": token})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["user_id"], "alice");

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/tokens/verify",
            None,
            Some(json!({"token": "garbage.token"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn project_crud_and_stats() {
    let app = test_app().await;
    let token = bearer_token(&app, "alice").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/projects",
            Some(token.as_str()),
            Some(json!({"project_id": "proj", "name": "My Project"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["project"]["project_id"], "proj");
    assert_eq!(body["project"]["name"], "My Project");

    let (status, body) = send(
        &app,
        request("GET", "/api/v1/projects/proj", Some(token.as_str()), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["trace_count"], 0);

    let (status, _) = send(
        &app,
        request("GET", "/api/v1/projects/nope", Some(token.as_str()), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Missing project_id is a validation error, not a server error.
    let (status, body) = send(
        &app,
        request("POST", "/api/v1/projects", Some(token.as_str()), Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn trace_ingest_list_and_detail() {
    let app = test_app().await;
    let token = bearer_token(&app, "alice").await;

    let trace = json!({
        "id": "T1",
        "timestamp": "2025-06-01T12:00:00Z",
        "vcs": {"revision": "P"},
        "files": [{"path": "src/a.py"}],
    });
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/traces",
            Some(token.as_str()),
            Some(json!({"project_id": "proj", "trace": trace})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ok"], true);
    assert_eq!(body["trace_id"], "T1");

    let (status, body) = send(
        &app,
        request(
            "GET",
            "/api/v1/traces?project_id=proj",
            Some(token.as_str()),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, body) = send(
        &app,
        request(
            "GET",
            "/api/v1/traces/T1?project_id=proj",
            Some(token.as_str()),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["trace"]["id"], "T1");
    assert_eq!(body["user_id"], "alice");

    let (status, _) = send(
        &app,
        request(
            "GET",
            "/api/v1/traces/T9?project_id=proj",
            Some(token.as_str()),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn batch_ingest_returns_all_ids() {
    let app = test_app().await;
    let token = bearer_token(&app, "alice").await;

    let items = json!([
        {"trace": {"id": "T1", "timestamp": "2025-06-01T12:00:00Z"}},
        {"trace": {"id": "T2", "timestamp": "2025-06-01T13:00:00Z"}},
    ]);
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/traces/batch",
            Some(token.as_str()),
            Some(json!({"project_id": "proj", "items": items})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["count"], 2);
    assert_eq!(body["trace_ids"], json!(["T1", "T2"]));
}

#[tokio::test]
async fn commit_link_requires_trace_ids() {
    let app = test_app().await;
    let token = bearer_token(&app, "alice").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/commit-links",
            Some(token.as_str()),
            Some(json!({"project_id": "proj", "commit_sha": "C", "trace_ids": []})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn blame_round_trip() {
    let app = test_app().await;
    let token = bearer_token(&app, "alice").await;

    let trace = json!({
        "id": "T1",
        "timestamp": "2025-06-01T12:00:00Z",
        "vcs": {"revision": "P"},
        "tool": {"name": "claude-code", "version": "2.0.1"},
        "files": [{
            "path": "src/a.py",
            "conversations": [{
                "url": "u1",
                "contributor": {"type": "ai", "model_id": "m"},
                "ranges": [{"start_line": 10, "end_line": 20, "content_hash": "sha256:abcd1234"}]
            }]
        }],
    });
    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/v1/traces",
            Some(token.as_str()),
            Some(json!({
                "project_id": "proj",
                "trace": trace,
                "conversation_contents": [{"url": "u1", "content": "hello transcript"}],
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/v1/commit-links",
            Some(token.as_str()),
            Some(json!({
                "project_id": "proj",
                "commit_sha": "C",
                "parent_sha": "P",
                "trace_ids": ["T1"],
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/blame",
            Some(token.as_str()),
            Some(json!({
                "project_id": "proj",
                "file_path": "src/a.py",
                "blame_data": [{
                    "start_line": 12,
                    "end_line": 18,
                    "commit_sha": "C",
                    "parent_sha": "P",
                    "content_hash": "abcd1234",
                }],
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["file_path"], "src/a.py");
    let attribution = &body["attributions"][0];
    assert_eq!(attribution["tier"], 1);
    assert_eq!(attribution["confidence"], 1.0);
    assert_eq!(attribution["trace_id"], "T1");
    assert_eq!(attribution["model_id"], "m");
    assert_eq!(attribution["conversation_content"], "hello transcript");
    assert_eq!(attribution["tool"]["name"], "claude-code");

    // The commit-link detail view summarizes the linked trace.
    let (status, body) = send(
        &app,
        request(
            "GET",
            "/api/v1/commit-links/C?project_id=proj",
            Some(token.as_str()),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["trace_summaries"][0]["trace_id"], "T1");
    assert_eq!(body["trace_summaries"][0]["model_id"], "m");
    assert_eq!(
        body["trace_summaries"][0]["conversation_summary"],
        "hello transcript"
    );
}

#[tokio::test]
async fn conversation_sync_and_lookup() {
    let app = test_app().await;
    let token = bearer_token(&app, "alice").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/conversations/sync",
            Some(token.as_str()),
            Some(json!({
                "project_id": "proj",
                "conversation_contents": [{"url": "u1", "content": "the content"}],
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, body) = send(
        &app,
        request(
            "GET",
            "/api/v1/conversations/content?project_id=proj&url=u1",
            Some(token.as_str()),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "the content");

    let (status, _) = send(
        &app,
        request(
            "GET",
            "/api/v1/conversations/content?project_id=proj&url=missing",
            Some(token.as_str()),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ledger_endpoint_round_trip() {
    let app = test_app().await;
    let token = bearer_token(&app, "alice").await;

    let ledger = json!({"entries": [{"start_line": 1, "end_line": 5, "trace_id": "TL"}]});
    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/v1/commit-links",
            Some(token.as_str()),
            Some(json!({
                "project_id": "proj",
                "commit_sha": "C",
                "trace_ids": ["TL"],
                "ledger": ledger,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        request("GET", "/api/v1/ledgers/C?project_id=proj", Some(token.as_str()), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, ledger);

    let (status, _) = send(
        &app,
        request("GET", "/api/v1/ledgers/X?project_id=proj", Some(token.as_str()), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
