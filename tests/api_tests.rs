//! End-to-end tests over the full route table, backed by a throwaway SQLite
//! file and, where a character reply is needed, a stub inference server on a
//! loopback port.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use warp::filters::BoxedFilter;
use warp::http::StatusCode;

use storypals::configuration::{Config, InferenceConfig, TokenConfig};
use storypals::storage::Database;
use storypals::web_interface::web_server::{routes, AppState};

type Routes = BoxedFilter<(warp::reply::Response,)>;

async fn test_app(inference_url: &str) -> (Routes, Arc<AppState>, TempDir) {
    let dir = TempDir::new().unwrap();
    let database_path = dir.path().join("test.sqlite3");
    let db = Database::open(&database_path).await.unwrap();
    let config = Config {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        database_path,
        google_client_id: String::new(),
        tokens: TokenConfig {
            secret: "test-secret".to_string(),
            access_ttl_secs: 3600,
            refresh_ttl_secs: 7200,
        },
        inference: InferenceConfig {
            base_url: inference_url.to_string(),
            model: "gemma:2b".to_string(),
            timeout_secs: 2,
        },
    };
    let state = Arc::new(AppState::new(&config, db));
    (routes(state.clone()), state, dir)
}

/// Minimal HTTP server answering every request with a fixed generate payload.
async fn stub_inference(reply_text: &str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = format!(r#"{{"response":"{}"}}"#, reply_text);
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

fn body_json<B: AsRef<[u8]>>(response: &warp::http::Response<B>) -> Value {
    serde_json::from_slice(response.body().as_ref()).unwrap()
}

async fn register(routes: &Routes, email: &str) -> (String, String) {
    let response = warp::test::request()
        .method("POST")
        .path("/auth/register")
        .json(&json!({
            "email": email,
            "password": "hunter2hunter2",
            "password_confirm": "hunter2hunter2",
            "first_name": "Pat",
            "last_name": "Doe",
        }))
        .reply(routes)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(&response);
    (
        body["access"].as_str().unwrap().to_string(),
        body["refresh"].as_str().unwrap().to_string(),
    )
}

async fn add_child(routes: &Routes, access: &str, name: &str) -> String {
    let response = warp::test::request()
        .method("POST")
        .path("/users/me/children")
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "name": name, "age": 6, "interests": ["space"] }))
        .reply(routes)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(&response)["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_register_validation_and_login() {
    let (routes, _state, _dir) = test_app("http://127.0.0.1:9").await;

    // Short password
    let response = warp::test::request()
        .method("POST")
        .path("/auth/register")
        .json(&json!({
            "email": "p@x.org",
            "password": "short",
            "password_confirm": "short",
        }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(&response)["errors"]["password"].is_string());

    // Mismatched confirmation
    let response = warp::test::request()
        .method("POST")
        .path("/auth/register")
        .json(&json!({
            "email": "p@x.org",
            "password": "hunter2hunter2",
            "password_confirm": "something-else",
        }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(&response)["errors"]["password_confirm"].is_string());

    let _ = register(&routes, "p@x.org").await;

    // Duplicate email
    let response = warp::test::request()
        .method("POST")
        .path("/auth/register")
        .json(&json!({
            "email": "p@x.org",
            "password": "hunter2hunter2",
            "password_confirm": "hunter2hunter2",
        }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(&response)["errors"]["email"].is_string());

    // Wrong password
    let response = warp::test::request()
        .method("POST")
        .path("/auth/login")
        .json(&json!({ "email": "p@x.org", "password": "wrong-password" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Missing fields
    let response = warp::test::request()
        .method("POST")
        .path("/auth/login")
        .json(&json!({ "email": "", "password": "" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Success, case-insensitive email
    let response = warp::test::request()
        .method("POST")
        .path("/auth/login")
        .json(&json!({ "email": "P@X.ORG", "password": "hunter2hunter2" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(&response);
    assert!(body["access"].is_string());
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_token_refresh_and_logout() {
    let (routes, _state, _dir) = test_app("http://127.0.0.1:9").await;
    let (access, refresh) = register(&routes, "p@x.org").await;

    let response = warp::test::request()
        .method("POST")
        .path("/auth/token/refresh")
        .json(&json!({ "refresh": refresh }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let new_access = body_json(&response)["access"].as_str().unwrap().to_string();

    // The refreshed access token works
    let response = warp::test::request()
        .method("GET")
        .path("/users/me")
        .header("authorization", format!("Bearer {}", new_access))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Refreshing with an access token is rejected
    let response = warp::test::request()
        .method("POST")
        .path("/auth/token/refresh")
        .json(&json!({ "refresh": access }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Logout blacklists the refresh token
    let response = warp::test::request()
        .method("POST")
        .path("/auth/logout")
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "refresh": refresh }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = warp::test::request()
        .method("POST")
        .path("/auth/token/refresh")
        .json(&json!({ "refresh": refresh }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Verify endpoint agrees
    let response = warp::test::request()
        .method("POST")
        .path("/auth/token/verify")
        .json(&json!({ "token": new_access }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_profile_requires_auth() {
    let (routes, _state, _dir) = test_app("http://127.0.0.1:9").await;

    let response = warp::test::request()
        .method("GET")
        .path("/users/me")
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = warp::test::request()
        .method("GET")
        .path("/users/me")
        .header("authorization", "Bearer not-a-token")
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_child_crud_and_scoping() {
    let (routes, _state, _dir) = test_app("http://127.0.0.1:9").await;
    let (access, _) = register(&routes, "p@x.org").await;
    let (stranger, _) = register(&routes, "s@x.org").await;

    // Invalid gender rejected
    let response = warp::test::request()
        .method("POST")
        .path("/children")
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "name": "Mia", "age": 6, "gender": "X" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(&response)["errors"]["gender"].is_string());

    let child_id = add_child(&routes, &access, "Mia").await;

    // Shows up in the parent's profile
    let response = warp::test::request()
        .method("GET")
        .path("/users/me")
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    let body = body_json(&response);
    assert_eq!(body["children"].as_array().unwrap().len(), 1);
    assert_eq!(body["email"], "p@x.org");

    // Invisible to another account
    let response = warp::test::request()
        .method("GET")
        .path(&format!("/children/{}", child_id))
        .header("authorization", format!("Bearer {}", stranger))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Partial update
    let response = warp::test::request()
        .method("PUT")
        .path(&format!("/children/{}", child_id))
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "age": 7 }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(&response);
    assert_eq!(body["age"], 7);
    assert_eq!(body["name"], "Mia");

    let response = warp::test::request()
        .method("DELETE")
        .path(&format!("/children/{}", child_id))
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = warp::test::request()
        .method("GET")
        .path(&format!("/children/{}", child_id))
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_public_chat_validation() {
    let (routes, _state, _dir) = test_app("http://127.0.0.1:9").await;

    let response = warp::test::request()
        .method("POST")
        .path("/chats/public")
        .json(&json!({ "content": "hello" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(&response)["errors"]["character"].is_string());

    let response = warp::test::request()
        .method("POST")
        .path("/chats/public")
        .json(&json!({ "character": "Luna", "content": "  " }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(&response)["errors"]["content"].is_string());
}

#[tokio::test]
async fn test_public_chat_with_stub_server() {
    let url = stub_inference("Hello little astronaut!").await;
    let (routes, _state, _dir) = test_app(&url).await;

    let response = warp::test::request()
        .method("POST")
        .path("/chats/public")
        .json(&json!({ "character": "Luna", "content": "hi" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(&response)["response"], "Hello little astronaut!");
}

#[tokio::test]
async fn test_send_message_exchange_and_report() {
    let url = stub_inference("Once upon a time").await;
    let (routes, _state, _dir) = test_app(&url).await;
    let (access, _) = register(&routes, "p@x.org").await;
    let child_id = add_child(&routes, &access, "Mia").await;

    let response = warp::test::request()
        .method("POST")
        .path("/chats")
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "child_id": child_id, "character": "Luna" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let chat_id = body_json(&response)["id"].as_str().unwrap().to_string();

    let response = warp::test::request()
        .method("POST")
        .path(&format!("/chats/{}/send_message", chat_id))
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "content": "tell me a story" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(&response);
    assert_eq!(body["user_message"]["content"], "tell me a story");
    assert_eq!(body["user_message"]["is_from_user"], true);
    assert_eq!(body["assistant_message"]["content"], "Once upon a time");
    assert_eq!(body["assistant_message"]["is_from_user"], false);

    // History holds both halves, oldest first
    let response = warp::test::request()
        .method("GET")
        .path(&format!("/chats/{}/history", chat_id))
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    let history = body_json(&response);
    assert_eq!(history.as_array().unwrap().len(), 2);
    assert_eq!(history[0]["is_from_user"], true);

    // Windowed report reflects the exchange
    let response = warp::test::request()
        .method("GET")
        .path(&format!("/analytics/children/{}?days=7", child_id))
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(&response);
    assert_eq!(report["period_days"], 7);
    assert_eq!(report["summary"]["total_chats"], 1);
    assert_eq!(report["summary"]["total_messages"], 2);
    // "tell me a story" + "Once upon a time"
    assert_eq!(report["summary"]["total_words"], 8);
    assert_eq!(report["summary"]["characters"]["Luna"]["total_messages"], 2);

    // Per-character totals
    let response = warp::test::request()
        .method("GET")
        .path(&format!("/character-interactions?child_id={}", child_id))
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    let interactions = body_json(&response);
    assert_eq!(interactions.as_array().unwrap().len(), 1);
    assert_eq!(interactions[0]["character"], "Luna");
    assert_eq!(interactions[0]["total_chats"], 1);
    assert_eq!(interactions[0]["total_messages"], 2);
}

#[tokio::test]
async fn test_send_message_when_inference_down() {
    // Nothing listens on port 9
    let (routes, state, _dir) = test_app("http://127.0.0.1:9").await;
    let (access, _) = register(&routes, "p@x.org").await;
    let child_id = add_child(&routes, &access, "Mia").await;

    let chat = state.db.create_chat(&child_id, "Luna", None).await.unwrap();
    let response = warp::test::request()
        .method("POST")
        .path(&format!("/chats/{}/send_message", chat.id))
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "content": "hello?" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // The child's message was persisted before the upstream call failed
    let messages = state.db.list_chat_messages(&chat.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hello?");
}

#[tokio::test]
async fn test_report_rejects_bad_days() {
    let (routes, _state, _dir) = test_app("http://127.0.0.1:9").await;
    let (access, _) = register(&routes, "p@x.org").await;
    let child_id = add_child(&routes, &access, "Mia").await;

    for bad in ["abc", "0", "-3"] {
        let response = warp::test::request()
            .method("GET")
            .path(&format!("/analytics/children/{}?days={}", child_id, bad))
            .header("authorization", format!("Bearer {}", access))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // Someone else's child is a 404, not an empty report
    let (stranger, _) = register(&routes, "s@x.org").await;
    let response = warp::test::request()
        .method("GET")
        .path(&format!("/analytics/children/{}", child_id))
        .header("authorization", format!("Bearer {}", stranger))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_learning_progress_and_reviews() {
    let (routes, state, _dir) = test_app("http://127.0.0.1:9").await;
    let (access, _) = register(&routes, "p@x.org").await;
    let child_id = add_child(&routes, &access, "Mia").await;
    let chat = state.db.create_chat(&child_id, "Luna", None).await.unwrap();

    // child_progress needs the child_id parameter. The missing-param error
    // must not be re-labelled by the `learning-progress/:id` route.
    let response = warp::test::request()
        .method("GET")
        .path("/learning-progress/child_progress")
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(&response)["detail"],
        "child_id parameter is required"
    );

    // Same rule for child_reviews under `parent-reviews/:id`
    let response = warp::test::request()
        .method("GET")
        .path("/parent-reviews/child_reviews")
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(&response)["detail"],
        "child_id parameter is required"
    );

    let response = warp::test::request()
        .method("POST")
        .path("/learning-progress")
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({
            "child_id": child_id,
            "chat_id": chat.id,
            "engagement_score": 0.8,
            "vocabulary_learned": { "rocket": 1 },
        }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = warp::test::request()
        .method("GET")
        .path(&format!(
            "/learning-progress/child_progress?child_id={}",
            child_id
        ))
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(&response).as_array().unwrap().len(), 1);

    // Out-of-range rating rejected
    let response = warp::test::request()
        .method("POST")
        .path("/parent-reviews")
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "child_id": child_id, "chat_id": chat.id, "rating": 6 }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = warp::test::request()
        .method("POST")
        .path("/parent-reviews")
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({
            "child_id": child_id,
            "chat_id": chat.id,
            "notes": "lovely session",
            "rating": 4,
        }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let review_id = body_json(&response)["id"].as_str().unwrap().to_string();

    let response = warp::test::request()
        .method("PUT")
        .path(&format!("/parent-reviews/{}", review_id))
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "rating": 5 }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(&response)["rating"], 5);

    let response = warp::test::request()
        .method("GET")
        .path(&format!("/parent-reviews/child_reviews?child_id={}", child_id))
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(&response).as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_device_session_lifecycle() {
    let (routes, _state, _dir) = test_app("http://127.0.0.1:9").await;
    let (access, _) = register(&routes, "p@x.org").await;

    let response = warp::test::request()
        .method("POST")
        .path("/devices")
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "device_id": "SP-0001", "name": "Bedroom pal" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let device_id = body_json(&response)["id"].as_str().unwrap().to_string();

    // No session yet: recording is a 404
    let response = warp::test::request()
        .method("POST")
        .path(&format!("/devices/{}/record_interaction", device_id))
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "interaction_type": "AUDIO_IN", "content": "hi" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = warp::test::request()
        .method("POST")
        .path(&format!("/devices/{}/start_session", device_id))
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(&response)["is_active"], true);

    // Bad interaction type
    let response = warp::test::request()
        .method("POST")
        .path(&format!("/devices/{}/record_interaction", device_id))
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "interaction_type": "VIDEO", "content": "hi" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = warp::test::request()
        .method("POST")
        .path(&format!("/devices/{}/record_interaction", device_id))
        .header("authorization", format!("Bearer {}", access))
        .json(&json!({ "interaction_type": "AUDIO_IN", "content": "hi" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = warp::test::request()
        .method("GET")
        .path(&format!("/devices/{}/interactions", device_id))
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    assert_eq!(body_json(&response).as_array().unwrap().len(), 1);

    let response = warp::test::request()
        .method("POST")
        .path(&format!("/devices/{}/end_session", device_id))
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(&response)["is_active"], false);

    // Ending twice is a 404
    let response = warp::test::request()
        .method("POST")
        .path(&format!("/devices/{}/end_session", device_id))
        .header("authorization", format!("Bearer {}", access))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_models_failure_is_upstream_not_missing_chat() {
    // Nothing listens on port 9; the failure must come back as a 503 from
    // `chats/models` rather than the `chats/:id` route's 401
    let (routes, _state, _dir) = test_app("http://127.0.0.1:9").await;
    let response = warp::test::request()
        .method("GET")
        .path("/chats/models")
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_stories_are_public() {
    let (routes, state, _dir) = test_app("http://127.0.0.1:9").await;
    state
        .db
        .create_story(&storypals::storage::chats::NewStory {
            title: "Moon Trip".to_string(),
            description: String::new(),
            character: "Luna".to_string(),
            category: "Space".to_string(),
            content: "...".to_string(),
            image: None,
        })
        .await
        .unwrap();

    let response = warp::test::request()
        .method("GET")
        .path("/stories")
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(&response).as_array().unwrap().len(), 1);

    let response = warp::test::request()
        .method("GET")
        .path("/stories?character=Nobody")
        .reply(&routes)
        .await;
    assert!(body_json(&response).as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_google_login_unconfigured() {
    let (routes, _state, _dir) = test_app("http://127.0.0.1:9").await;
    let response = warp::test::request()
        .method("POST")
        .path("/auth/google-login")
        .json(&json!({ "credential": "some-token" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
