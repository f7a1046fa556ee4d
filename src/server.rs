//! Webhook HTTP server.
//!
//! Telegram POSTs every update to the configured webhook path. The body is
//! parsed into an `InboundEvent` and handed to the `GroupJoinHandler`; the
//! handler's acknowledgment is returned as JSON. When an admin token is
//! configured, `/groups` exposes listing, deletion and a test message.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::groups::{GroupRecord, GroupStore};
use crate::handler::{Acknowledgment, GroupJoinHandler, Messenger};
use crate::platform::telegram::parse_update;

pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

pub const TEST_MESSAGE: &str = "✅ <b>Test Notifikasi</b>\n\n\
Notifikasi dari catatbot berhasil!";

// ── Shared state ───────────────────────────────────────────────────────────────

pub struct AppState {
    pub handler: GroupJoinHandler,
    pub groups: GroupStore,
    pub messenger: Arc<dyn Messenger>,
    pub webhook_secret: Option<String>,
    /// Enables the `/groups` routes when set
    pub admin_token: Option<String>,
}

// ── Request / response types ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    all: bool,
}

#[derive(Serialize)]
struct GroupList {
    groups: Vec<GroupRecord>,
    total: usize,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

fn reject(status: StatusCode, message: impl Into<String>) -> Response {
    let body = Acknowledgment {
        ok: false,
        message: Some(message.into()),
    };
    (status, Json(body)).into_response()
}

/// Compare secrets without short-circuiting on the first differing byte
fn secret_matches(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn check_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match (&state.admin_token, provided) {
        (Some(expected), Some(provided)) if secret_matches(provided, expected) => Ok(()),
        _ => Err(reject(StatusCode::UNAUTHORIZED, "Invalid admin token")),
    }
}

// ── Handlers ───────────────────────────────────────────────────────────────────

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn receive_update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(expected) = &state.webhook_secret {
        let provided = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if !provided.is_some_and(|p| secret_matches(p, expected)) {
            warn!("Rejected webhook call with missing or wrong secret token");
            return reject(StatusCode::UNAUTHORIZED, "Invalid secret token");
        }
    }

    let event = match parse_update(&body) {
        Ok(Some(event)) => event,
        Ok(None) => return Json(Acknowledgment::ok()).into_response(),
        Err(e) => {
            warn!("Rejected webhook payload: {}", e);
            return reject(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    info!(
        "Received message from {:?} in {} chat {}: {:?}",
        event.sender_id, event.chat.kind, event.chat.id, event.text
    );

    match state.handler.dispatch(&event).await {
        Ok(ack) => Json(ack).into_response(),
        Err(e) => {
            error!("Error handling update: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save group")
        }
    }
}

async fn list_groups(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Response {
    if let Err(resp) = check_admin(&state, &headers) {
        return resp;
    }
    let Query(params) = match params {
        Ok(params) => params,
        Err(e) => return reject(StatusCode::BAD_REQUEST, e.body_text()),
    };

    match state.groups.list_groups(params.all).await {
        Ok(groups) => {
            let total = groups.len();
            Json(GroupList { groups, total }).into_response()
        }
        Err(e) => {
            error!("Failed to list groups: {:#}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list groups")
        }
    }
}

async fn delete_group(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
) -> Response {
    if let Err(resp) = check_admin(&state, &headers) {
        return resp;
    }
    let Path(id) = match id {
        Ok(id) => id,
        Err(e) => return reject(StatusCode::BAD_REQUEST, e.body_text()),
    };

    match state.groups.delete_group(id).await {
        Ok(true) => {
            info!("Group {} deleted", id);
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => reject(
            StatusCode::NOT_FOUND,
            format!("Telegram group with ID {} not found", id),
        ),
        Err(e) => {
            error!("Failed to delete group {}: {:#}", id, e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete group")
        }
    }
}

async fn send_test_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
) -> Response {
    if let Err(resp) = check_admin(&state, &headers) {
        return resp;
    }
    let Path(id) = match id {
        Ok(id) => id,
        Err(e) => return reject(StatusCode::BAD_REQUEST, e.body_text()),
    };

    match state.groups.get_group(id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return reject(
                StatusCode::NOT_FOUND,
                format!("Telegram group with ID {} not found", id),
            )
        }
        Err(e) => {
            error!("Failed to load group {}: {:#}", id, e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load group");
        }
    }

    match state.messenger.send_message(id, TEST_MESSAGE).await {
        Ok(()) => Json(Acknowledgment::with_message(
            "Test notification sent successfully",
        ))
        .into_response(),
        Err(e) => {
            warn!("Test message to group {} failed: {:#}", id, e);
            reject(
                StatusCode::BAD_REQUEST,
                "Failed to send test notification. Check if the bot is added to the group.",
            )
        }
    }
}

// ── Router ─────────────────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>, webhook_path: &str) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route(webhook_path, post(receive_update));

    if state.admin_token.is_some() {
        app = app
            .route("/groups", get(list_groups))
            .route("/groups/{id}", delete(delete_group))
            .route("/groups/{id}/test", post(send_test_message));
    }

    app.with_state(state)
}

/// Serve until Ctrl-C
pub async fn serve(state: Arc<AppState>, bind_address: &str, webhook_path: &str) -> Result<()> {
    let app = router(state, webhook_path);

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind to {bind_address}"))?;

    info!("Listening on {} (webhook: {})", bind_address, webhook_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::{RecordingGroups, RecordingMessenger, BOT_ID};
    use crate::handler::{GroupRepository, JoinPolicy, Messenger};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const BOT_JOIN: &str = r#"{"update_id":1,"message":{"message_id":5,"date":0,
        "chat":{"id":12345,"title":"Friends","type":"group"},
        "from":{"id":42,"is_bot":false,"first_name":"Sari"},
        "new_chat_member":{"id":777,"is_bot":true,"first_name":"catat"}}}"#;

    fn app_with(
        groups: Arc<dyn GroupRepository>,
        store: GroupStore,
        messenger: Arc<dyn Messenger>,
        webhook_secret: Option<&str>,
        admin_token: Option<&str>,
    ) -> Router {
        let state = Arc::new(AppState {
            handler: GroupJoinHandler::new(groups, messenger.clone(), JoinPolicy::AnyBot, BOT_ID),
            groups: store,
            messenger,
            webhook_secret: webhook_secret.map(str::to_string),
            admin_token: admin_token.map(str::to_string),
        });
        router(state, "/webhook")
    }

    fn store_app(store: &GroupStore, messenger: Arc<RecordingMessenger>) -> Router {
        app_with(
            Arc::new(store.clone()),
            store.clone(),
            messenger,
            None,
            Some("admin"),
        )
    }

    fn post_webhook(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_bot_join_is_saved() {
        let store = GroupStore::open_in_memory().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let app = store_app(&store, messenger.clone());

        let resp = app.oneshot(post_webhook(BOT_JOIN)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            json_body(resp).await,
            json!({ "ok": true, "message": "Group saved successfully" })
        );
        let record = store.get_group(12345).await.unwrap().unwrap();
        assert_eq!(record.name, "Friends");
        assert_eq!(messenger.sent.lock().unwrap()[0].0, 12345);
    }

    #[tokio::test]
    async fn test_plain_message_is_acknowledged() {
        let store = GroupStore::open_in_memory().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let app = store_app(&store, messenger.clone());

        let resp = app
            .oneshot(post_webhook(
                r#"{"message":{"chat":{"id":1,"type":"group"},"from":{"id":2},"text":"hi"}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, json!({ "ok": true }));
        assert!(store.list_groups(true).await.unwrap().is_empty());
        assert!(messenger.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_without_message_is_acknowledged() {
        let store = GroupStore::open_in_memory().unwrap();
        let app = store_app(&store, Arc::new(RecordingMessenger::default()));

        let resp = app
            .oneshot(post_webhook(r#"{"update_id":3,"edited_message":{}}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_bad_request() {
        let store = GroupStore::open_in_memory().unwrap();
        let app = store_app(&store, Arc::new(RecordingMessenger::default()));

        let resp = app
            .oneshot(post_webhook(r#"{"message":{"chat":{"type":"group"}}}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert_eq!(body["ok"], json!(false));
        assert!(body["message"].as_str().unwrap().contains("chat.id"));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_server_error() {
        let store = GroupStore::open_in_memory().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let app = app_with(
            Arc::new(RecordingGroups::failing()),
            store,
            messenger.clone(),
            None,
            None,
        );

        let resp = app.oneshot(post_webhook(BOT_JOIN)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(resp).await["ok"], json!(false));
        assert!(messenger.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_secret_token_enforced() {
        let store = GroupStore::open_in_memory().unwrap();
        let app = app_with(
            Arc::new(store.clone()),
            store.clone(),
            Arc::new(RecordingMessenger::default()),
            Some("s3cret"),
            None,
        );

        let resp = app.clone().oneshot(post_webhook(BOT_JOIN)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let mut wrong = post_webhook(BOT_JOIN);
        wrong
            .headers_mut()
            .insert(SECRET_TOKEN_HEADER, "nope".parse().unwrap());
        let resp = app.clone().oneshot(wrong).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(store.list_groups(true).await.unwrap().is_empty());

        let mut right = post_webhook(BOT_JOIN);
        right
            .headers_mut()
            .insert(SECRET_TOKEN_HEADER, "s3cret".parse().unwrap());
        let resp = app.oneshot(right).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(store.list_groups(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_health() {
        let store = GroupStore::open_in_memory().unwrap();
        let app = store_app(&store, Arc::new(RecordingMessenger::default()));

        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_list_groups_requires_token() {
        let store = GroupStore::open_in_memory().unwrap();
        let app = store_app(&store, Arc::new(RecordingMessenger::default()));

        let resp = app
            .oneshot(Request::get("/groups").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_list_groups_not_mounted_without_admin_token() {
        let store = GroupStore::open_in_memory().unwrap();
        let app = app_with(
            Arc::new(store.clone()),
            store,
            Arc::new(RecordingMessenger::default()),
            None,
            None,
        );

        let resp = app
            .oneshot(Request::get("/groups").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_groups_after_join_and_leave() {
        let store = GroupStore::open_in_memory().unwrap();
        let app = store_app(&store, Arc::new(RecordingMessenger::default()));

        app.clone().oneshot(post_webhook(BOT_JOIN)).await.unwrap();
        app.clone()
            .oneshot(post_webhook(
                r#"{"message":{"chat":{"id":2,"title":"Kos","type":"group"},
                    "new_chat_member":{"is_bot":true}}}"#,
            ))
            .await
            .unwrap();
        let resp = app
            .clone()
            .oneshot(post_webhook(
                r#"{"message":{"chat":{"id":2,"title":"Kos","type":"group"},
                    "left_chat_member":{"id":777,"is_bot":true}}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(
            json_body(resp).await,
            json!({ "ok": true, "message": "Group deactivated" })
        );

        let list = |uri: &'static str| {
            Request::get(uri)
                .header(header::AUTHORIZATION, "Bearer admin")
                .body(Body::empty())
                .unwrap()
        };

        let body = json_body(app.clone().oneshot(list("/groups")).await.unwrap()).await;
        assert_eq!(body["total"], json!(1));
        assert_eq!(body["groups"][0]["id"], json!(12345));
        assert_eq!(body["groups"][0]["chat_type"], json!("group"));

        let body = json_body(app.oneshot(list("/groups?all=true")).await.unwrap()).await;
        assert_eq!(body["total"], json!(2));
    }

    fn admin_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer admin")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_other_bot_leaving_keeps_group_listed() {
        let store = GroupStore::open_in_memory().unwrap();
        let app = store_app(&store, Arc::new(RecordingMessenger::default()));

        app.clone().oneshot(post_webhook(BOT_JOIN)).await.unwrap();
        let resp = app
            .clone()
            .oneshot(post_webhook(
                r#"{"message":{"chat":{"id":12345,"title":"Friends","type":"group"},
                    "left_chat_member":{"id":999,"is_bot":true}}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await, json!({ "ok": true }));

        let body = json_body(app.oneshot(admin_request("GET", "/groups")).await.unwrap()).await;
        assert_eq!(body["total"], json!(1));
    }

    #[tokio::test]
    async fn test_list_groups_bad_query_is_json_error() {
        let store = GroupStore::open_in_memory().unwrap();
        let app = store_app(&store, Arc::new(RecordingMessenger::default()));

        let resp = app
            .oneshot(admin_request("GET", "/groups?all=1"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert_eq!(body["ok"], json!(false));
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_delete_group_route() {
        let store = GroupStore::open_in_memory().unwrap();
        let app = store_app(&store, Arc::new(RecordingMessenger::default()));
        app.clone().oneshot(post_webhook(BOT_JOIN)).await.unwrap();

        let resp = app
            .clone()
            .oneshot(admin_request("DELETE", "/groups/12345"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(store.get_group(12345).await.unwrap().is_none());

        let resp = app
            .clone()
            .oneshot(admin_request("DELETE", "/groups/12345"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["ok"], json!(false));

        let resp = app
            .oneshot(admin_request("DELETE", "/groups/not-a-number"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["ok"], json!(false));
    }

    #[tokio::test]
    async fn test_delete_group_requires_token() {
        let store = GroupStore::open_in_memory().unwrap();
        let app = store_app(&store, Arc::new(RecordingMessenger::default()));
        app.clone().oneshot(post_webhook(BOT_JOIN)).await.unwrap();

        let resp = app
            .oneshot(
                Request::delete("/groups/12345")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(store.get_group(12345).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_send_test_message_route() {
        let store = GroupStore::open_in_memory().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let app = store_app(&store, messenger.clone());
        app.clone().oneshot(post_webhook(BOT_JOIN)).await.unwrap();

        let resp = app
            .clone()
            .oneshot(admin_request("POST", "/groups/12345/test"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            json_body(resp).await,
            json!({ "ok": true, "message": "Test notification sent successfully" })
        );

        let sent = messenger.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], (12345, TEST_MESSAGE.to_string()));

        let resp = app
            .oneshot(admin_request("POST", "/groups/54321/test"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_send_test_message_failure_is_bad_request() {
        let store = GroupStore::open_in_memory().unwrap();
        let messenger = Arc::new(RecordingMessenger {
            fail: true,
            ..Default::default()
        });
        let app = store_app(&store, messenger.clone());
        app.clone().oneshot(post_webhook(BOT_JOIN)).await.unwrap();

        let resp = app
            .oneshot(admin_request("POST", "/groups/12345/test"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert_eq!(body["ok"], json!(false));
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("Failed to send test notification"));
    }

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches("s3cret", "s3cret"));
        assert!(!secret_matches("s3creT", "s3cret"));
        assert!(!secret_matches("s3cret!", "s3cret"));
        assert!(!secret_matches("", "s3cret"));
    }
}
