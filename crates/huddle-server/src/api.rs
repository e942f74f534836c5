use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use huddle_shared::api::{
    AddMemberRequest, CreateGroupRequest, SendMessageRequest, StatusResponse, UpdateGroupRequest,
    UpdateProfileRequest,
};
use huddle_shared::constants::WS_PATH;
use huddle_shared::{
    DirectMessage, Group, GroupId, GroupListing, GroupMessage, PeerListing, UserId, UserSummary,
};

use crate::auth::{AuthUser, IdentityProvider};
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::fanout::ConnectionRegistry;
use crate::session::ChatService;
use crate::ws::ws_upgrade;

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub blob_store: Arc<BlobStore>,
    pub registry: ConnectionRegistry,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let allow_origin = match state.config.cors_origin.as_deref().map(HeaderValue::from_str) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(_)) => {
            warn!("Invalid CORS_ORIGIN, allowing any origin");
            AllowOrigin::from(Any)
        }
        None => AllowOrigin::from(Any),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route(WS_PATH, get(ws_upgrade))
        .route("/blobs/{name}", get(blob_download))
        .route("/users/me", get(my_profile).put(update_profile))
        .route("/groups", get(list_groups).post(create_group))
        .route(
            "/groups/{id}",
            get(group_details).put(update_group).delete(delete_group),
        )
        .route("/groups/{id}/leave", post(leave_group))
        .route("/groups/{id}/members", post(add_member))
        .route("/groups/{id}/members/{member_id}", delete(remove_member))
        .route(
            "/groups/{id}/messages",
            get(group_messages).post(send_group_message),
        )
        .route("/groups/{id}/messages/read", put(mark_group_read))
        .route("/messages/users", get(direct_peers))
        .route("/messages/{peer_id}", get(direct_messages))
        .route("/messages/send/{peer_id}", post(send_direct_message))
        .route("/messages/read/{peer_id}", put(mark_direct_read))
        .layer(DefaultBodyLimit::max(state.config.max_body_size()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry.connected_count(),
    })
}

async fn blob_download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let (data, content_type) = state.blob_store.get_blob(&name).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], data))
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

async fn my_profile(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<UserSummary>, ServerError> {
    Ok(Json(state.chat.profile(me).await?))
}

async fn update_profile(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserSummary>, ServerError> {
    Ok(Json(state.chat.update_profile(me, req).await?))
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

async fn create_group(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Group>), ServerError> {
    let group = state.chat.create_group(me, req).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn list_groups(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<Vec<GroupListing>>, ServerError> {
    Ok(Json(state.chat.list_groups(me).await?))
}

async fn group_details(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(id): Path<GroupId>,
) -> Result<Json<Group>, ServerError> {
    Ok(Json(state.chat.group_details(me, id).await?))
}

async fn update_group(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(id): Path<GroupId>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<Json<Group>, ServerError> {
    Ok(Json(state.chat.update_group(me, id, req).await?))
}

async fn delete_group(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(id): Path<GroupId>,
) -> Result<Json<StatusResponse>, ServerError> {
    state.chat.delete_group(me, id).await?;
    Ok(Json(StatusResponse::new("Group deleted")))
}

async fn leave_group(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(id): Path<GroupId>,
) -> Result<Json<StatusResponse>, ServerError> {
    state.chat.leave_group(me, id).await?;
    Ok(Json(StatusResponse::new("Left group")))
}

async fn add_member(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(id): Path<GroupId>,
    Json(req): Json<AddMemberRequest>,
) -> Result<Json<Group>, ServerError> {
    Ok(Json(state.chat.add_member(me, id, req.member_id).await?))
}

async fn remove_member(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path((id, member_id)): Path<(GroupId, UserId)>,
) -> Result<Json<Group>, ServerError> {
    Ok(Json(state.chat.remove_member(me, id, member_id).await?))
}

async fn group_messages(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(id): Path<GroupId>,
) -> Result<Json<Vec<GroupMessage>>, ServerError> {
    Ok(Json(state.chat.group_messages(me, id).await?))
}

async fn send_group_message(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(id): Path<GroupId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<GroupMessage>), ServerError> {
    let message = state.chat.send_group_message(me, id, req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_group_read(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(id): Path<GroupId>,
) -> Result<Json<StatusResponse>, ServerError> {
    let marked = state.chat.mark_group_read(me, id).await?;
    Ok(Json(StatusResponse::new(format!(
        "Marked {marked} messages as read"
    ))))
}

// ---------------------------------------------------------------------------
// Direct messages
// ---------------------------------------------------------------------------

async fn direct_peers(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<Vec<PeerListing>>, ServerError> {
    Ok(Json(state.chat.direct_peers(me).await?))
}

async fn direct_messages(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(peer): Path<UserId>,
) -> Result<Json<Vec<DirectMessage>>, ServerError> {
    Ok(Json(state.chat.direct_messages(me, peer).await?))
}

async fn send_direct_message(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(peer): Path<UserId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<DirectMessage>), ServerError> {
    let message = state.chat.send_direct_message(me, peer, req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_direct_read(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(peer): Path<UserId>,
) -> Result<Json<StatusResponse>, ServerError> {
    let marked = state.chat.mark_direct_read(me, peer).await?;
    Ok(Json(StatusResponse::new(format!(
        "Marked {marked} messages as read"
    ))))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Application state over an in-memory database, with blobs under `dir`.
#[cfg(test)]
pub(crate) async fn test_state(dir: &std::path::Path) -> AppState {
    use huddle_store::Database;

    use crate::auth::TrustedGatewayIdentity;
    use crate::store::Store;

    let config = ServerConfig {
        blob_storage_path: dir.join("blobs"),
        max_blob_size: 1024,
        public_base_url: "http://test".into(),
        ..ServerConfig::default()
    };
    let blob_store = Arc::new(
        BlobStore::new(
            config.blob_storage_path.clone(),
            config.max_blob_size,
            config.public_base_url.clone(),
        )
        .await
        .unwrap(),
    );
    let registry = ConnectionRegistry::new();
    let chat = ChatService::new(
        Store::new(Database::open_in_memory().unwrap()),
        blob_store.clone(),
        registry.clone(),
    );
    AppState {
        chat,
        blob_store,
        registry,
        identity: Arc::new(TrustedGatewayIdentity),
        config: Arc::new(config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        _dir: TempDir,
    }

    impl TestApp {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let state = test_state(dir.path()).await;
            Self {
                router: build_router(state),
                _dir: dir,
            }
        }

        async fn call(
            &self,
            method: Method,
            uri: &str,
            as_user: Option<UserId>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(user) = as_user {
                req = req.header(header::AUTHORIZATION, format!("Bearer {user}"));
            }
            let req = match body {
                Some(b) => req
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(b.to_string()))
                    .unwrap(),
                None => req.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(req).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            (status, value)
        }
    }

    fn unseen_for(listing: &Value, id: &str) -> u64 {
        listing
            .as_array()
            .unwrap()
            .iter()
            .find(|g| g["id"] == id)
            .map(|g| g["unseenCount"].as_u64().unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new().await;
        let (status, body) = app.call(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_requests_without_identity_are_rejected() {
        let app = TestApp::new().await;
        let (status, body) = app.call(Method::GET, "/groups", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn test_team_scenario() {
        let app = TestApp::new().await;
        let (u1, u2, u3) = (UserId::new(), UserId::new(), UserId::new());

        let (status, group) = app
            .call(
                Method::POST,
                "/groups",
                Some(u1),
                Some(json!({ "name": "Team", "memberIds": [u2, u3] })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let gid = group["id"].as_str().unwrap().to_string();
        let members = group["members"].as_array().unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(members[0]["role"], "admin");
        assert_eq!(members[0]["user"]["id"], u1.to_string());

        let (status, msg) = app
            .call(
                Method::POST,
                &format!("/groups/{gid}/messages"),
                Some(u2),
                Some(json!({ "text": "hello" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(msg["readBy"], json!([]));

        let (_, listing) = app.call(Method::GET, "/groups", Some(u3), None).await;
        assert_eq!(unseen_for(&listing, &gid), 1);

        let (status, _) = app
            .call(
                Method::PUT,
                &format!("/groups/{gid}/messages/read"),
                Some(u3),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (_, listing) = app.call(Method::GET, "/groups", Some(u3), None).await;
        assert_eq!(unseen_for(&listing, &gid), 0);

        let (_, history) = app
            .call(Method::GET, &format!("/groups/{gid}/messages"), Some(u1), None)
            .await;
        let read_by = history[0]["readBy"].as_array().unwrap();
        assert_eq!(read_by.len(), 1);
        assert_eq!(read_by[0]["userId"], u3.to_string());
    }

    #[tokio::test]
    async fn test_membership_errors() {
        let app = TestApp::new().await;
        let (u1, u2, u3) = (UserId::new(), UserId::new(), UserId::new());

        let (_, group) = app
            .call(
                Method::POST,
                "/groups",
                Some(u1),
                Some(json!({ "name": "Team", "memberIds": [u2] })),
            )
            .await;
        let gid = group["id"].as_str().unwrap().to_string();
        let members_uri = format!("/groups/{gid}/members");

        let (status, body) = app
            .call(
                Method::POST,
                &members_uri,
                Some(u2),
                Some(json!({ "memberId": u3 })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "NOT_AUTHORIZED");

        let (status, body) = app
            .call(
                Method::POST,
                &members_uri,
                Some(u1),
                Some(json!({ "memberId": u2 })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONFLICT");

        let (status, _) = app
            .call(Method::GET, &format!("/groups/{gid}"), Some(u3), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .call(
                Method::DELETE,
                &format!("/groups/{gid}/members/{u2}"),
                Some(u1),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["members"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_direct_conversation() {
        let app = TestApp::new().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        app.call(
            Method::PUT,
            "/users/me",
            Some(alice),
            Some(json!({ "displayName": "Alice" })),
        )
        .await;

        for text in ["one", "two", "three"] {
            let (status, _) = app
                .call(
                    Method::POST,
                    &format!("/messages/send/{bob}"),
                    Some(alice),
                    Some(json!({ "text": text })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (_, peers) = app
            .call(Method::GET, "/messages/users", Some(bob), None)
            .await;
        assert_eq!(unseen_for(&peers, &alice.to_string()), 3);

        let (_, transcript) = app
            .call(Method::GET, &format!("/messages/{alice}"), Some(bob), None)
            .await;
        let texts: Vec<_> = transcript
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);

        app.call(
            Method::PUT,
            &format!("/messages/read/{alice}"),
            Some(bob),
            None,
        )
        .await;
        let (_, peers) = app
            .call(Method::GET, "/messages/users", Some(bob), None)
            .await;
        assert_eq!(unseen_for(&peers, &alice.to_string()), 0);

        let (status, body) = app
            .call(
                Method::POST,
                &format!("/messages/send/{bob}"),
                Some(alice),
                Some(json!({ "text": "" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_uploaded_image_is_served() {
        let app = TestApp::new().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        let (status, msg) = app
            .call(
                Method::POST,
                &format!("/messages/send/{bob}"),
                Some(alice),
                Some(json!({ "image": "data:image/png;base64,iVBORw0KGgo=" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let url = msg["image"].as_str().unwrap();
        let path = url.strip_prefix("http://test").unwrap();
        let response = app
            .router
            .clone()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    }
}
