use axum::{
    Json,
    extract::{Query, State, WebSocketUpgrade, rejection::JsonRejection},
    http::{HeaderMap, header},
    response::Response,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::auth::AuthUser;
use crate::chat::{Identity, client::serve_connection};
use crate::error::ApiError;
use crate::models::{AdminInfo, PersistedMessage, User, UserId};

async fn load_user(state: &AppState, id: UserId) -> Result<User, ApiError> {
    state
        .repository
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

/// Upgrade to a chat WebSocket.
///
/// The admin flag is taken from the stored user row, not the token, so a
/// demoted administrator stops receiving routed messages immediately.
pub async fn websocket_handler(
    auth: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !state.chat.config.origin_allowed(origin) {
        warn!(user_id = auth.user_id, origin, "Rejected chat upgrade from disallowed origin");
        return Err(ApiError::Forbidden("Origin not allowed".into()));
    }

    let user = load_user(&state, auth.user_id).await?;
    let identity = Identity {
        user_id: user.id,
        is_admin: user.admin,
    };
    info!(user_id = user.id, admin = user.admin, "Upgrading chat connection");

    let limit = state.chat.config.max_message_bytes;
    let ctx = state.chat.clone();
    Ok(ws
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| serve_connection(socket, identity, ctx)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// Conversation between a user and the administrator, oldest first.
///
/// Shoppers get their own conversation; the administrator names the
/// shopper with `?userId=`.
pub async fn chat_history(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PersistedMessage>>, ApiError> {
    let user = load_user(&state, auth.user_id).await?;

    let counterpart = if user.admin {
        let raw = query
            .user_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ApiError::BadRequest("userId query parameter is required for admin".into())
            })?;
        raw.trim()
            .parse::<UserId>()
            .map_err(|_| ApiError::BadRequest("Invalid userId".into()))?
    } else {
        user.id
    };

    let Some(admin) = state.repository.find_admin().await? else {
        return Ok(Json(Vec::new()));
    };

    let messages = state
        .repository
        .conversation_between(counterpart, admin.id)
        .await?;
    debug!(
        user_id = counterpart,
        count = messages.len(),
        "Loaded chat history"
    );
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct FcmTokenRequest {
    pub token: String,
}

/// Register the caller's device token for offline push notifications.
pub async fn update_fcm_token(
    auth: AuthUser,
    State(state): State<AppState>,
    body: Result<Json<FcmTokenRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = body.map_err(|_| ApiError::BadRequest("Invalid request body".into()))?;
    if req.token.trim().is_empty() {
        return Err(ApiError::BadRequest("Invalid request body".into()));
    }

    if !state.repository.set_fcm_token(auth.user_id, &req.token).await? {
        return Err(ApiError::NotFound("User not found".into()));
    }
    info!(user_id = auth.user_id, "FCM token updated");
    Ok(Json(
        serde_json::json!({ "message": "FCM token updated successfully" }),
    ))
}

/// Who shoppers are talking to.
pub async fn admin_info(State(state): State<AppState>) -> Result<Json<AdminInfo>, ApiError> {
    let admin = state
        .repository
        .find_admin()
        .await?
        .ok_or_else(|| ApiError::NotFound("Admin not found".into()))?;
    Ok(Json(AdminInfo::from(&admin)))
}
