use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::{debug, warn};

use crate::auth::auth::{may_watch_account, SessionUser};
use crate::models::{BroadcastRequest, BroadcastResponse, ErrorResponse};
use crate::ws::{RoomKey, SessionId};
use crate::AppState;

/// Header naming the websocket session that caused the write; it is skipped.
pub const SOCKET_ID_HEADER: &str = "x-socket-id";

/// Broadcast a change event after a REST write has been persisted
pub async fn broadcast_event(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    headers: HeaderMap,
    payload: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BroadcastResponse>), (StatusCode, Json<ErrorResponse>)> {
    let Json(request) = payload.map_err(|e| {
        warn!("Rejected broadcast request: {}", e);
        ErrorResponse::reply(StatusCode::BAD_REQUEST, e.body_text())
    })?;

    let room = match (request.page, request.account_id) {
        (Some(page), _) if !page.is_empty() => RoomKey::Page(page),
        (_, Some(account_id)) => {
            let account_id = account_id.to_string();
            if !may_watch_account(&user, &account_id) {
                return Err(ErrorResponse::reply(
                    StatusCode::FORBIDDEN,
                    format!("Not allowed to notify account {account_id}"),
                ));
            }
            RoomKey::Account(account_id)
        }
        _ => {
            return Err(ErrorResponse::reply(
                StatusCode::BAD_REQUEST,
                "Either page or accountId is required",
            ))
        }
    };

    // An unparsable origin only means nobody is skipped
    let origin = headers
        .get(SOCKET_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<SessionId>().ok());

    let delivered = app_state
        .hub
        .broadcast(room.clone(), request.event_type, user.display_name.clone(), request.hints, origin)
        .await;
    debug!("{} for {} by {} reached {} receiver(s)", request.event_type, room, user.display_name, delivered);

    Ok((StatusCode::OK, Json(BroadcastResponse { delivered })))
}
