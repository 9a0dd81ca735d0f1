use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        RawQuery, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::auth::auth::{authenticate, SessionUser};
use crate::models::{ClientMessage, ErrorResponse, RecordId, ServerMessage, SessionReady};
use crate::routes::api::is_allowed_origin;
use crate::utils::scope_guard::ScopeGuard;
use crate::websocket::connctx::{next_frame, ConnCtx, Slot};
use crate::websocket::msg_change_handler::handle_change_notify;
use crate::websocket::msg_editing_handler::{handle_editing_end, handle_editing_start};
use crate::websocket::msg_page_handler::{
    handle_join_account, handle_join_page, handle_leave_account, handle_leave_page,
};
use crate::AppState;

/// WebSocket handler. The token is checked before the upgrade; failures get a 401.
///
/// Browser upgrades carry an `Origin` and bypass CORS, so foreign origins get a 403.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    if let Some(origin) = headers.get(header::ORIGIN) {
        let extra = app_state.config.extra_cors_origins();
        let allowed = origin
            .to_str()
            .map(|o| is_allowed_origin(o, &extra))
            .unwrap_or(false);
        if !allowed {
            warn!("WebSocket upgrade from origin {:?} rejected", origin);
            return ErrorResponse::reply(StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }
    }
    let user = match authenticate(app_state.validator.as_ref(), &headers, query.as_deref()) {
        Ok(user) => user,
        Err(e) => {
            warn!("WebSocket handshake rejected: {}", e);
            return ErrorResponse::reply(StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };
    debug!("WebSocket handshake accepted for {}", user.display_name);
    ws.on_upgrade(move |socket| handle_socket(socket, user, app_state))
}

/// Handle one authenticated connection until it closes or goes silent.
async fn handle_socket(socket: WebSocket, user: SessionUser, app_state: Arc<AppState>) {
    let session = app_state.hub.connect(user).await;
    let session_id = session.id;

    // Sweep claims and rooms however this task ends
    let _cleanup = {
        let app_state = app_state.clone();
        ScopeGuard::new(move || {
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                rt.spawn(async move {
                    app_state.hub.disconnect(session_id).await;
                });
            }
        })
    };

    let (sender, mut receiver) = socket.split();
    let mut ctx = ConnCtx::new(session, app_state.clone(), sender);

    let ready = ServerMessage::SessionReady(SessionReady {
        session_id: session_id.to_string(),
        user: ctx.session.user.editor(),
    });
    if !ctx.send(&ready).await {
        return;
    }
    let own_account = RecordId::Text(ctx.session.user.id.clone());
    handle_join_account(&mut ctx, own_account).await;

    let ping_timeout = app_state.config.ping_timeout();
    let mut heartbeat = tokio::time::interval(app_state.config.ping_interval());
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let Some(Ok(frame)) = incoming else { break };
                ctx.touch();
                match frame {
                    Message::Text(text) => {
                        if !dispatch(&mut ctx, &text).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    // Ping/pong are answered by the socket itself
                    _ => {}
                }
            }
            received = next_frame(&mut ctx.page) => {
                if !ctx.relay(received, Slot::Page).await {
                    break;
                }
            }
            received = next_frame(&mut ctx.account) => {
                if !ctx.relay(received, Slot::Account).await {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if ctx.silent_for() > ping_timeout {
                    warn!("Session {} silent for {:?}, closing", session_id, ctx.silent_for());
                    ctx.close().await;
                    break;
                }
                if !ctx.ping().await {
                    break;
                }
            }
        }
    }
    info!("WebSocket connection terminated for session {}", session_id);
}

/// Decode one text frame and route it. Returns false once the socket is gone.
async fn dispatch(ctx: &mut ConnCtx, text: &str) -> bool {
    let msg = match ClientMessage::decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Dropping frame from session {}: {}", ctx.session.id, e);
            return true;
        }
    };
    debug!("Session {} sent {}", ctx.session.id, msg.event_name());

    match msg {
        ClientMessage::JoinPage(page) => return handle_join_page(ctx, page).await,
        ClientMessage::LeavePage(page) => handle_leave_page(ctx, page).await,
        ClientMessage::JoinAccount(id) => handle_join_account(ctx, id).await,
        ClientMessage::LeaveAccount(id) => handle_leave_account(ctx, id).await,
        ClientMessage::EditingStart(target) => handle_editing_start(ctx, target).await,
        ClientMessage::EditingEnd(target) => handle_editing_end(ctx, target).await,
        ClientMessage::ChangeNotify(notice) => handle_change_notify(ctx, notice).await,
    }
    true
}
