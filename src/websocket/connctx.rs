use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, warn};

use crate::models::ServerMessage;
use crate::ws::rooms::RoomFrame;
use crate::ws::session::Session;
use crate::AppState;

/// Per-connection state owned by the socket task.
pub struct ConnCtx {
    pub session: Session,
    pub state: Arc<AppState>,
    sender: SplitSink<WebSocket, Message>,
    /// Page currently joined and its room feed
    pub page: Option<(String, broadcast::Receiver<RoomFrame>)>,
    /// Account currently watched and its room feed
    pub account: Option<(String, broadcast::Receiver<RoomFrame>)>,
    last_seen: Instant,
}

impl ConnCtx {
    pub fn new(session: Session, state: Arc<AppState>, sender: SplitSink<WebSocket, Message>) -> Self {
        Self {
            session,
            state,
            sender,
            page: None,
            account: None,
            last_seen: Instant::now(),
        }
    }

    /// Encode and write one frame. Returns false once the socket is gone.
    pub async fn send(&mut self, message: &ServerMessage) -> bool {
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {} for session {}: {}", message.event_name(), self.session.id, e);
                return true;
            }
        };
        self.sender.send(Message::Text(text)).await.is_ok()
    }

    pub async fn ping(&mut self) -> bool {
        self.sender.send(Message::Ping(Vec::new())).await.is_ok()
    }

    pub async fn close(&mut self) {
        let _ = self.sender.send(Message::Close(None)).await;
    }

    /// Any inbound frame counts as a sign of life.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn silent_for(&self) -> std::time::Duration {
        self.last_seen.elapsed()
    }

    /// Forward one room frame to the socket unless it excludes this session.
    ///
    /// Returns false once the socket is gone.
    pub async fn relay(&mut self, received: Result<RoomFrame, RecvError>, slot: Slot) -> bool {
        match received {
            Ok(frame) if frame.is_for(self.session.id) => self.send(&frame.message).await,
            Ok(_) => true,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Session {} lagged behind its {:?} room, {} frame(s) skipped", self.session.id, slot, skipped);
                true
            }
            Err(RecvError::Closed) => {
                debug!("{:?} room of session {} closed", slot, self.session.id);
                match slot {
                    Slot::Page => self.page = None,
                    Slot::Account => self.account = None,
                }
                true
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Slot {
    Page,
    Account,
}

/// Wait for the next frame of an optional room feed; pends forever when unset.
pub async fn next_frame(
    feed: &mut Option<(String, broadcast::Receiver<RoomFrame>)>,
) -> Result<RoomFrame, RecvError> {
    match feed {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}
