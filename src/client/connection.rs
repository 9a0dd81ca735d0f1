use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::dispatcher::{Dispatcher, Subscription};
use crate::client::endpoint::{endpoint_for_origin, DEV_PORT};
use crate::client::ClientError;
use crate::models::{
    ChangeEvent, ChangeKind, ChangeNotice, ClientMessage, EditingClaim, EditingDelta,
    EditingTarget, RecordId, ServerMessage, SessionReady,
};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No token; no connection is attempted
    LoggedOut,
    Connecting,
    Connected,
    /// Lost the connection (or never got one) and retrying with backoff
    Reconnecting,
    /// The server refused the token; waiting for a different one
    Unauthorized,
}

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub endpoint: Url,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ClientOptions {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        }
    }

    /// Options for a page served from `origin`.
    pub fn for_origin(origin: &str) -> Result<Self, ClientError> {
        Ok(Self::new(endpoint_for_origin(origin, DEV_PORT)?))
    }
}

/// Delay before reconnect attempt `attempt` (0-based): doubling from `initial`, capped at `max`.
pub fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 1u32 << attempt.min(16);
    initial.checked_mul(factor).map_or(max, |d| d.min(max))
}

#[derive(Default)]
struct Rooms {
    page: Option<String>,
    account: Option<RecordId>,
}

/// State shared between the driver task and every handle.
struct Shared {
    status: watch::Sender<ConnectionStatus>,
    editors: watch::Sender<Vec<EditingClaim>>,
    /// Page whose `editors:list` reply arrived on the current connection
    joined_page: watch::Sender<Option<String>>,
    session: watch::Sender<Option<SessionReady>>,
    rooms: Mutex<Rooms>,
    changes: Dispatcher<ChangeKind, ChangeEvent>,
}

fn same_claim(claim: &EditingClaim, delta: &EditingDelta) -> bool {
    claim.section == delta.section && claim.record_id == delta.record_id && claim.user.id == delta.user.id
}

impl Shared {
    fn new() -> Self {
        Self {
            status: watch::channel(ConnectionStatus::LoggedOut).0,
            editors: watch::channel(Vec::new()).0,
            joined_page: watch::channel(None).0,
            session: watch::channel(None).0,
            rooms: Mutex::new(Rooms::default()),
            changes: Dispatcher::new(),
        }
    }

    fn rooms(&self) -> std::sync::MutexGuard<'_, Rooms> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    fn is_current_page(&self, page: &str) -> bool {
        self.rooms().page.as_deref() == Some(page)
    }

    /// Frames to replay after (re)connecting.
    fn announcements(&self) -> Vec<ClientMessage> {
        let rooms = self.rooms();
        let mut out = Vec::new();
        if let Some(page) = &rooms.page {
            out.push(ClientMessage::JoinPage(page.clone()));
        }
        if let Some(account) = &rooms.account {
            out.push(ClientMessage::JoinAccount(account.clone()));
        }
        out
    }

    /// Forget everything learned from the last connection.
    fn reset_presence(&self) {
        self.editors.send_replace(Vec::new());
        self.joined_page.send_replace(None);
        self.session.send_replace(None);
    }

    fn receive(&self, text: &str) {
        match ServerMessage::decode(text) {
            Ok(msg) => self.apply(msg),
            Err(e) => warn!("Ignoring server frame: {}", e),
        }
    }

    fn apply(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::SessionReady(ready) => {
                debug!("Session {} ready for user {}", ready.session_id, ready.user.id);
                self.session.send_replace(Some(ready));
            }
            ServerMessage::EditorsList(snapshot) => {
                if !self.is_current_page(&snapshot.page) {
                    debug!("Ignoring editors:list for stale page {}", snapshot.page);
                    return;
                }
                self.editors.send_replace(snapshot.editors);
                self.joined_page.send_replace(Some(snapshot.page));
            }
            ServerMessage::EditingStarted(delta) => {
                if !self.is_current_page(&delta.page) {
                    return;
                }
                self.editors.send_modify(|editors| {
                    editors.retain(|c| !same_claim(c, &delta));
                    editors.push(EditingClaim {
                        section: delta.section,
                        record_id: delta.record_id,
                        user: delta.user,
                        started_at: Utc::now().timestamp_millis(),
                    });
                });
            }
            ServerMessage::EditingEnded(delta) => {
                if !self.is_current_page(&delta.page) {
                    return;
                }
                self.editors.send_if_modified(|editors| {
                    let before = editors.len();
                    editors.retain(|c| !same_claim(c, &delta));
                    editors.len() != before
                });
            }
            ServerMessage::Changed(event) => {
                let handled = self.changes.emit(&event.kind, &event);
                debug!("{} from {} delivered to {} handler(s)", event.kind, event.user, handled);
            }
        }
    }
}

enum Command {
    SetToken(Option<String>),
    Send(ClientMessage),
    Shutdown,
}

/// Cloneable access to the connection. All methods are cheap and never block.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectionHandle {
    /// Log in (`Some`) or out (`None`). Changing the token reconnects.
    pub fn set_token(&self, token: Option<String>) {
        let _ = self.commands.send(Command::SetToken(token));
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Server-assigned id of the current connection, for `x-socket-id`.
    pub fn session_id(&self) -> Option<String> {
        self.shared.session.borrow().as_ref().map(|s| s.session_id.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.shared.session.borrow().as_ref().map(|s| s.user.id.clone())
    }

    pub fn current_page(&self) -> Option<String> {
        self.shared.rooms().page.clone()
    }

    /// Frames are only written while connected; rooms are replayed on connect.
    fn send(&self, msg: ClientMessage) {
        if !self.is_connected() {
            debug!("Not connected, {} not sent", msg.event_name());
            return;
        }
        let _ = self.commands.send(Command::Send(msg));
    }

    pub fn join_page(&self, page: &str) {
        let previous = self.shared.rooms().page.replace(page.to_string());
        if previous.as_deref() != Some(page) {
            self.shared.editors.send_replace(Vec::new());
            self.shared.joined_page.send_replace(None);
        }
        self.send(ClientMessage::JoinPage(page.to_string()));
    }

    /// Leaving a page other than the current one keeps the current page's cache.
    pub fn leave_page(&self, page: &str) {
        let was_current = {
            let mut rooms = self.shared.rooms();
            let current = rooms.page.as_deref() == Some(page);
            if current {
                rooms.page = None;
            }
            current
        };
        if was_current {
            self.shared.editors.send_replace(Vec::new());
            self.shared.joined_page.send_replace(None);
        }
        self.send(ClientMessage::LeavePage(page.to_string()));
    }

    /// Watch an account's change feed, leaving the previously watched one.
    pub fn join_account(&self, account_id: impl Into<RecordId>) {
        let account_id = account_id.into();
        let previous = {
            let mut rooms = self.shared.rooms();
            if rooms.account.as_ref() == Some(&account_id) {
                return;
            }
            rooms.account.replace(account_id.clone())
        };
        if let Some(previous) = previous {
            self.send(ClientMessage::LeaveAccount(previous));
        }
        self.send(ClientMessage::JoinAccount(account_id));
    }

    pub fn leave_account(&self) {
        let previous = self.shared.rooms().account.take();
        if let Some(previous) = previous {
            self.send(ClientMessage::LeaveAccount(previous));
        }
    }

    pub fn start_editing(&self, page: &str, section: &str, record_id: Option<RecordId>) {
        self.send(ClientMessage::EditingStart(EditingTarget {
            page: page.to_string(),
            section: section.to_string(),
            record_id,
        }));
    }

    pub fn end_editing(&self, page: &str, section: &str, record_id: Option<RecordId>) {
        self.send(ClientMessage::EditingEnd(EditingTarget {
            page: page.to_string(),
            section: section.to_string(),
            record_id,
        }));
    }

    pub fn notify_change(&self, page: &str, kind: ChangeKind, hints: Map<String, Value>) {
        self.send(ClientMessage::ChangeNotify(ChangeNotice {
            page: page.to_string(),
            event_type: kind,
            hints,
        }));
    }

    /// Run `handler` for every incoming `kind` event until the subscription is dropped.
    pub fn on_change<F>(&self, kind: ChangeKind, handler: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.shared.changes.subscribe(kind, handler)
    }

    /// Editing claims on the current page, as last reported by the server.
    pub fn editors(&self) -> Vec<EditingClaim> {
        self.shared.editors.borrow().clone()
    }

    pub fn watch_editors(&self) -> watch::Receiver<Vec<EditingClaim>> {
        self.shared.editors.subscribe()
    }

    /// Page the server has confirmed joining on the live connection.
    pub fn watch_joined_page(&self) -> watch::Receiver<Option<String>> {
        self.shared.joined_page.subscribe()
    }
}

/// Owns the connection driver task. Dropping it tears the connection down.
pub struct ConnectionManager {
    handle: ConnectionHandle,
    driver: JoinHandle<()>,
}

impl ConnectionManager {
    /// Spawn the driver on the current tokio runtime. Starts logged out.
    pub fn start(options: ClientOptions) -> Self {
        let shared = Arc::new(Shared::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Driver {
            shared: shared.clone(),
            options,
            commands: rx,
        };
        Self {
            handle: ConnectionHandle { shared, commands: tx },
            driver: tokio::spawn(driver.run()),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Close the socket and wait for the driver to finish.
    pub async fn shutdown(mut self) {
        let _ = self.handle.commands.send(Command::Shutdown);
        let _ = (&mut self.driver).await;
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.driver.abort();
        self.handle.shared.set_status(ConnectionStatus::LoggedOut);
        self.handle.shared.reset_presence();
    }
}

enum SessionEnd {
    Dropped,
    Token(Option<String>),
    Shutdown,
}

enum Outcome {
    Token(Option<String>),
    Shutdown,
}

struct Driver {
    shared: Arc<Shared>,
    options: ClientOptions,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
    async fn run(mut self) {
        let mut token: Option<String> = None;
        loop {
            let Some(current) = token.clone() else {
                self.shared.set_status(ConnectionStatus::LoggedOut);
                match self.next_token().await {
                    Some(next) => {
                        token = next;
                        continue;
                    }
                    None => break,
                }
            };
            match self.serve_token(&current).await {
                Outcome::Token(next) => token = next,
                Outcome::Shutdown => break,
            }
        }
        self.shared.reset_presence();
        self.shared.set_status(ConnectionStatus::LoggedOut);
        debug!("Connection driver stopped");
    }

    /// Wait for the next `set_token`; `None` on shutdown.
    async fn next_token(&mut self) -> Option<Option<String>> {
        loop {
            match self.commands.recv().await {
                None | Some(Command::Shutdown) => return None,
                Some(Command::SetToken(token)) => return Some(token),
                Some(Command::Send(msg)) => debug!("Dropping {} while offline", msg.event_name()),
            }
        }
    }

    /// Decide whether a command received while not connected ends the current token's lifetime.
    fn interrupt(cmd: Option<Command>, token: &str) -> Option<Outcome> {
        match cmd {
            None | Some(Command::Shutdown) => Some(Outcome::Shutdown),
            Some(Command::SetToken(next)) if next.as_deref() == Some(token) => None,
            Some(Command::SetToken(next)) => Some(Outcome::Token(next)),
            Some(Command::Send(msg)) => {
                debug!("Dropping {} while offline", msg.event_name());
                None
            }
        }
    }

    /// Connect with `token` and keep reconnecting until the token changes.
    async fn serve_token(&mut self, token: &str) -> Outcome {
        let endpoint = self.options.endpoint.clone();
        let mut attempt: u32 = 0;
        let mut reconnecting = false;

        loop {
            self.shared.set_status(if reconnecting {
                ConnectionStatus::Reconnecting
            } else {
                ConnectionStatus::Connecting
            });

            let connecting = open(&endpoint, token);
            tokio::pin!(connecting);
            let result = loop {
                tokio::select! {
                    result = &mut connecting => break result,
                    cmd = self.commands.recv() => {
                        if let Some(outcome) = Self::interrupt(cmd, token) {
                            return outcome;
                        }
                    }
                }
            };

            match result {
                Ok(stream) => {
                    attempt = 0;
                    match self.serve(stream, token).await {
                        SessionEnd::Dropped => {
                            warn!("Connection to {} lost, reconnecting", endpoint);
                            self.shared.reset_presence();
                        }
                        SessionEnd::Token(next) => {
                            self.shared.reset_presence();
                            return Outcome::Token(next);
                        }
                        SessionEnd::Shutdown => return Outcome::Shutdown,
                    }
                }
                Err(ClientError::Unauthorized) => {
                    warn!("Server refused the token, waiting for a new one");
                    self.shared.set_status(ConnectionStatus::Unauthorized);
                    loop {
                        match self.next_token().await {
                            None => return Outcome::Shutdown,
                            Some(next) if next.as_deref() == Some(token) => continue,
                            Some(next) => return Outcome::Token(next),
                        }
                    }
                }
                Err(e) => warn!("Connection attempt {} to {} failed: {}", attempt + 1, endpoint, e),
            }

            reconnecting = true;
            let delay = backoff_delay(attempt, self.options.initial_backoff, self.options.max_backoff);
            attempt = attempt.saturating_add(1);
            self.shared.set_status(ConnectionStatus::Reconnecting);

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    cmd = self.commands.recv() => {
                        if let Some(outcome) = Self::interrupt(cmd, token) {
                            return outcome;
                        }
                    }
                }
            }
        }
    }

    /// Pump one live connection until it drops or the token changes.
    async fn serve(&mut self, stream: WsStream, token: &str) -> SessionEnd {
        let (mut sink, mut source) = stream.split();
        self.shared.set_status(ConnectionStatus::Connected);
        info!("Connected to {}", self.options.endpoint);

        // Status is already Connected, so nothing joined from here on is missed
        for msg in self.shared.announcements() {
            if write(&mut sink, &msg).await.is_err() {
                return SessionEnd::Dropped;
            }
        }

        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.shared.receive(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Transport error: {}", e);
                        return SessionEnd::Dropped;
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => {
                        let _ = sink.close().await;
                        return SessionEnd::Shutdown;
                    }
                    Some(Command::SetToken(next)) if next.as_deref() == Some(token) => {}
                    Some(Command::SetToken(next)) => {
                        let _ = sink.close().await;
                        return SessionEnd::Token(next);
                    }
                    Some(Command::Send(msg)) => {
                        if write(&mut sink, &msg).await.is_err() {
                            return SessionEnd::Dropped;
                        }
                    }
                },
            }
        }
    }
}

async fn write(sink: &mut WsSink, msg: &ClientMessage) -> Result<(), ClientError> {
    let text = match msg.encode() {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode {}: {}", msg.event_name(), e);
            return Ok(());
        }
    };
    sink.send(Message::text(text)).await?;
    Ok(())
}

/// Open an authenticated websocket. A 401 handshake maps to `ClientError::Unauthorized`.
async fn open(endpoint: &Url, token: &str) -> Result<WsStream, ClientError> {
    let mut request = endpoint.as_str().into_client_request()?;
    let bearer = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| ClientError::InvalidToken)?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    match connect_async(request).await {
        Ok((stream, _response)) => Ok(stream),
        Err(tungstenite::Error::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
            Err(ClientError::Unauthorized)
        }
        Err(e) => Err(e.into()),
    }
}
