use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::connection::{ConnectionHandle, ConnectionStatus};
use crate::client::debounce::Debouncer;
use crate::client::dispatcher::Subscription;
use crate::client::toast::{Notifier, ToastDeduper};
use crate::models::{ChangeEvent, ChangeKind, EditingClaim, RecordId};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("page sync must be mounted inside a tokio runtime: {0}")]
    NoRuntime(#[from] TryCurrentError),
}

#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Change kinds that trigger a reload
    pub events: Vec<ChangeKind>,
    pub show_toast: bool,
    /// Quiet period before the reload callback runs
    pub debounce: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            show_toast: true,
            debounce: Duration::from_millis(1000),
        }
    }
}

impl SyncOptions {
    pub fn watching(events: impl IntoIterator<Item = ChangeKind>) -> Self {
        Self {
            events: events.into_iter().collect(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Joining,
    Joined,
    Rejoining,
}

/// Next state given the connection status and whether the server confirmed our page.
fn next_state(previous: SyncState, status: ConnectionStatus, joined: bool) -> SyncState {
    match (joined, previous) {
        (true, _) => SyncState::Joined,
        (false, SyncState::Joined | SyncState::Rejoining) => SyncState::Rejoining,
        (false, _) if status == ConnectionStatus::Connected => SyncState::Joining,
        (false, previous) => previous,
    }
}

/// Per-page adapter: joins the page room, debounces watched change events into
/// one reload, and answers "who else is editing this?".
pub struct PageSync {
    page: String,
    connection: ConnectionHandle,
    debouncer: Arc<Debouncer>,
    subscriptions: Vec<Subscription>,
    state: watch::Sender<SyncState>,
    monitor: Option<JoinHandle<()>>,
}

impl PageSync {
    /// Join `page` and start watching `options.events`.
    ///
    /// `on_reload` runs once per burst with the last event of the burst.
    pub fn mount<F>(
        connection: ConnectionHandle,
        page: &str,
        options: SyncOptions,
        notifier: Arc<dyn Notifier>,
        on_reload: F,
    ) -> Result<Self, SyncError>
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let runtime = Handle::try_current()?;
        let debouncer = Arc::new(Debouncer::new(options.debounce, runtime.clone()));
        let toasts = Arc::new(ToastDeduper::default());
        let on_reload = Arc::new(on_reload);

        let subscriptions = options
            .events
            .iter()
            .map(|&kind| {
                let debouncer = debouncer.clone();
                let toasts = toasts.clone();
                let notifier = notifier.clone();
                let on_reload = on_reload.clone();
                let show_toast = options.show_toast;
                connection.on_change(kind, move |event| {
                    if show_toast && !event.user.is_empty() {
                        toasts.offer(kind, &event.user, notifier.as_ref());
                    }
                    let on_reload = on_reload.clone();
                    let event = event.clone();
                    debouncer.schedule(move || (*on_reload)(event));
                })
            })
            .collect();

        let (state, _) = watch::channel(SyncState::Joining);
        connection.join_page(page);
        debug!("Mounted realtime sync for page {}", page);

        let monitor = runtime.spawn(monitor(
            page.to_string(),
            connection.watch_status(),
            connection.watch_joined_page(),
            state.clone(),
        ));

        Ok(Self {
            page: page.to_string(),
            connection,
            debouncer,
            subscriptions,
            state,
            monitor: Some(monitor),
        })
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn notify_edit_start(&self, section: &str, record_id: Option<RecordId>) {
        self.connection.start_editing(&self.page, section, record_id);
    }

    pub fn notify_edit_end(&self, section: &str, record_id: Option<RecordId>) {
        self.connection.end_editing(&self.page, section, record_id);
    }

    /// Someone else's claim on `(section, record_id)`; `None` record matches the whole section.
    pub fn editor_for(&self, section: &str, record_id: Option<&RecordId>) -> Option<EditingClaim> {
        let me = self.connection.user_id();
        self.connection
            .editors()
            .into_iter()
            .filter(|claim| me.as_deref() != Some(claim.user.id.as_str()))
            .find(|claim| claim.matches(section, record_id))
    }

    pub fn editors(&self) -> Vec<EditingClaim> {
        self.connection.editors()
    }

    /// Leave the page and cancel any pending reload. Idempotent.
    pub fn unmount(&mut self) {
        let Some(monitor) = self.monitor.take() else {
            return;
        };
        monitor.abort();
        self.subscriptions.clear();
        self.debouncer.cancel();
        self.connection.leave_page(&self.page);
        self.state.send_replace(SyncState::Idle);
        debug!("Unmounted realtime sync for page {}", self.page);
    }
}

impl Drop for PageSync {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn monitor(
    page: String,
    mut status: watch::Receiver<ConnectionStatus>,
    mut joined: watch::Receiver<Option<String>>,
    state: watch::Sender<SyncState>,
) {
    loop {
        let current_status = *status.borrow_and_update();
        let is_joined = joined.borrow_and_update().as_deref() == Some(page.as_str());
        state.send_if_modified(|s| {
            let next = next_state(*s, current_status, is_joined);
            let changed = next != *s;
            *s = next;
            changed
        });

        tokio::select! {
            changed = status.changed() => if changed.is_err() { break },
            changed = joined.changed() => if changed.is_err() { break },
        }
    }
}
