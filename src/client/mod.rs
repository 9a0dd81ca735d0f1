//! Client side of the realtime layer: one owned connection per logged-in user
//! and a per-page adapter on top of it.

pub mod connection;
pub mod debounce;
pub mod dispatcher;
pub mod endpoint;
pub mod indicator;
pub mod sync_hook;
pub mod toast;

use thiserror::Error;

pub use connection::{backoff_delay, ClientOptions, ConnectionHandle, ConnectionManager, ConnectionStatus};
pub use debounce::Debouncer;
pub use dispatcher::{Dispatcher, Subscription};
pub use endpoint::{endpoint_for_origin, DEV_PORT};
pub use indicator::{BadgeSize, EditingBadge};
pub use sync_hook::{PageSync, SyncError, SyncOptions, SyncState};
pub use toast::{Notifier, Toast, ToastDeduper};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("unsupported origin scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("token cannot be sent as a header")]
    InvalidToken,
    #[error("handshake rejected as unauthorized")]
    Unauthorized,
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}
