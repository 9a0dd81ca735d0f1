pub mod hub;
pub mod presence;
pub mod rooms;
pub mod session;

pub use hub::{Hub, HubError, HubStats, JoinedPage};
pub use rooms::{RoomFrame, RoomKey};
pub use session::{Session, SessionId};
