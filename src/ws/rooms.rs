use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::models::ServerMessage;
use crate::ws::session::SessionId;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Page(String),
    Account(String),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::Page(page) => write!(f, "page:{page}"),
            RoomKey::Account(id) => write!(f, "account:{id}"),
        }
    }
}

/// One fanned-out message. Receivers skip frames that exclude them.
#[derive(Clone, Debug)]
pub struct RoomFrame {
    pub exclude: Option<SessionId>,
    pub message: Arc<ServerMessage>,
}

impl RoomFrame {
    pub fn is_for(&self, session_id: SessionId) -> bool {
        self.exclude != Some(session_id)
    }
}

struct Room {
    members: HashSet<SessionId>,
    tx: broadcast::Sender<RoomFrame>,
}

/// Rooms are created on first join and dropped when the last member leaves.
pub struct RoomRegistry {
    rooms: HashMap<RoomKey, Room>,
    capacity: usize,
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Add `session_id` to the room and hand back a fresh receiver for it.
    ///
    /// Joining twice keeps a single membership.
    pub fn join(&mut self, key: RoomKey, session_id: SessionId) -> broadcast::Receiver<RoomFrame> {
        let capacity = self.capacity;
        let room = self.rooms.entry(key).or_insert_with(|| {
            let (tx, _rx) = broadcast::channel::<RoomFrame>(capacity);
            Room { members: HashSet::new(), tx }
        });
        room.members.insert(session_id);
        room.tx.subscribe()
    }

    /// Returns whether the session was a member.
    pub fn leave(&mut self, key: &RoomKey, session_id: SessionId) -> bool {
        let Some(room) = self.rooms.get_mut(key) else {
            return false;
        };
        let was_member = room.members.remove(&session_id);
        if room.members.is_empty() {
            debug!("Room {} is empty, discarding", key);
            self.rooms.remove(key);
        }
        was_member
    }

    /// Send a frame to every current receiver of the room.
    ///
    /// Returns how many receivers were subscribed; 0 when the room does not exist.
    pub fn publish(&self, key: &RoomKey, frame: RoomFrame) -> usize {
        match self.rooms.get(key) {
            Some(room) => room.tx.send(frame).unwrap_or(0),
            None => 0,
        }
    }

    pub fn member_count(&self, key: &RoomKey) -> usize {
        self.rooms.get(key).map_or(0, |room| room.members.len())
    }

    /// (page rooms, account rooms)
    pub fn room_counts(&self) -> (usize, usize) {
        self.rooms.keys().fold((0, 0), |(pages, accounts), key| match key {
            RoomKey::Page(_) => (pages + 1, accounts),
            RoomKey::Account(_) => (pages, accounts + 1),
        })
    }
}
