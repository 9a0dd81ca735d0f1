use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::auth::SessionUser;

/// Opaque per-connection identifier, assigned at upgrade time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SessionId)
    }
}

/// Server-side view of one live connection.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
    pub user: SessionUser,
    /// One page room at a time
    pub current_page: Option<String>,
    /// One account room at a time
    pub current_account: Option<String>,
}

impl Session {
    pub fn new(user: SessionUser) -> Self {
        Self {
            id: SessionId::new(),
            user,
            current_page: None,
            current_account: None,
        }
    }
}
