use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

/// The closed set of invalidation events clients listen for, one per entity group.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, ToSchema)]
pub enum ChangeKind {
    #[serde(rename = "drbet:changed")]
    Drbet,
    #[serde(rename = "finish:changed")]
    Finish,
    #[serde(rename = "sites:changed")]
    Sites,
    #[serde(rename = "settlements:changed")]
    Settlements,
    #[serde(rename = "identities:changed")]
    Identities,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 5] = [
        ChangeKind::Drbet,
        ChangeKind::Finish,
        ChangeKind::Sites,
        ChangeKind::Settlements,
        ChangeKind::Identities,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Drbet => "drbet:changed",
            ChangeKind::Finish => "finish:changed",
            ChangeKind::Sites => "sites:changed",
            ChangeKind::Settlements => "settlements:changed",
            ChangeKind::Identities => "identities:changed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown change event type '{0}'")]
pub struct UnknownChangeKind(pub String);

impl FromStr for ChangeKind {
    type Err = UnknownChangeKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownChangeKind(s.to_string()))
    }
}

/// A fire-and-forget invalidation hint. Never stored, never replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Page room the event was fanned out to; `None` for account-scoped events
    pub page: Option<String>,
    /// Display name of the user whose write caused the event
    pub user: String,
    pub hints: Map<String, Value>,
    /// Unix epoch milliseconds
    pub emitted_at: i64,
}

/// Keys the server stamps on every change payload; hints may not carry them.
pub const RESERVED_PAYLOAD_KEYS: [&str; 3] = ["user", "page", "emittedAt"];

/// Drop hint keys that would shadow a stamped field once flattened.
pub fn strip_reserved_hints(hints: &mut Map<String, Value>) {
    hints.retain(|key, _| !RESERVED_PAYLOAD_KEYS.contains(&key.as_str()));
}

/// Wire data of a `<entity>:changed` frame: `{user, page?, emittedAt, ...hints}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangePayload {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default)]
    pub emitted_at: i64,
    #[serde(flatten)]
    pub hints: Map<String, Value>,
}

impl ChangeEvent {
    pub fn into_payload(self) -> ChangePayload {
        ChangePayload {
            user: self.user,
            page: self.page,
            emitted_at: self.emitted_at,
            hints: self.hints,
        }
    }

    pub fn from_payload(kind: ChangeKind, payload: ChangePayload) -> Self {
        Self {
            kind,
            page: payload.page,
            user: payload.user,
            hints: payload.hints,
            emitted_at: payload.emitted_at,
        }
    }
}

/// Payload of the client-originated `change:notify`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotice {
    pub page: String,
    pub event_type: ChangeKind,
    #[serde(default)]
    pub hints: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds_parse_from_wire_names() {
        for kind in ChangeKind::ALL {
            assert_eq!(kind.as_str().parse::<ChangeKind>(), Ok(kind));
        }
        assert!("audit:changed".parse::<ChangeKind>().is_err());
    }

    #[test]
    fn payload_flattens_hints_next_to_user() {
        let event = ChangeEvent {
            kind: ChangeKind::Finish,
            page: Some("finish".into()),
            user: "Lee".into(),
            hints: json!({"action": "update", "date": "2026-10-01"})
                .as_object()
                .cloned()
                .unwrap(),
            emitted_at: 1_700_000_000_000,
        };
        let value = serde_json::to_value(event.clone().into_payload()).unwrap();
        assert_eq!(value["user"], json!("Lee"));
        assert_eq!(value["action"], json!("update"));
        assert_eq!(value["emittedAt"], json!(1_700_000_000_000_i64));

        let back: ChangePayload = serde_json::from_value(value).unwrap();
        assert_eq!(ChangeEvent::from_payload(ChangeKind::Finish, back), event);
    }

    #[test]
    fn reserved_hint_keys_are_stripped() {
        let mut hints = json!({"user": "Mallory", "emittedAt": 0, "page": "x", "id": 4})
            .as_object()
            .cloned()
            .unwrap();
        strip_reserved_hints(&mut hints);
        assert_eq!(Value::Object(hints), json!({"id": 4}));
    }

    #[test]
    fn unknown_kind_error_names_the_type() {
        let err = "audit:changed".parse::<ChangeKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown change event type 'audit:changed'");
    }

    #[test]
    fn notice_rejects_unknown_event_types() {
        let bad = json!({"page": "sites", "eventType": "accounts:changed"});
        assert!(serde_json::from_value::<ChangeNotice>(bad).is_err());
    }
}
