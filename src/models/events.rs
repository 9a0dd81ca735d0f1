use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::models::{ChangeKind, RecordId};

/// Body of `POST /api/v1/events`, sent by the REST layer after a write is persisted.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub event_type: ChangeKind,
    /// Page room to notify
    pub page: Option<String>,
    /// Account room to notify (used when no page is given)
    #[schema(value_type = Option<String>)]
    pub account_id: Option<RecordId>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub hints: Map<String, Value>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct BroadcastResponse {
    /// Receivers subscribed to the room when the event was sent, origin included
    pub delivered: usize,
}
