use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{
    ChangeEvent, ChangeKind, ChangeNotice, ChangePayload, EditingDelta, EditingTarget,
    EditorUser, EditorsSnapshot, RecordId,
};

/// One websocket text frame: `{"event": "<name>", "data": <payload>}`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("invalid payload for '{event}': {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload {
        event: event.to_string(),
        source,
    })
}

/// Frames a client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    JoinPage(String),
    LeavePage(String),
    JoinAccount(RecordId),
    LeaveAccount(RecordId),
    EditingStart(EditingTarget),
    EditingEnd(EditingTarget),
    ChangeNotify(ChangeNotice),
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinPage(_) => "join:page",
            ClientMessage::LeavePage(_) => "leave:page",
            ClientMessage::JoinAccount(_) => "join:account",
            ClientMessage::LeaveAccount(_) => "leave:account",
            ClientMessage::EditingStart(_) => "editing:start",
            ClientMessage::EditingEnd(_) => "editing:end",
            ClientMessage::ChangeNotify(_) => "change:notify",
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let Envelope { event, data } = serde_json::from_str(text)?;
        let msg = match event.as_str() {
            "join:page" => ClientMessage::JoinPage(payload(&event, data)?),
            "leave:page" => ClientMessage::LeavePage(payload(&event, data)?),
            "join:account" => ClientMessage::JoinAccount(payload(&event, data)?),
            "leave:account" => ClientMessage::LeaveAccount(payload(&event, data)?),
            "editing:start" => ClientMessage::EditingStart(payload(&event, data)?),
            "editing:end" => ClientMessage::EditingEnd(payload(&event, data)?),
            "change:notify" => ClientMessage::ChangeNotify(payload(&event, data)?),
            _ => return Err(ProtocolError::UnknownEvent(event)),
        };
        Ok(msg)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let data = match self {
            ClientMessage::JoinPage(page) | ClientMessage::LeavePage(page) => {
                serde_json::to_value(page)?
            }
            ClientMessage::JoinAccount(id) | ClientMessage::LeaveAccount(id) => {
                serde_json::to_value(id)?
            }
            ClientMessage::EditingStart(target) | ClientMessage::EditingEnd(target) => {
                serde_json::to_value(target)?
            }
            ClientMessage::ChangeNotify(notice) => serde_json::to_value(notice)?,
        };
        let envelope = Envelope { event: self.event_name().to_string(), data };
        Ok(serde_json::to_string(&envelope)?)
    }
}

/// Payload of `session:ready`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionReady {
    pub session_id: String,
    pub user: EditorUser,
}

/// Frames the server sends to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    SessionReady(SessionReady),
    EditorsList(EditorsSnapshot),
    EditingStarted(EditingDelta),
    EditingEnded(EditingDelta),
    Changed(ChangeEvent),
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::SessionReady(_) => "session:ready",
            ServerMessage::EditorsList(_) => "editors:list",
            ServerMessage::EditingStarted(_) => "editing:started",
            ServerMessage::EditingEnded(_) => "editing:ended",
            ServerMessage::Changed(event) => event.kind.as_str(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let data = match self {
            ServerMessage::SessionReady(ready) => serde_json::to_value(ready)?,
            ServerMessage::EditorsList(snapshot) => serde_json::to_value(snapshot)?,
            ServerMessage::EditingStarted(delta) | ServerMessage::EditingEnded(delta) => {
                serde_json::to_value(delta)?
            }
            ServerMessage::Changed(event) => serde_json::to_value(event.clone().into_payload())?,
        };
        let envelope = Envelope { event: self.event_name().to_string(), data };
        Ok(serde_json::to_string(&envelope)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let Envelope { event, data } = serde_json::from_str(text)?;
        let msg = match event.as_str() {
            "session:ready" => ServerMessage::SessionReady(payload(&event, data)?),
            "editors:list" => ServerMessage::EditorsList(payload(&event, data)?),
            "editing:started" => ServerMessage::EditingStarted(payload(&event, data)?),
            "editing:ended" => ServerMessage::EditingEnded(payload(&event, data)?),
            other => match other.parse::<ChangeKind>() {
                Ok(kind) => {
                    let body: ChangePayload = payload(&event, data)?;
                    ServerMessage::Changed(ChangeEvent::from_payload(kind, body))
                }
                Err(_) => return Err(ProtocolError::UnknownEvent(event)),
            },
        };
        Ok(msg)
    }
}
