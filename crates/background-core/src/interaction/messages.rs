//! Messages pushed to foreground ports.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request waiting for a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    /// 24 lowercase hex characters.
    pub id: String,
    /// What kind of approval this is, e.g. `request-sign`.
    #[serde(rename = "type")]
    pub interaction_type: String,
    /// Whether the request came from the wallet itself.
    pub is_internal: bool,
    /// Opaque request data rendered by the UI.
    pub payload: Value,
}

/// Tells the UI about a new pending interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushInteractionDataMsg {
    pub id: String,
    #[serde(rename = "type")]
    pub interaction_type: String,
    pub is_internal: bool,
    pub payload: Value,
}

impl From<InteractionRecord> for PushInteractionDataMsg {
    fn from(record: InteractionRecord) -> Self {
        Self {
            id: record.id,
            interaction_type: record.interaction_type,
            is_internal: record.is_internal,
            payload: record.payload,
        }
    }
}

/// A one-way event for the UI. Nothing waits for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEventDataMsg {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
}

/// Every message the background pushes to a foreground port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "kebab-case")]
pub enum ForegroundMessage {
    PushInteractionData(PushInteractionDataMsg),
    PushEventData(PushEventDataMsg),
}
