//! Events pushed to live client connections.

use serde::Serialize;

use crate::message::StatusUpdateMessage;

/// A named event delivered over a live connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveEvent {
    /// Event name on the wire
    pub name: &'static str,
    pub payload: StatusUpdateMessage,
}

impl LiveEvent {
    pub const STATUS_UPDATE: &'static str = "status_update";

    pub fn status_update(payload: StatusUpdateMessage) -> Self {
        Self {
            name: Self::STATUS_UPDATE,
            payload,
        }
    }

    /// JSON encoding of the payload.
    pub fn data(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.payload)
    }
}
