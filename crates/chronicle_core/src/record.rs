use serde::{Deserialize, Serialize};

/// Context identifiers the producer attaches to a record. Textual on
/// the wire; the store encodes them to the binary columns on insert.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordContext {
    pub context_id: Option<String>,
    pub user_id: Option<String>,
    pub parent_id: Option<String>,
}

impl RecordContext {
    pub fn with_id(context_id: impl Into<String>) -> Self {
        Self {
            context_id: Some(context_id.into()),
            user_id: None,
            parent_id: None,
        }
    }
}

/// An event emitted by the producing collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    pub data: serde_json::Value,
    pub time_fired_ts: f64,
    pub context: RecordContext,
}

/// A state transition emitted by the producing collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateChangePayload {
    pub entity_id: String,
    pub state: String,
    pub attributes: serde_json::Value,
    pub last_updated_ts: f64,
    pub context: RecordContext,
}
