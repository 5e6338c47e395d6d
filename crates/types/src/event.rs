//! Real-time event envelope pushed to WebSocket observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event types emitted by the directory and by peer agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // -- Directory --
    PeerRegistered,
    FileRegistered,
    StatsUpdate,

    // -- Peer agent --
    FileAdded,
    FileRemoved,
    FileShared,
    FileUnshared,
    PeerInfo,
}

/// Wire shape `{type, data, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Wrap a serializable payload, stamping the current time.
    pub fn new<T: Serialize>(kind: EventKind, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind,
            data: serde_json::to_value(data)?,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_snake_case_type() {
        let event = Event::new(EventKind::StatsUpdate, &json!({"total_peers": 1})).unwrap();
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "stats_update");
        assert_eq!(value["data"]["total_peers"], 1);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn envelope_round_trips_kind() {
        let event = Event::new(EventKind::FileUnshared, &"x").unwrap();
        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back.kind, EventKind::FileUnshared);
    }
}
