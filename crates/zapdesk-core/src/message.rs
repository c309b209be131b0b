use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionSnapshot;

/// One chat message flowing through a session, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Platform message id, when the adapter reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Chat the message belongs to (e.g. a phone number or JID).
    pub chat: String,
    /// Who sent it.
    pub sender: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// Event fanned out to push-channel subscribers.
///
/// Per-session ordering matches the order the manager accepted the
/// underlying transitions; no ordering is promised across session ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    /// A session's registry record changed; carries the full new snapshot.
    StateChange {
        session_id: String,
        snapshot: SessionSnapshot,
    },
    /// Inbound chat message relayed from the adapter.
    MessageIn {
        session_id: String,
        message: MessagePayload,
    },
    /// Outbound chat message confirmed sent by the adapter.
    MessageOut {
        session_id: String,
        message: MessagePayload,
    },
}

impl BroadcastEvent {
    pub fn session_id(&self) -> &str {
        match self {
            BroadcastEvent::StateChange { session_id, .. }
            | BroadcastEvent::MessageIn { session_id, .. }
            | BroadcastEvent::MessageOut { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    #[test]
    fn test_broadcast_event_tagged_json() {
        let event = BroadcastEvent::StateChange {
            session_id: "sac1".into(),
            snapshot: SessionSnapshot {
                id: "sac1".into(),
                state: SessionState::Ready,
                qr_payload: None,
                last_error: None,
                created_at: Utc::now(),
                last_transition_at: Utc::now(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state_change");
        assert_eq!(json["session_id"], "sac1");
        assert_eq!(json["snapshot"]["state"], "ready");
    }

    #[test]
    fn test_message_in_roundtrip() {
        let event = BroadcastEvent::MessageIn {
            session_id: "sac1".into(),
            message: MessagePayload {
                id: Some("wa-123".into()),
                chat: "+551199999999".into(),
                sender: "+551199999999".into(),
                body: "hello".into(),
                timestamp: Utc::now(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: BroadcastEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.session_id(), "sac1");
    }
}
