use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one connection slot.
///
/// Replaces the ad-hoc state strings (`'paused'`, `'qr_ready'`, ...) the
/// dashboard used to juggle — there is exactly one enumeration, shared by
/// the state machine, the registry, and the broadcast payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No underlying connection; the slot is idle.
    Paused,
    /// An adapter is being constructed / connecting.
    Starting,
    /// Waiting for a human to scan the pairing QR code.
    QrPending,
    /// Scan accepted, final handshake in progress.
    Authenticated,
    /// Fully connected; messages can be sent.
    Ready,
    /// Connection lost after being ready.
    Disconnected,
    /// Initialization or authentication failed.
    Error,
}

impl SessionState {
    /// Whether an underlying adapter is (or is about to be) alive in this state.
    pub fn is_enabled(&self) -> bool {
        matches!(
            self,
            SessionState::Starting
                | SessionState::QrPending
                | SessionState::Authenticated
                | SessionState::Ready
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Paused => "paused",
            SessionState::Starting => "starting",
            SessionState::QrPending => "qr_pending",
            SessionState::Authenticated => "authenticated",
            SessionState::Ready => "ready",
            SessionState::Disconnected => "disconnected",
            SessionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Immutable, observer-facing copy of one session record.
///
/// The adapter handle never leaves the registry; snapshots carry only what
/// a status endpoint or dashboard needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub state: SessionState,
    /// Pairing payload — present iff `state == QrPending`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_payload: Option<String>,
    /// Human-readable failure reason — present only in `Error`/`Disconnected`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&SessionState::QrPending).unwrap();
        assert_eq!(json, "\"qr_pending\"");
    }

    #[test]
    fn test_is_enabled() {
        assert!(SessionState::Starting.is_enabled());
        assert!(SessionState::QrPending.is_enabled());
        assert!(SessionState::Authenticated.is_enabled());
        assert!(SessionState::Ready.is_enabled());
        assert!(!SessionState::Paused.is_enabled());
        assert!(!SessionState::Disconnected.is_enabled());
        assert!(!SessionState::Error.is_enabled());
    }

    #[test]
    fn test_snapshot_omits_absent_fields() {
        let snap = SessionSnapshot {
            id: "sac1".into(),
            state: SessionState::Paused,
            qr_payload: None,
            last_error: None,
            created_at: Utc::now(),
            last_transition_at: Utc::now(),
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(!json.contains("qr_payload"));
        assert!(!json.contains("last_error"));
    }
}
