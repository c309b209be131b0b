//! Pure per-session state-transition logic.
//!
//! `transition` is a total function over (state, event): every pair either
//! yields a new state plus side effects for the caller to execute, or is
//! rejected. Rejection is the normal answer for duplicate or out-of-order
//! adapter callbacks and must be treated as a no-op, never an error.

use zapdesk_core::session::SessionState;

/// An event a session can be asked to apply.
///
/// `EnableRequested`/`DisableRequested` originate from callers; the rest
/// are translations of [`zapdesk_core::traits::AdapterEvent`] callbacks,
/// plus `InitTimeout` from the watchdog.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    EnableRequested,
    DisableRequested,
    QrReceived(String),
    Authenticated,
    Ready,
    AuthFailure(String),
    InitTimeout,
    Disconnected(String),
    Error(String),
}

impl SessionEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::EnableRequested => "enable_requested",
            SessionEvent::DisableRequested => "disable_requested",
            SessionEvent::QrReceived(_) => "qr_received",
            SessionEvent::Authenticated => "authenticated",
            SessionEvent::Ready => "ready",
            SessionEvent::AuthFailure(_) => "auth_failure",
            SessionEvent::InitTimeout => "init_timeout",
            SessionEvent::Disconnected(_) => "disconnected",
            SessionEvent::Error(_) => "error",
        }
    }
}

/// Field mutations the caller must apply alongside an accepted transition.
///
/// Kept out of the transition function itself so it stays pure — the
/// registry applies these under its own lock.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    SetQr(String),
    ClearQr,
    SetLastError(String),
    ClearLastError,
    /// The underlying adapter must be destroyed and its handle dropped.
    ScheduleTeardown,
}

/// Outcome of feeding one event to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Accepted {
        next: SessionState,
        effects: Vec<SideEffect>,
    },
    /// Event is not legal in the current state; caller must change nothing.
    Rejected,
}

impl Transition {
    fn to(next: SessionState, effects: Vec<SideEffect>) -> Self {
        Transition::Accepted { next, effects }
    }
}

/// Compute the next state for `event` in `current`.
///
/// The `ready` shortcut from `Starting`/`QrPending` is deliberate:
/// underlying client libraries skip the `authenticated` callback when
/// restoring a persisted session.
pub fn transition(current: SessionState, event: &SessionEvent) -> Transition {
    use SessionEvent as E;
    use SessionState as S;
    use SideEffect as Fx;

    // Disable wins from every non-paused state, cancelling in-flight init.
    if matches!(event, E::DisableRequested) {
        return if current == S::Paused {
            Transition::Rejected
        } else {
            Transition::to(
                S::Paused,
                vec![Fx::ClearQr, Fx::ClearLastError, Fx::ScheduleTeardown],
            )
        };
    }

    // An unhandled adapter error forces Error from anywhere but Paused
    // (a paused slot has no adapter left to fail).
    if let E::Error(reason) = event {
        return if current == S::Paused {
            Transition::Rejected
        } else {
            Transition::to(
                S::Error,
                vec![
                    Fx::ClearQr,
                    Fx::SetLastError(reason.clone()),
                    Fx::ScheduleTeardown,
                ],
            )
        };
    }

    match (current, event) {
        (S::Paused, E::EnableRequested) => {
            Transition::to(S::Starting, vec![Fx::ClearQr, Fx::ClearLastError])
        }
        (S::Disconnected | S::Error, E::EnableRequested) => {
            Transition::to(S::Starting, vec![Fx::ClearQr, Fx::ClearLastError])
        }

        (S::Starting, E::QrReceived(payload)) => {
            Transition::to(S::QrPending, vec![Fx::SetQr(payload.clone())])
        }
        (S::Starting, E::Ready) => Transition::to(S::Ready, vec![Fx::ClearLastError]),
        (S::Starting, E::AuthFailure(reason)) => Transition::to(
            S::Error,
            vec![Fx::SetLastError(reason.clone()), Fx::ScheduleTeardown],
        ),
        (S::Starting, E::InitTimeout) => Transition::to(
            S::Error,
            vec![
                Fx::SetLastError("initialization timed out".to_string()),
                Fx::ScheduleTeardown,
            ],
        ),

        // QR codes rotate: a fresh payload replaces the stale one.
        (S::QrPending, E::QrReceived(payload)) => {
            Transition::to(S::QrPending, vec![Fx::SetQr(payload.clone())])
        }
        (S::QrPending, E::Authenticated) => Transition::to(S::Authenticated, vec![Fx::ClearQr]),
        (S::QrPending, E::Ready) => {
            Transition::to(S::Ready, vec![Fx::ClearQr, Fx::ClearLastError])
        }
        (S::QrPending, E::AuthFailure(reason)) => Transition::to(
            S::Error,
            vec![
                Fx::ClearQr,
                Fx::SetLastError(reason.clone()),
                Fx::ScheduleTeardown,
            ],
        ),

        (S::Authenticated, E::Ready) => Transition::to(S::Ready, vec![Fx::ClearLastError]),

        (S::Ready, E::Disconnected(reason)) => Transition::to(
            S::Disconnected,
            vec![Fx::SetLastError(reason.clone()), Fx::ScheduleTeardown],
        ),

        _ => Transition::Rejected,
    }
}
