//! # zapdesk-sessions
//!
//! Multi-session WhatsApp connection manager: owns the lifecycle of
//! underlying chat-client connections keyed by session id, maps their
//! asynchronous callbacks onto an explicit state machine, and fans
//! state-change and message events out to push-channel subscribers.
//!
//! Layering, leaves first:
//! - [`machine`] — pure per-session state-transition logic
//! - [`registry`] — the single source of truth for session records,
//!   mutated only through compare-and-update
//! - [`broadcast`] — subscriber bookkeeping and event fan-out
//! - [`manager`] — orchestration: drives adapters, feeds their events
//!   through the machine into the registry, publishes the results
//! - [`mock`] — scriptable adapter doubles for tests and local runs

pub mod broadcast;
pub mod machine;
pub mod manager;
pub mod mock;
pub mod registry;


pub use broadcast::EventBroadcaster;
pub use manager::{
    DisableOutcome, EnableOutcome, RegenerateQrOutcome, SendOutcome, SessionManager,
};
pub use registry::SessionRegistry;
