use crate::{error::ZapdeskError, message::MessagePayload};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Asynchronous lifecycle and message callbacks emitted by a [`ClientAdapter`].
///
/// Adapters push these into the `mpsc::Sender` handed to
/// [`AdapterFactory::create`], at least once each, in emission order, until
/// `destroy()` is called.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// A (possibly rotated) pairing QR payload.
    Qr(String),
    /// The pairing scan was accepted.
    Authenticated,
    /// The connection is fully established.
    Ready,
    /// Authentication failed.
    AuthFailure(String),
    /// The connection dropped after being established.
    Disconnected(String),
    /// Inbound chat message.
    Message(MessagePayload),
    /// Outbound message confirmed delivered to the network.
    MessageSent(MessagePayload),
    /// Startup progress from the underlying client, for logs only.
    LoadingProgress { percent: u8, message: String },
    /// Any other unrecoverable adapter failure.
    Error(String),
}

/// Boundary to the underlying chat-client / browser-automation library.
///
/// The real implementation lives outside this repo; everything here treats
/// the adapter as an opaque, slow, failure-prone collaborator. All three
/// operations may involve launching a headless browser or network
/// round-trips and must never be called while holding a registry lock.
#[async_trait]
pub trait ClientAdapter: Send + Sync {
    /// Begin connecting. Completion is observed through [`AdapterEvent`]s,
    /// not through this future — an `Ok` return only means the attempt
    /// started cleanly.
    async fn connect(&self) -> Result<(), ZapdeskError>;

    /// Tear down the connection and release underlying resources
    /// (browser process, sockets). Idempotent.
    async fn destroy(&self) -> Result<(), ZapdeskError>;

    /// Deliver one message; returns the platform message id.
    async fn send_message(&self, to: &str, body: &str) -> Result<String, ZapdeskError>;
}

/// Constructs one [`ClientAdapter`] per enabled session.
///
/// The factory wires the returned adapter to `events` so its callbacks
/// reach the session manager; a fresh channel is used per enable, which is
/// what lets stale adapters be cut off after a disable.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, session_id: &str, events: mpsc::Sender<AdapterEvent>)
        -> Arc<dyn ClientAdapter>;
}
