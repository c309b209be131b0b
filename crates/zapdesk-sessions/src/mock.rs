//! Scriptable adapter doubles.
//!
//! The real chat-client/browser-automation adapter lives outside this
//! repo; these mocks stand in for it in tests and local wiring. They
//! record every call, let tests inject lifecycle/message events by hand,
//! and can be scripted to fail or hang on connect and fail sends.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;
use zapdesk_core::{
    error::ZapdeskError,
    message::MessagePayload,
    traits::{AdapterEvent, AdapterFactory, ClientAdapter},
};

use async_trait::async_trait;

/// How a [`MockAdapter`] behaves when driven.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// `connect()` returns this error instead of succeeding.
    pub fail_connect: Option<String>,
    /// `connect()` never resolves (simulates a stuck browser launch).
    pub hang_connect: bool,
    /// `send_message()` returns this error instead of a message id.
    pub fail_send: Option<String>,
}

/// Test double for the underlying chat-client connection.
pub struct MockAdapter {
    session_id: String,
    behavior: MockBehavior,
    events: mpsc::Sender<AdapterEvent>,
    connect_calls: AtomicUsize,
    destroyed: AtomicBool,
    sent: Mutex<Vec<(String, String)>>,
}

impl MockAdapter {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// `(to, body)` pairs accepted by `send_message`.
    pub async fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    /// Inject one adapter event, as the real client library would emit it.
    /// Returns `false` once the manager side of the channel is gone.
    pub async fn emit(&self, event: AdapterEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Convenience: inject an inbound chat message event.
    pub async fn emit_inbound(&self, sender: &str, body: &str) -> bool {
        self.emit(AdapterEvent::Message(MessagePayload {
            id: Some(Uuid::new_v4().to_string()),
            chat: sender.to_string(),
            sender: sender.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
        }))
        .await
    }
}

#[async_trait]
impl ClientAdapter for MockAdapter {
    async fn connect(&self) -> Result<(), ZapdeskError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior.hang_connect {
            std::future::pending::<()>().await;
        }
        match &self.behavior.fail_connect {
            Some(reason) => Err(ZapdeskError::Adapter(reason.clone())),
            None => Ok(()),
        }
    }

    async fn destroy(&self) -> Result<(), ZapdeskError> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<String, ZapdeskError> {
        if let Some(reason) = &self.behavior.fail_send {
            return Err(ZapdeskError::Adapter(reason.clone()));
        }
        self.sent
            .lock()
            .await
            .push((to.to_string(), body.to_string()));
        Ok(Uuid::new_v4().to_string())
    }
}

/// Factory producing [`MockAdapter`]s and keeping handles to every one it
/// made, so tests can drive and inspect them after the fact.
#[derive(Default)]
pub struct MockAdapterFactory {
    behavior: std::sync::Mutex<MockBehavior>,
    created: std::sync::Mutex<Vec<Arc<MockAdapter>>>,
}

impl MockAdapterFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_behavior(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: std::sync::Mutex::new(behavior),
            created: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Change the behavior applied to adapters created from now on.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    /// The `index`-th adapter ever created (creation order).
    pub fn adapter(&self, index: usize) -> Option<Arc<MockAdapter>> {
        self.created.lock().unwrap().get(index).cloned()
    }

    /// The most recently created adapter.
    pub fn last_adapter(&self) -> Option<Arc<MockAdapter>> {
        self.created.lock().unwrap().last().cloned()
    }
}

impl AdapterFactory for MockAdapterFactory {
    fn create(
        &self,
        session_id: &str,
        events: mpsc::Sender<AdapterEvent>,
    ) -> Arc<dyn ClientAdapter> {
        let adapter = Arc::new(MockAdapter {
            session_id: session_id.to_string(),
            behavior: self.behavior.lock().unwrap().clone(),
            events,
            connect_calls: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        });
        self.created.lock().unwrap().push(adapter.clone());
        adapter
    }
}
