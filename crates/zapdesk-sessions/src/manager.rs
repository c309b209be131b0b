//! Session lifecycle orchestration.
//!
//! One manager instance owns every session: it constructs adapters via the
//! injected factory, funnels their async callbacks through the pure state
//! machine into the registry, and publishes every accepted change to the
//! broadcaster.
//!
//! Concurrency discipline: each public operation takes a per-session-id
//! mutex held only around the registry read/compare-and-update decision.
//! Adapter calls (`connect`, `destroy`, `send_message`) always run outside
//! any lock — a slow browser launch on one session can never stall another
//! session's operations or the event-relay path.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zapdesk_core::{
    config::SessionsConfig,
    message::BroadcastEvent,
    session::{SessionSnapshot, SessionState},
    traits::{AdapterEvent, AdapterFactory, ClientAdapter},
};

use crate::broadcast::EventBroadcaster;
use crate::machine::{self, SessionEvent, SideEffect, Transition};
use crate::registry::{CasOutcome, SessionRecord, SessionRegistry};

/// Result of an `enable` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    Accepted,
    /// The session is already starting or live; nothing was done.
    AlreadyEnabled,
}

/// Result of a `disable` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableOutcome {
    Accepted,
    /// Unknown id, or already paused.
    NotEnabled,
}

/// Result of a `regenerate_qr` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerateQrOutcome {
    Accepted,
    /// A connected (or about-to-connect) session does not need a new QR.
    NotApplicable,
}

/// Result of a `send_message` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { message_id: String },
    /// Session is not `Ready`; no delivery was attempted.
    NotReady,
    /// The adapter failed the send. Session state is unchanged — only a
    /// `disconnected`/`auth_failure` event demotes a session.
    AdapterError(String),
}

/// Orchestrates enable/disable/QR-regeneration/send across all sessions.
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    broadcaster: Arc<EventBroadcaster>,
    factory: Arc<dyn AdapterFactory>,
    config: SessionsConfig,
    /// Per-session operation locks; held only for registry decisions.
    op_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn AdapterFactory>, config: SessionsConfig) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = Arc::new(EventBroadcaster::new(registry.clone(), config.clone()));
        Arc::new(Self {
            registry,
            broadcaster,
            factory,
            config,
            op_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    /// Snapshot of one session.
    pub async fn status(&self, id: &str) -> Option<SessionSnapshot> {
        self.registry.get(id).await
    }

    /// Snapshots of all sessions.
    pub async fn status_all(&self) -> Vec<SessionSnapshot> {
        self.registry.list_all().await
    }

    /// Open a push channel; primed with a snapshot of every session.
    pub async fn subscribe(&self) -> (Uuid, mpsc::Receiver<BroadcastEvent>) {
        self.broadcaster.subscribe().await
    }

    pub async fn unsubscribe(&self, subscription_id: Uuid) {
        self.broadcaster.unsubscribe(subscription_id).await;
    }

    /// Bring a session up. Idempotent: a session that is already starting
    /// or live is left alone.
    pub async fn enable(self: &Arc<Self>, id: &str) -> EnableOutcome {
        let lock = self.op_lock(id).await;
        let _guard = lock.lock().await;
        self.enable_locked(id).await
    }

    /// Tear a session down. Always wins: works from every non-paused
    /// state, including a `Starting` session whose connect never resolves.
    pub async fn disable(self: &Arc<Self>, id: &str) -> DisableOutcome {
        let lock = self.op_lock(id).await;
        let _guard = lock.lock().await;
        self.disable_locked(id).await
    }

    /// Force a fresh pairing QR.
    ///
    /// Valid while pairing is pending (the current client is torn down and
    /// a fresh one started, which mints a new QR) and from
    /// `Disconnected`/`Error` (an implicit re-enable). A session that is
    /// `Ready`/`Authenticated` does not need a QR.
    pub async fn regenerate_qr(self: &Arc<Self>, id: &str) -> RegenerateQrOutcome {
        let lock = self.op_lock(id).await;
        let _guard = lock.lock().await;

        let Some(snapshot) = self.registry.get(id).await else {
            return RegenerateQrOutcome::NotApplicable;
        };
        match snapshot.state {
            SessionState::Ready | SessionState::Authenticated | SessionState::Paused => {
                RegenerateQrOutcome::NotApplicable
            }
            SessionState::Starting if self.registry.adapter(id).await.is_some() => {
                // Connect is in flight; the first QR is on its way already.
                RegenerateQrOutcome::NotApplicable
            }
            SessionState::QrPending | SessionState::Starting => {
                self.disable_locked(id).await;
                self.enable_locked(id).await;
                info!("session {id}: restarting client for a fresh QR");
                RegenerateQrOutcome::Accepted
            }
            SessionState::Disconnected | SessionState::Error => {
                self.enable_locked(id).await;
                RegenerateQrOutcome::Accepted
            }
        }
    }

    /// Deliver one message through a `Ready` session.
    ///
    /// `to` and `body` are passed to the adapter unmodified; phone-number
    /// normalization belongs to the caller.
    pub async fn send_message(&self, id: &str, to: &str, body: &str) -> SendOutcome {
        let Some(snapshot) = self.registry.get(id).await else {
            return SendOutcome::NotReady;
        };
        if snapshot.state != SessionState::Ready {
            debug!("send on {id} refused: state is {}", snapshot.state);
            return SendOutcome::NotReady;
        }
        let Some(adapter) = self.registry.adapter(id).await else {
            return SendOutcome::NotReady;
        };

        // Adapter call happens outside every lock.
        match adapter.send_message(to, body).await {
            Ok(message_id) => SendOutcome::Sent { message_id },
            Err(e) => {
                warn!("session {id}: send to {to} failed: {e}");
                SendOutcome::AdapterError(e.to_string())
            }
        }
    }

    async fn op_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.op_locks
            .lock()
            .await
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn enable_locked(self: &Arc<Self>, id: &str) -> EnableOutcome {
        // Bounded retry: a late adapter event can slip in between the read
        // and the compare-and-update.
        for _ in 0..4 {
            let snapshot = self.registry.create_if_absent(id).await;
            if snapshot.state.is_enabled() {
                debug!("enable {id}: already {}", snapshot.state);
                return EnableOutcome::AlreadyEnabled;
            }
            let Transition::Accepted { next, effects } =
                machine::transition(snapshot.state, &SessionEvent::EnableRequested)
            else {
                return EnableOutcome::AlreadyEnabled;
            };

            // Build the adapter up front so storing the handle is part of
            // the same atomic update that moves the session to Starting.
            let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer);
            let adapter = self.factory.create(id, events_tx.clone());

            let was_paused = snapshot.state == SessionState::Paused;
            let mut new_epoch = 0;
            let outcome = self
                .registry
                .compare_and_update(id, snapshot.state, |rec| {
                    rec.state = next;
                    apply_effects(rec, &effects);
                    rec.adapter = Some(adapter.clone());
                    rec.epoch += 1;
                    new_epoch = rec.epoch;
                    if was_paused {
                        // Re-enabling after a disable starts a logically
                        // new session record.
                        rec.created_at = Utc::now();
                    }
                })
                .await;

            let updated = match outcome {
                CasOutcome::Updated(snap) => snap,
                CasOutcome::Conflict(_) | CasOutcome::NotFound => {
                    self.spawn_destroy(id, adapter);
                    continue;
                }
            };

            self.spawn_event_pump(id, new_epoch, events_rx);
            self.spawn_connect(id, adapter, events_tx);
            self.spawn_init_watchdog(id, new_epoch);
            self.publish_state_change(updated).await;
            info!("session {id} enabled (epoch {new_epoch})");
            return EnableOutcome::Accepted;
        }
        warn!("enable {id}: lost the registry race repeatedly, leaving as-is");
        EnableOutcome::AlreadyEnabled
    }

    async fn disable_locked(self: &Arc<Self>, id: &str) -> DisableOutcome {
        // Disable always wins: on conflict, re-read and try again until the
        // teardown lands or the session is already paused.
        loop {
            let Some(snapshot) = self.registry.get(id).await else {
                return DisableOutcome::NotEnabled;
            };
            let Transition::Accepted { next, effects } =
                machine::transition(snapshot.state, &SessionEvent::DisableRequested)
            else {
                return DisableOutcome::NotEnabled;
            };

            let mut torn: Option<Arc<dyn ClientAdapter>> = None;
            match self
                .registry
                .compare_and_update(id, snapshot.state, |rec| {
                    rec.state = next;
                    apply_effects(rec, &effects);
                    torn = rec.adapter.take();
                    // Cut the old adapter's event stream off.
                    rec.epoch += 1;
                })
                .await
            {
                CasOutcome::Updated(snap) => {
                    if let Some(adapter) = torn {
                        self.spawn_destroy(id, adapter);
                    }
                    self.publish_state_change(snap).await;
                    info!("session {id} disabled");
                    return DisableOutcome::Accepted;
                }
                CasOutcome::Conflict(found) => {
                    debug!("disable {id}: raced with a transition to {found}, retrying");
                }
                CasOutcome::NotFound => return DisableOutcome::NotEnabled,
            }
        }
    }

    /// The sole funnel from adapter callbacks into the state machine.
    ///
    /// `epoch` identifies the adapter generation that emitted the event;
    /// anything from a superseded generation is dropped before it can
    /// touch the registry.
    async fn on_adapter_event(self: &Arc<Self>, id: &str, epoch: u64, event: AdapterEvent) {
        match event {
            AdapterEvent::Message(message) => {
                if self.registry.epoch(id).await != Some(epoch) {
                    debug!("session {id}: dropping inbound message from stale adapter");
                    return;
                }
                self.broadcaster
                    .publish(BroadcastEvent::MessageIn {
                        session_id: id.to_string(),
                        message,
                    })
                    .await;
            }
            AdapterEvent::MessageSent(message) => {
                if self.registry.epoch(id).await != Some(epoch) {
                    debug!("session {id}: dropping sent-message echo from stale adapter");
                    return;
                }
                self.broadcaster
                    .publish(BroadcastEvent::MessageOut {
                        session_id: id.to_string(),
                        message,
                    })
                    .await;
            }
            AdapterEvent::LoadingProgress { percent, message } => {
                debug!("session {id}: loading {percent}% — {message}");
            }
            AdapterEvent::Qr(payload) => {
                self.apply_session_event(id, epoch, SessionEvent::QrReceived(payload))
                    .await;
            }
            AdapterEvent::Authenticated => {
                self.apply_session_event(id, epoch, SessionEvent::Authenticated)
                    .await;
            }
            AdapterEvent::Ready => {
                self.apply_session_event(id, epoch, SessionEvent::Ready).await;
            }
            AdapterEvent::AuthFailure(reason) => {
                self.apply_session_event(id, epoch, SessionEvent::AuthFailure(reason))
                    .await;
            }
            AdapterEvent::Disconnected(reason) => {
                self.apply_session_event(id, epoch, SessionEvent::Disconnected(reason))
                    .await;
            }
            AdapterEvent::Error(reason) => {
                self.apply_session_event(id, epoch, SessionEvent::Error(reason))
                    .await;
            }
        }
    }

    /// Run one event through the machine and commit the result.
    ///
    /// Rejections and lost races are logged and swallowed — both are
    /// expected under duplicate callbacks and concurrent disables.
    async fn apply_session_event(self: &Arc<Self>, id: &str, epoch: u64, event: SessionEvent) {
        let Some(snapshot) = self.registry.get(id).await else {
            debug!("session {id}: event {} for unknown session", event.name());
            return;
        };
        if self.registry.epoch(id).await != Some(epoch) {
            debug!("session {id}: dropping stale {} event", event.name());
            return;
        }

        let (next, effects) = match machine::transition(snapshot.state, &event) {
            Transition::Accepted { next, effects } => (next, effects),
            Transition::Rejected => {
                debug!(
                    "session {id}: invalid transition {} + {}, ignoring",
                    snapshot.state,
                    event.name()
                );
                return;
            }
        };

        let teardown = effects
            .iter()
            .any(|e| matches!(e, SideEffect::ScheduleTeardown));
        let mut torn: Option<Arc<dyn ClientAdapter>> = None;
        let outcome = self
            .registry
            .compare_and_update_epoch(id, snapshot.state, epoch, |rec| {
                rec.state = next;
                apply_effects(rec, &effects);
                if teardown {
                    torn = rec.adapter.take();
                    rec.epoch += 1;
                }
            })
            .await;

        match outcome {
            CasOutcome::Updated(snap) => {
                if let Some(adapter) = torn {
                    self.spawn_destroy(id, adapter);
                }
                info!(
                    "session {id}: {} -> {} ({})",
                    snapshot.state,
                    next,
                    event.name()
                );
                self.publish_state_change(snap).await;
            }
            CasOutcome::Conflict(found) => {
                // A concurrent disable (or re-enable) raced ahead; the
                // session is no longer the one this event was meant for.
                debug!(
                    "session {id}: {} superseded (state now {found}), dropping",
                    event.name()
                );
            }
            CasOutcome::NotFound => {
                debug!("session {id}: removed mid-event, dropping {}", event.name());
            }
        }
    }

    /// Forward one adapter generation's events into the manager.
    fn spawn_event_pump(
        self: &Arc<Self>,
        id: &str,
        epoch: u64,
        mut events_rx: mpsc::Receiver<AdapterEvent>,
    ) {
        let manager = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                manager.on_adapter_event(&id, epoch, event).await;
            }
            debug!("session {id}: adapter event channel closed (epoch {epoch})");
        });
    }

    /// Drive `connect()` with retry and exponential backoff; exhaustion
    /// surfaces as an `error` event through the ordinary funnel.
    fn spawn_connect(
        self: &Arc<Self>,
        id: &str,
        adapter: Arc<dyn ClientAdapter>,
        events_tx: mpsc::Sender<AdapterEvent>,
    ) {
        let id = id.to_string();
        let retries = self.config.connect_retries.max(1);
        let mut delay = Duration::from_millis(self.config.connect_retry_base_ms);
        tokio::spawn(async move {
            for attempt in 1..=retries {
                match adapter.connect().await {
                    Ok(()) => return,
                    Err(e) => {
                        warn!("session {id}: connect attempt {attempt}/{retries} failed: {e}");
                        if attempt == retries {
                            let _ = events_tx
                                .send(AdapterEvent::Error(format!(
                                    "connect failed after {retries} attempts: {e}"
                                )))
                                .await;
                            return;
                        }
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        });
    }

    /// Force `Error` if the session is still `Starting` on the same
    /// adapter generation once the init timeout elapses. Keeps a stuck
    /// browser launch from pending forever.
    fn spawn_init_watchdog(self: &Arc<Self>, id: &str, epoch: u64) {
        let manager = self.clone();
        let id = id.to_string();
        let timeout = self.config.init_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager
                .apply_session_event(&id, epoch, SessionEvent::InitTimeout)
                .await;
        });
    }

    /// Best-effort adapter teardown, outside all locks. A failure is
    /// logged; the registry already reflects the session as torn down.
    fn spawn_destroy(&self, id: &str, adapter: Arc<dyn ClientAdapter>) {
        let id = id.to_string();
        let timeout = self.config.destroy_timeout();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, adapter.destroy()).await {
                Ok(Ok(())) => debug!("session {id}: adapter destroyed"),
                Ok(Err(e)) => warn!("session {id}: adapter destroy failed: {e}"),
                Err(_) => warn!("session {id}: adapter destroy timed out"),
            }
        });
    }

    async fn publish_state_change(&self, snapshot: SessionSnapshot) {
        self.broadcaster
            .publish(BroadcastEvent::StateChange {
                session_id: snapshot.id.clone(),
                snapshot,
            })
            .await;
    }
}

/// Apply the machine's field mutations to a registry record.
/// `ScheduleTeardown` is executed by the caller, not here.
fn apply_effects(rec: &mut SessionRecord, effects: &[SideEffect]) {
    for effect in effects {
        match effect {
            SideEffect::SetQr(payload) => rec.qr_payload = Some(payload.clone()),
            SideEffect::ClearQr => rec.qr_payload = None,
            SideEffect::SetLastError(reason) => rec.last_error = Some(reason.clone()),
            SideEffect::ClearLastError => rec.last_error = None,
            SideEffect::ScheduleTeardown => {}
        }
    }
}
