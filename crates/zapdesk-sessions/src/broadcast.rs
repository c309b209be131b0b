//! Event fan-out to push-channel subscribers.
//!
//! Every accepted state transition and every relayed chat message is
//! delivered to all live subscribers. A subscriber that errors or fails to
//! accept an event within the configured timeout is pruned; its failure is
//! never visible to the publishing side.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zapdesk_core::{config::SessionsConfig, message::BroadcastEvent};

use crate::registry::SessionRegistry;

struct Subscriber {
    tx: mpsc::Sender<BroadcastEvent>,
    connected_at: DateTime<Utc>,
}

/// Fans registry-change and message events out to all subscribers.
pub struct EventBroadcaster {
    registry: Arc<SessionRegistry>,
    subscribers: Mutex<HashMap<Uuid, Subscriber>>,
    config: SessionsConfig,
}

impl EventBroadcaster {
    pub fn new(registry: Arc<SessionRegistry>, config: SessionsConfig) -> Self {
        Self {
            registry,
            subscribers: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Register a new push channel.
    ///
    /// The receiver is primed with a `state_change` snapshot for every
    /// known session, so a freshly connected dashboard starts from the
    /// full current picture rather than an empty one.
    pub async fn subscribe(&self) -> (Uuid, mpsc::Receiver<BroadcastEvent>) {
        let (tx, rx) = mpsc::channel::<BroadcastEvent>(self.config.subscriber_buffer);

        for snapshot in self.registry.list_all().await {
            let event = BroadcastEvent::StateChange {
                session_id: snapshot.id.clone(),
                snapshot,
            };
            // The channel is fresh; a failure here means the caller already
            // dropped the receiver.
            if tx.send(event).await.is_err() {
                break;
            }
        }

        let id = Uuid::new_v4();
        self.subscribers.lock().await.insert(
            id,
            Subscriber {
                tx,
                connected_at: Utc::now(),
            },
        );
        info!("observer {id} subscribed");
        (id, rx)
    }

    /// Explicitly remove a subscriber (channel closed by the caller).
    pub async fn unsubscribe(&self, id: Uuid) {
        if self.subscribers.lock().await.remove(&id).is_some() {
            info!("observer {id} unsubscribed");
        }
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Since when a subscriber has been connected, if it is still live.
    pub async fn connected_at(&self, id: Uuid) -> Option<DateTime<Utc>> {
        self.subscribers.lock().await.get(&id).map(|s| s.connected_at)
    }

    /// Deliver `event` to every live subscriber.
    ///
    /// Senders are cloned out of the lock first, so one stuck observer can
    /// only cost its own `broadcast_timeout` — it never blocks the map or
    /// delivery to its peers. Failed or timed-out subscribers are pruned.
    pub async fn publish(&self, event: BroadcastEvent) {
        let targets: Vec<(Uuid, mpsc::Sender<BroadcastEvent>)> = {
            let subs = self.subscribers.lock().await;
            subs.iter().map(|(id, s)| (*id, s.tx.clone())).collect()
        };

        if targets.is_empty() {
            return;
        }
        debug!(
            "broadcasting {} for session {} to {} observer(s)",
            event_kind(&event),
            event.session_id(),
            targets.len()
        );

        let mut stale: Vec<Uuid> = Vec::new();
        for (id, tx) in targets {
            match tx
                .send_timeout(event.clone(), self.config.broadcast_timeout())
                .await
            {
                Ok(()) => {}
                Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                    warn!("observer {id} did not accept event within timeout, pruning");
                    stale.push(id);
                }
                Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                    debug!("observer {id} channel closed, pruning");
                    stale.push(id);
                }
            }
        }

        if !stale.is_empty() {
            let mut subs = self.subscribers.lock().await;
            for id in stale {
                subs.remove(&id);
            }
        }
    }
}

fn event_kind(event: &BroadcastEvent) -> &'static str {
    match event {
        BroadcastEvent::StateChange { .. } => "state_change",
        BroadcastEvent::MessageIn { .. } => "message_in",
        BroadcastEvent::MessageOut { .. } => "message_out",
    }
}
