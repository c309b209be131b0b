//! The session registry — single source of truth for session records.
//!
//! All mutations go through [`SessionRegistry::compare_and_update`], which
//! only applies when the stored state still matches what the caller read.
//! A lost race surfaces as [`CasOutcome::Conflict`] so the caller can
//! re-read and re-decide (or drop the event entirely). Reads hand out
//! cloned snapshots, never live references.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use zapdesk_core::{
    session::{SessionSnapshot, SessionState},
    traits::ClientAdapter,
};

/// One session's live record. Only the registry and the manager's
/// compare-and-update closures ever see this; observers get snapshots.
pub struct SessionRecord {
    pub id: String,
    pub state: SessionState,
    pub qr_payload: Option<String>,
    pub last_error: Option<String>,
    /// Handle to the underlying connection — at most one per id, ever.
    pub adapter: Option<Arc<dyn ClientAdapter>>,
    /// Adapter generation. Bumped on every enable and teardown so events
    /// emitted by an abandoned adapter can be recognized and dropped.
    pub epoch: u64,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}

impl SessionRecord {
    fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            state: SessionState::Paused,
            qr_payload: None,
            last_error: None,
            adapter: None,
            epoch: 0,
            created_at: now,
            last_transition_at: now,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            state: self.state,
            qr_payload: self.qr_payload.clone(),
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            last_transition_at: self.last_transition_at,
        }
    }
}

/// Result of a compare-and-update attempt.
#[derive(Debug)]
pub enum CasOutcome {
    /// Mutation applied; carries the post-mutation snapshot.
    Updated(SessionSnapshot),
    /// Stored state no longer matches what the caller expected; nothing
    /// was changed. Carries the state actually found.
    Conflict(SessionState),
    /// No record under that id.
    NotFound,
}

/// Concurrency-safe store of session records keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one session, if present.
    pub async fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.inner.read().await.get(id).map(SessionRecord::snapshot)
    }

    /// Current adapter generation for a session, if present.
    pub async fn epoch(&self, id: &str) -> Option<u64> {
        self.inner.read().await.get(id).map(|r| r.epoch)
    }

    /// Clone of the adapter handle, for calls made outside the lock.
    pub async fn adapter(&self, id: &str) -> Option<Arc<dyn ClientAdapter>> {
        self.inner.read().await.get(id).and_then(|r| r.adapter.clone())
    }

    /// Get the record for `id`, creating a fresh `Paused` one if absent.
    pub async fn create_if_absent(&self, id: &str) -> SessionSnapshot {
        let mut map = self.inner.write().await;
        map.entry(id.to_string())
            .or_insert_with(|| SessionRecord::new(id))
            .snapshot()
    }

    /// Apply `mutate` to the record iff its state still equals `expected`.
    ///
    /// `last_transition_at` is stamped on every successful update. The
    /// closure runs under the write lock and must not block.
    pub async fn compare_and_update<F>(
        &self,
        id: &str,
        expected: SessionState,
        mutate: F,
    ) -> CasOutcome
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut map = self.inner.write().await;
        let Some(record) = map.get_mut(id) else {
            return CasOutcome::NotFound;
        };
        if record.state != expected {
            return CasOutcome::Conflict(record.state);
        }
        mutate(record);
        record.last_transition_at = Utc::now();
        CasOutcome::Updated(record.snapshot())
    }

    /// Like [`Self::compare_and_update`], but also requires the adapter
    /// generation to match. Used on the adapter-event path: an event from
    /// a superseded adapter must not land on a session that was disabled
    /// and re-enabled in between, even if the state happens to match.
    pub async fn compare_and_update_epoch<F>(
        &self,
        id: &str,
        expected: SessionState,
        expected_epoch: u64,
        mutate: F,
    ) -> CasOutcome
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut map = self.inner.write().await;
        let Some(record) = map.get_mut(id) else {
            return CasOutcome::NotFound;
        };
        if record.state != expected || record.epoch != expected_epoch {
            return CasOutcome::Conflict(record.state);
        }
        mutate(record);
        record.last_transition_at = Utc::now();
        CasOutcome::Updated(record.snapshot())
    }

    /// Remove a session record entirely.
    pub async fn remove(&self, id: &str) -> Option<SessionSnapshot> {
        self.inner
            .write()
            .await
            .remove(id)
            .map(|r| r.snapshot())
    }

    /// Consistent snapshots of every session, sorted by id for stable output.
    pub async fn list_all(&self) -> Vec<SessionSnapshot> {
        let map = self.inner.read().await;
        let mut all: Vec<SessionSnapshot> = map.values().map(SessionRecord::snapshot).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_if_absent_is_idempotent() {
        let registry = SessionRegistry::new();
        let first = registry.create_if_absent("sac1").await;
        assert_eq!(first.state, SessionState::Paused);

        // Second call returns the existing record, not a reset one.
        let created_at = first.created_at;
        let second = registry.create_if_absent("sac1").await;
        assert_eq!(second.created_at, created_at);
        assert_eq!(registry.list_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_update_applies_on_match() {
        let registry = SessionRegistry::new();
        registry.create_if_absent("sac1").await;

        let outcome = registry
            .compare_and_update("sac1", SessionState::Paused, |rec| {
                rec.state = SessionState::Starting;
                rec.epoch += 1;
            })
            .await;

        match outcome {
            CasOutcome::Updated(snap) => assert_eq!(snap.state, SessionState::Starting),
            other => panic!("expected Updated, got {other:?}"),
        }
        assert_eq!(registry.epoch("sac1").await, Some(1));
    }

    #[tokio::test]
    async fn test_compare_and_update_conflict_leaves_record_untouched() {
        let registry = SessionRegistry::new();
        registry.create_if_absent("sac1").await;

        let outcome = registry
            .compare_and_update("sac1", SessionState::Ready, |rec| {
                rec.state = SessionState::Disconnected;
                rec.last_error = Some("must not land".into());
            })
            .await;

        match outcome {
            CasOutcome::Conflict(found) => assert_eq!(found, SessionState::Paused),
            other => panic!("expected Conflict, got {other:?}"),
        }
        let snap = registry.get("sac1").await.unwrap();
        assert_eq!(snap.state, SessionState::Paused);
        assert_eq!(snap.last_error, None);
    }

    #[tokio::test]
    async fn test_compare_and_update_epoch_rejects_stale_generation() {
        let registry = SessionRegistry::new();
        registry.create_if_absent("sac1").await;
        registry
            .compare_and_update("sac1", SessionState::Paused, |rec| {
                rec.state = SessionState::Starting;
                rec.epoch = 2;
            })
            .await;

        // Same state, wrong generation: the update must not land.
        let outcome = registry
            .compare_and_update_epoch("sac1", SessionState::Starting, 1, |rec| {
                rec.state = SessionState::Ready;
            })
            .await;
        assert!(matches!(outcome, CasOutcome::Conflict(SessionState::Starting)));

        let outcome = registry
            .compare_and_update_epoch("sac1", SessionState::Starting, 2, |rec| {
                rec.state = SessionState::Ready;
            })
            .await;
        assert!(matches!(outcome, CasOutcome::Updated(_)));
    }

    #[tokio::test]
    async fn test_compare_and_update_not_found() {
        let registry = SessionRegistry::new();
        let outcome = registry
            .compare_and_update("ghost", SessionState::Paused, |_| {})
            .await;
        assert!(matches!(outcome, CasOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_snapshots_are_copies() {
        let registry = SessionRegistry::new();
        registry.create_if_absent("sac1").await;
        let mut snap = registry.get("sac1").await.unwrap();
        snap.state = SessionState::Ready;
        snap.qr_payload = Some("tampered".into());

        let fresh = registry.get("sac1").await.unwrap();
        assert_eq!(fresh.state, SessionState::Paused);
        assert_eq!(fresh.qr_payload, None);
    }

    #[tokio::test]
    async fn test_remove_and_list_all_sorted() {
        let registry = SessionRegistry::new();
        registry.create_if_absent("b").await;
        registry.create_if_absent("a").await;
        registry.create_if_absent("c").await;

        let removed = registry.remove("b").await;
        assert!(removed.is_some());
        assert!(registry.get("b").await.is_none());

        let ids: Vec<String> = registry.list_all().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
