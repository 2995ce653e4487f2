//! The server-side callback registry.
//!
//! Every live subscription is recorded here so it can be removed three
//! ways: individually (unsubscribe), in bulk by session (disconnect), or
//! in bulk by target name (object deletion). Callback ids are allocated
//! client-side and are only unique per session, so entries are keyed by
//! the (session, callback id) pair.

use colonnade_engine::SubToken;
use dashmap::DashMap;
use uuid::Uuid;

/// Which engine hook a registration is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// `on_update` on a view.
    Update,
    /// `on_delete` on a table or view.
    Delete,
}

/// One live subscription.
#[derive(Debug, Clone)]
pub struct CallbackRegistration {
    /// Client-chosen correlation id, unique within its session.
    pub callback_id: u32,
    /// The session that registered it.
    pub session_id: Uuid,
    /// The table or view it is attached to.
    pub target_name: String,
    /// The subscribing request's id, reused by every push.
    pub request_id: i64,
    /// Which hook it is attached to.
    pub kind: CallbackKind,
    /// Engine token for detaching the bridging closure.
    pub token: SubToken,
}

/// Registry of live subscriptions.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: DashMap<(Uuid, u32), CallbackRegistration>,
}

impl CallbackRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription.
    pub fn insert(&self, registration: CallbackRegistration) {
        self.entries.insert(
            (registration.session_id, registration.callback_id),
            registration,
        );
    }

    /// Remove one session's subscription by callback id.
    pub fn remove(&self, session_id: Uuid, callback_id: u32) -> Option<CallbackRegistration> {
        self.entries
            .remove(&(session_id, callback_id))
            .map(|(_, reg)| reg)
    }

    /// Remove every subscription owned by a session.
    pub fn remove_by_session(&self, session_id: Uuid) -> Vec<CallbackRegistration> {
        self.drain_matching(|reg| reg.session_id == session_id)
    }

    /// Remove every subscription attached to a target.
    pub fn remove_by_target(&self, target_name: &str) -> Vec<CallbackRegistration> {
        self.drain_matching(|reg| reg.target_name == target_name)
    }

    fn drain_matching(
        &self,
        predicate: impl Fn(&CallbackRegistration) -> bool,
    ) -> Vec<CallbackRegistration> {
        let keys: Vec<(Uuid, u32)> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| *entry.key())
            .collect();
        keys.into_iter()
            .filter_map(|(session_id, callback_id)| self.remove(session_id, callback_id))
            .collect()
    }

    /// Whether a session's callback id is currently registered.
    #[must_use]
    pub fn contains(&self, session_id: Uuid, callback_id: u32) -> bool {
        self.entries.contains_key(&(session_id, callback_id))
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no live subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
