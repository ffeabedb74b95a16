use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug)]
pub struct Session {
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(system_prompt: Option<&str>) -> Self {
        let now = Utc::now();
        let turns = match system_prompt {
            Some(p) => vec![Turn::system(p)],
            None => Vec::new(),
        };
        Self { turns, created_at: now, last_active: now }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

/// Bounds a turn sequence to `max` turns, never touching a leading system
/// turn. Relative order of the survivors is preserved; trimming the same
/// sequence twice with the same `max` is a no-op the second time.
pub fn trim_history(turns: &mut Vec<Turn>, max: usize) {
    if turns.is_empty() {
        return;
    }
    let start = if turns[0].role == Role::System { 1 } else { 0 };
    let rest = turns.len() - start;
    if rest > max {
        turns.drain(start..turns.len() - max);
    }
}

/// In-memory session map. Entries idle longer than the TTL are pruned
/// lazily whenever the store is touched; each session carries its own
/// mutex so concurrent requests for one session id are serialized.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())), ttl }
    }

    /// Returns the session for `id` when it exists, otherwise creates a
    /// fresh one seeded with `system_prompt`. The returned flag is `true`
    /// when a new session was created.
    pub async fn resolve(
        &self,
        id: Option<Uuid>,
        system_prompt: Option<&str>,
    ) -> (Uuid, Arc<Mutex<Session>>, bool) {
        self.prune_expired().await;

        if let Some(id) = id {
            let sessions = self.inner.read().await;
            if let Some(session) = sessions.get(&id) {
                return (id, session.clone(), false);
            }
        }

        let id = Uuid::new_v4();
        let session = Session::new(system_prompt);
        tracing::debug!(session_id = %id, created_at = %session.created_at, "created session");
        let session = Arc::new(Mutex::new(session));
        self.inner.write().await.insert(id, session.clone());
        (id, session, true)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    async fn prune_expired(&self) {
        let cutoff = Utc::now() - self.ttl;
        let mut sessions = self.inner.write().await;
        sessions.retain(|id, session| {
            // A locked session is mid-request, so it is live by definition.
            let Ok(guard) = session.try_lock() else { return true };
            let live = guard.last_active >= cutoff;
            if !live {
                tracing::debug!(session_id = %id, "evicted idle session");
            }
            live
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(roles: &[Role]) -> Vec<Turn> {
        roles
            .iter()
            .enumerate()
            .map(|(i, r)| Turn { role: *r, content: format!("t{i}") })
            .collect()
    }

    #[test]
    fn trim_bounds_length() {
        let mut turns = seq(&[Role::User; 30]);
        trim_history(&mut turns, 20);
        assert_eq!(turns.len(), 20);
    }

    #[test]
    fn trim_preserves_leading_system_turn() {
        let mut roles = vec![Role::System];
        roles.extend([Role::User, Role::Assistant].repeat(15));
        let mut turns = seq(&roles);
        let system = turns[0].clone();
        trim_history(&mut turns, 20);
        assert_eq!(turns.len(), 21);
        assert_eq!(turns[0], system);
        assert_eq!(turns.iter().filter(|t| t.role == Role::System).count(), 1);
    }

    #[test]
    fn trim_keeps_most_recent_turns_in_order() {
        let mut turns = seq(&[Role::User; 10]);
        trim_history(&mut turns, 3);
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["t7", "t8", "t9"]);
    }

    #[test]
    fn trim_is_idempotent() {
        let mut roles = vec![Role::System];
        roles.extend([Role::User].repeat(40));
        let mut turns = seq(&roles);
        trim_history(&mut turns, 20);
        let once = turns.clone();
        trim_history(&mut turns, 20);
        assert_eq!(turns, once);
    }

    #[test]
    fn trim_handles_empty_and_zero_max() {
        let mut empty: Vec<Turn> = Vec::new();
        trim_history(&mut empty, 20);
        assert!(empty.is_empty());

        let mut turns = seq(&[Role::System, Role::User, Role::User]);
        trim_history(&mut turns, 0);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::System);
    }

    #[test]
    fn trim_short_sequence_is_untouched() {
        let mut turns = seq(&[Role::User, Role::Assistant]);
        let before = turns.clone();
        trim_history(&mut turns, 20);
        assert_eq!(turns, before);
    }

    #[tokio::test]
    async fn resolve_creates_then_reuses() {
        let store = SessionStore::new(Duration::minutes(30));
        let (id, session, created) = store.resolve(None, Some("be nice")).await;
        assert!(created);
        assert_eq!(session.lock().await.turns[0].role, Role::System);

        let (id2, _, created2) = store.resolve(Some(id), None).await;
        assert!(!created2);
        assert_eq!(id, id2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_id_starts_a_fresh_session() {
        let store = SessionStore::new(Duration::minutes(30));
        let (_, _, created) = store.resolve(Some(Uuid::new_v4()), None).await;
        assert!(created);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn idle_sessions_are_pruned() {
        let store = SessionStore::new(Duration::minutes(30));
        let (stale_id, session, _) = store.resolve(None, None).await;
        session.lock().await.last_active = Utc::now() - Duration::hours(2);

        let _ = store.resolve(None, None).await;
        assert_eq!(store.len().await, 1);

        let (_, _, created) = store.resolve(Some(stale_id), None).await;
        assert!(created, "stale session id should no longer resolve");
    }
}
