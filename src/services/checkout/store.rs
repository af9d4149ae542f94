use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use super::session::CheckoutSession;
use crate::errors::ServiceError;

/// Sessions idle for longer than this are dropped by default.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A change applied to a stored session under the store's lock.
pub type SessionChange<'a> =
    Box<dyn FnOnce(&mut CheckoutSession) -> Result<(), ServiceError> + Send + 'a>;

/// Load/save boundary for checkout sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: Uuid) -> Result<Option<CheckoutSession>, ServiceError>;
    async fn save(&self, session: &CheckoutSession) -> Result<(), ServiceError>;
    /// Forgets a session. Returns whether it existed.
    async fn discard(&self, id: Uuid) -> Result<bool, ServiceError>;
    /// Loads, changes and saves a session with no other update in between.
    /// Nothing is saved when `change` fails.
    async fn update(
        &self,
        id: Uuid,
        change: SessionChange<'_>,
    ) -> Result<CheckoutSession, ServiceError>;
    /// Drops sessions that outlived their time to live. Returns how many went.
    async fn sweep_expired(&self) -> Result<usize, ServiceError>;
}

#[derive(Debug)]
struct StoredSession {
    document: String,
    touched_at: Instant,
}

/// Keeps sessions as JSON documents in memory.
#[derive(Debug)]
pub struct InMemorySessionStore {
    sessions: DashMap<Uuid, StoredSession>,
    ttl: Duration,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn is_expired(&self, stored: &StoredSession) -> bool {
        stored.touched_at.elapsed() >= self.ttl
    }

    fn not_found(id: Uuid) -> ServiceError {
        ServiceError::NotFound(format!("Checkout session {id} not found"))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: Uuid) -> Result<Option<CheckoutSession>, ServiceError> {
        let document = match self.sessions.get(&id) {
            Some(entry) if !self.is_expired(&entry) => entry.document.clone(),
            _ => return Ok(None),
        };
        Ok(Some(serde_json::from_str(&document)?))
    }

    async fn save(&self, session: &CheckoutSession) -> Result<(), ServiceError> {
        let document = serde_json::to_string(session)?;
        self.sessions.insert(
            session.id,
            StoredSession {
                document,
                touched_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn discard(&self, id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.sessions.remove(&id).is_some())
    }

    async fn update(
        &self,
        id: Uuid,
        change: SessionChange<'_>,
    ) -> Result<CheckoutSession, ServiceError> {
        // The entry guard holds the shard lock until the new document is written
        let mut entry = match self.sessions.get_mut(&id) {
            Some(entry) if !self.is_expired(&entry) => entry,
            _ => return Err(Self::not_found(id)),
        };
        let mut session: CheckoutSession = serde_json::from_str(&entry.document)?;
        change(&mut session)?;
        entry.document = serde_json::to_string(&session)?;
        entry.touched_at = Instant::now();
        Ok(session)
    }

    async fn sweep_expired(&self) -> Result<usize, ServiceError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, stored| !self.is_expired(stored));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(removed, "Expired checkout sessions dropped");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cart::{CartLine, VariantSelection};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn session_with_cap() -> CheckoutSession {
        let mut session = CheckoutSession::new();
        session
            .add_line(CartLine {
                product_id: "gorra-01".into(),
                name: "Gorra".into(),
                image: None,
                variant: VariantSelection::default(),
                unit_price: dec!(35000),
                quantity: 1,
            })
            .unwrap();
        session
    }

    #[tokio::test]
    async fn saved_sessions_load_back() {
        let store = InMemorySessionStore::new();
        let session = session_with_cap();

        store.save(&session).await.unwrap();
        let loaded = store.load(session.id).await.unwrap().unwrap();
        assert_eq!(loaded, session);

        assert!(store.discard(session.id).await.unwrap());
        assert!(store.load(session.id).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    fn to_shipping() -> SessionChange<'static> {
        Box::new(|session: &mut CheckoutSession| session.proceed_to_shipping())
    }

    #[tokio::test]
    async fn update_saves_only_successful_changes() {
        let store = InMemorySessionStore::new();
        let session = session_with_cap();
        store.save(&session).await.unwrap();

        let updated = store.update(session.id, to_shipping()).await.unwrap();
        assert_eq!(updated.step().name(), "shipping_form");

        let rejected = store.update(session.id, to_shipping()).await;
        assert_matches!(rejected, Err(ServiceError::InvalidOperation(_)));

        let stored = store.load(session.id).await.unwrap().unwrap();
        assert_eq!(stored.step().name(), "shipping_form");

        let missing = store
            .update(Uuid::new_v4(), Box::new(|_: &mut CheckoutSession| Ok(())))
            .await;
        assert_matches!(missing, Err(ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn idle_sessions_expire_and_are_swept() {
        let store = InMemorySessionStore::with_ttl(Duration::ZERO);
        let session = session_with_cap();
        store.save(&session).await.unwrap();

        assert!(store.load(session.id).await.unwrap().is_none());
        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert!(store.is_empty());

        let store = InMemorySessionStore::with_ttl(Duration::from_secs(3600));
        store.save(&session).await.unwrap();
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }
}
