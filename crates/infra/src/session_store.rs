//! Client session store: opaque token → anonymous snapshot or association.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stockcart_cart::{AnonymousCartSnapshot, ClientAssociation, ClientToken};

/// Key/value store for per-client session state.
///
/// `compare_and_set_association` is the only primitive the engines rely on for
/// exactly-once materialization: of two racing requests, only one swaps the
/// association it observed.
pub trait SessionStore: Send + Sync {
    fn snapshot(&self, token: &ClientToken) -> Option<AnonymousCartSnapshot>;
    fn put_snapshot(&self, token: &ClientToken, snapshot: AnonymousCartSnapshot);
    fn remove_snapshot(&self, token: &ClientToken);

    fn association(&self, token: &ClientToken) -> Option<ClientAssociation>;
    /// Replace the association if it still equals `expected`. Returns whether
    /// the swap happened.
    fn compare_and_set_association(
        &self,
        token: &ClientToken,
        expected: Option<ClientAssociation>,
        new: Option<ClientAssociation>,
    ) -> bool;
}

impl<S> SessionStore for Arc<S>
where
    S: SessionStore + ?Sized,
{
    fn snapshot(&self, token: &ClientToken) -> Option<AnonymousCartSnapshot> {
        (**self).snapshot(token)
    }

    fn put_snapshot(&self, token: &ClientToken, snapshot: AnonymousCartSnapshot) {
        (**self).put_snapshot(token, snapshot)
    }

    fn remove_snapshot(&self, token: &ClientToken) {
        (**self).remove_snapshot(token)
    }

    fn association(&self, token: &ClientToken) -> Option<ClientAssociation> {
        (**self).association(token)
    }

    fn compare_and_set_association(
        &self,
        token: &ClientToken,
        expected: Option<ClientAssociation>,
        new: Option<ClientAssociation>,
    ) -> bool {
        (**self).compare_and_set_association(token, expected, new)
    }
}

#[derive(Debug, Default)]
struct Sessions {
    snapshots: HashMap<ClientToken, AnonymousCartSnapshot>,
    associations: HashMap<ClientToken, ClientAssociation>,
}

/// In-memory session store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: RwLock<Sessions>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn snapshot(&self, token: &ClientToken) -> Option<AnonymousCartSnapshot> {
        let sessions = self.inner.read().ok()?;
        sessions.snapshots.get(token).cloned()
    }

    fn put_snapshot(&self, token: &ClientToken, snapshot: AnonymousCartSnapshot) {
        if let Ok(mut sessions) = self.inner.write() {
            sessions.snapshots.insert(token.clone(), snapshot);
        }
    }

    fn remove_snapshot(&self, token: &ClientToken) {
        if let Ok(mut sessions) = self.inner.write() {
            sessions.snapshots.remove(token);
        }
    }

    fn association(&self, token: &ClientToken) -> Option<ClientAssociation> {
        let sessions = self.inner.read().ok()?;
        sessions.associations.get(token).copied()
    }

    fn compare_and_set_association(
        &self,
        token: &ClientToken,
        expected: Option<ClientAssociation>,
        new: Option<ClientAssociation>,
    ) -> bool {
        let Ok(mut sessions) = self.inner.write() else {
            return false;
        };
        if sessions.associations.get(token).copied() != expected {
            return false;
        }
        match new {
            Some(association) => {
                sessions.associations.insert(token.clone(), association);
            }
            None => {
                sessions.associations.remove(token);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockcart_core::{CartId, CustomerId};

    #[test]
    fn only_the_first_swap_from_empty_wins() {
        let store = InMemorySessionStore::new();
        let token = ClientToken::new("t-1").unwrap();
        let a = ClientAssociation {
            customer_id: CustomerId::new(),
            cart_id: Some(CartId::new()),
        };
        let b = ClientAssociation {
            customer_id: CustomerId::new(),
            cart_id: Some(CartId::new()),
        };

        assert!(store.compare_and_set_association(&token, None, Some(a)));
        assert!(!store.compare_and_set_association(&token, None, Some(b)));
        assert_eq!(store.association(&token), Some(a));

        let cleared = ClientAssociation { cart_id: None, ..a };
        assert!(store.compare_and_set_association(&token, Some(a), Some(cleared)));
        assert_eq!(store.association(&token).unwrap().cart_id, None);
    }
}
