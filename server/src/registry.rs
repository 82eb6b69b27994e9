//! Session registry: the authoritative record of who is in the game
//!
//! Maps transport connection ids to bound player identities, including:
//! - Identity binding on successful login (first login wins)
//! - Identity lookup for message ownership checks
//! - Unbinding on disconnect
//! - Active-roster snapshots for join/leave broadcasts and late-joiner sync
//!
//! The registry is the single source of truth for "who is currently in the
//! game"; a connection without an entry here is connected but not yet active.

use log::info;
use shared::ConnId;
use std::collections::HashMap;
use thiserror::Error;

/// A player identity bound to a live connection
///
/// The id is the connection's transport id, assigned by the server and never
/// taken from the client. The name is fixed for the lifetime of the binding.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerIdentity {
    pub id: ConnId,
    pub name: String,
}

/// Returned by [`SessionRegistry::bind`] when the connection already has an
/// identity; the existing binding is left untouched.
#[derive(Debug, Error, PartialEq)]
#[error("connection {conn} is already bound to \"{name}\"")]
pub struct AlreadyBound {
    pub conn: ConnId,
    pub name: String,
}

/// Tracks the identity bound to each active connection
///
/// The registry enforces the one-identity-per-connection rule and provides
/// the roster snapshots broadcast logic works from. It holds no sockets and
/// no player state; the transport layer and the world authority own those.
pub struct SessionRegistry {
    /// Bound identities indexed by connection id
    identities: HashMap<ConnId, PlayerIdentity>,
}

impl SessionRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self {
            identities: HashMap::new(),
        }
    }

    /// Binds an identity to a connection
    ///
    /// The identity id is the connection id itself, so uniqueness across
    /// active players follows from connection id uniqueness. A second bind
    /// on the same connection fails with [`AlreadyBound`] and leaves the
    /// first binding in place.
    pub fn bind(&mut self, conn: ConnId, name: String) -> Result<PlayerIdentity, AlreadyBound> {
        if let Some(existing) = self.identities.get(&conn) {
            return Err(AlreadyBound {
                conn,
                name: existing.name.clone(),
            });
        }

        let identity = PlayerIdentity { id: conn, name };
        info!("Player {} logged in as \"{}\"", identity.id, identity.name);
        self.identities.insert(conn, identity.clone());

        Ok(identity)
    }

    /// Returns the identity bound to a connection, if any
    pub fn lookup(&self, conn: ConnId) -> Option<&PlayerIdentity> {
        self.identities.get(&conn)
    }

    /// Returns true if the connection has completed login
    pub fn is_active(&self, conn: ConnId) -> bool {
        self.identities.contains_key(&conn)
    }

    /// Removes a connection's binding
    ///
    /// Returns the identity that was bound so the caller can build the
    /// departure broadcast. Returns None for connections that never logged
    /// in; those disconnect without ceremony.
    pub fn unbind(&mut self, conn: ConnId) -> Option<PlayerIdentity> {
        let identity = self.identities.remove(&conn);
        if let Some(identity) = &identity {
            info!("Player {} (\"{}\") left the session", identity.id, identity.name);
        }
        identity
    }

    /// Snapshot of every bound identity
    ///
    /// Order is unspecified. Used to build the late-joiner view and to
    /// decide broadcast target sets while holding the lock only briefly.
    pub fn active_identities(&self) -> Vec<PlayerIdentity> {
        self.identities.values().cloned().collect()
    }

    /// Snapshot of the connection ids with a bound identity
    pub fn active_conns(&self) -> Vec<ConnId> {
        self.identities.keys().copied().collect()
    }

    /// Returns the number of active players
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Returns true if nobody has logged in yet
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Test suite for identity binding rules
///
/// Covers first-login-wins, unbind bookkeeping, and the roster snapshots
/// the broadcast paths depend on.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_assigns_connection_id() {
        let mut registry = SessionRegistry::new();

        let identity = registry.bind(4, "ninja".to_string()).unwrap();
        assert_eq!(identity.id, 4);
        assert_eq!(identity.name, "ninja");
        assert_eq!(registry.len(), 1);
        assert!(registry.is_active(4));
    }

    #[test]
    fn test_second_bind_rejected_first_name_kept() {
        let mut registry = SessionRegistry::new();

        registry.bind(4, "ninja".to_string()).unwrap();
        let err = registry.bind(4, "pirate".to_string()).unwrap_err();

        assert_eq!(err.conn, 4);
        assert_eq!(err.name, "ninja");
        assert_eq!(registry.lookup(4).unwrap().name, "ninja");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unknown_connection() {
        let registry = SessionRegistry::new();
        assert!(registry.lookup(99).is_none());
        assert!(!registry.is_active(99));
    }

    #[test]
    fn test_unbind_returns_identity() {
        let mut registry = SessionRegistry::new();

        registry.bind(4, "ninja".to_string()).unwrap();
        let identity = registry.unbind(4).unwrap();

        assert_eq!(identity.id, 4);
        assert_eq!(identity.name, "ninja");
        assert!(registry.is_empty());
        assert!(!registry.is_active(4));
    }

    #[test]
    fn test_unbind_unknown_connection() {
        let mut registry = SessionRegistry::new();
        assert!(registry.unbind(99).is_none());
    }

    #[test]
    fn test_rebind_after_unbind() {
        let mut registry = SessionRegistry::new();

        registry.bind(4, "ninja".to_string()).unwrap();
        registry.unbind(4);

        // A fresh connection may reuse the slot with a new name.
        let identity = registry.bind(4, "pirate".to_string()).unwrap();
        assert_eq!(identity.name, "pirate");
    }

    #[test]
    fn test_active_identities_snapshot() {
        let mut registry = SessionRegistry::new();

        registry.bind(1, "ninja".to_string()).unwrap();
        registry.bind(2, "pirate".to_string()).unwrap();
        registry.bind(3, "robot".to_string()).unwrap();

        let mut roster = registry.active_identities();
        roster.sort_by_key(|identity| identity.id);

        assert_eq!(roster.len(), 3);
        assert_eq!(roster[0].name, "ninja");
        assert_eq!(roster[1].name, "pirate");
        assert_eq!(roster[2].name, "robot");
    }

    #[test]
    fn test_active_ids_are_unique() {
        let mut registry = SessionRegistry::new();

        for conn in 1..=5 {
            registry.bind(conn, format!("player-{}", conn)).unwrap();
        }

        let mut ids: Vec<ConnId> = registry
            .active_identities()
            .iter()
            .map(|identity| identity.id)
            .collect();
        ids.sort_unstable();
        ids.dedup();

        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_active_conns_snapshot() {
        let mut registry = SessionRegistry::new();

        registry.bind(7, "ninja".to_string()).unwrap();
        registry.bind(9, "pirate".to_string()).unwrap();

        let mut conns = registry.active_conns();
        conns.sort_unstable();
        assert_eq!(conns, vec![7, 9]);
    }
}
