// Scope registry: which live connection belongs to which delivery scopes.
//
// Pure in-memory state scoped to process lifetime. Clients re-join their
// scopes after every reconnect; nothing here survives a restart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bellhop_common::protocol::ws::WsMessage;
use bellhop_common::types::Scope;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Tracks scope membership and the outbound channel of every live
/// connection. Cloning the registry clones a handle to the same state.
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<Uuid, ConnectionState>,
    scopes: HashMap<Scope, HashSet<Uuid>>,
}

#[derive(Debug)]
struct ConnectionState {
    scopes: HashSet<Scope>,
    outbound: mpsc::UnboundedSender<WsMessage>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly-opened connection and its outbound channel.
    pub async fn register(&self, connection_id: Uuid, outbound: mpsc::UnboundedSender<WsMessage>) {
        let mut guard = self.inner.write().await;
        guard
            .connections
            .insert(connection_id, ConnectionState { scopes: HashSet::new(), outbound });
    }

    /// Add a connection to a scope's member set. Idempotent.
    ///
    /// A connection holds at most one `user:*` scope at a time: joining a
    /// second one evicts the first. Role, org, and channel scopes
    /// accumulate freely.
    ///
    /// Returns false when the connection is not registered (no mutation).
    pub async fn join(&self, connection_id: Uuid, scope: Scope) -> bool {
        let mut guard = self.inner.write().await;
        if !guard.connections.contains_key(&connection_id) {
            return false;
        }

        if scope.is_user() {
            let previous = guard
                .connections
                .get(&connection_id)
                .and_then(|conn| conn.scopes.iter().find(|held| held.is_user() && **held != scope))
                .cloned();
            if let Some(previous) = previous {
                guard.detach(connection_id, &previous);
            }
        }

        guard.scopes.entry(scope.clone()).or_default().insert(connection_id);
        if let Some(conn) = guard.connections.get_mut(&connection_id) {
            conn.scopes.insert(scope);
        }
        true
    }

    /// Remove a connection from a single scope. Empty scope entries are
    /// deleted so the map stays bounded by live membership.
    pub async fn leave(&self, connection_id: Uuid, scope: &Scope) {
        let mut guard = self.inner.write().await;
        guard.detach(connection_id, scope);
    }

    /// Drop a connection and every scope membership it holds. Called on
    /// disconnect; no stale entries survive.
    pub async fn remove(&self, connection_id: Uuid) {
        let mut guard = self.inner.write().await;
        let Some(conn) = guard.connections.remove(&connection_id) else {
            return;
        };
        for scope in conn.scopes {
            if let Some(members) = guard.scopes.get_mut(&scope) {
                members.remove(&connection_id);
                if members.is_empty() {
                    guard.scopes.remove(&scope);
                }
            }
        }
    }

    /// Live connection ids for a scope. Empty when nobody is joined.
    pub async fn members(&self, scope: &Scope) -> Vec<Uuid> {
        let guard = self.inner.read().await;
        guard.scopes.get(scope).map(|members| members.iter().copied().collect()).unwrap_or_default()
    }

    /// Size of a scope without materializing the set.
    pub async fn member_count(&self, scope: &Scope) -> usize {
        let guard = self.inner.read().await;
        guard.scopes.get(scope).map(HashSet::len).unwrap_or(0)
    }

    /// Outbound channels for every member of a scope. The lock is released
    /// before the caller performs any sends.
    pub async fn senders_for(&self, scope: &Scope) -> Vec<(Uuid, mpsc::UnboundedSender<WsMessage>)> {
        let guard = self.inner.read().await;
        let Some(members) = guard.scopes.get(scope) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|id| guard.connections.get(id).map(|conn| (*id, conn.outbound.clone())))
            .collect()
    }

    /// Outbound channels for every live connection (broadcast).
    pub async fn all_senders(&self) -> Vec<(Uuid, mpsc::UnboundedSender<WsMessage>)> {
        let guard = self.inner.read().await;
        guard.connections.iter().map(|(id, conn)| (*id, conn.outbound.clone())).collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Canonical names of every non-empty scope, sorted for stable output.
    pub async fn scope_names(&self) -> Vec<String> {
        let guard = self.inner.read().await;
        let mut names: Vec<String> = guard.scopes.keys().map(Scope::to_string).collect();
        names.sort();
        names
    }
}

impl RegistryState {
    fn detach(&mut self, connection_id: Uuid, scope: &Scope) {
        if let Some(conn) = self.connections.get_mut(&connection_id) {
            conn.scopes.remove(scope);
        }
        if let Some(members) = self.scopes.get_mut(scope) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.scopes.remove(scope);
            }
        }
    }
}
