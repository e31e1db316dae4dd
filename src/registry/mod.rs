mod connection;
mod stats;

pub use connection::{Connection, Outbound};
pub use stats::ClientStats;

#[cfg(test)]
pub(crate) use connection::test_support;

use crate::types::{ClientId, ConnectionInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Filter over connection attributes, used by counts and broadcasts
pub type ClientFilter = dyn Fn(&ConnectionInfo) -> bool + Send + Sync;

/// The authoritative set of live connections.
///
/// The lock only ever guards map operations. Callers get `Arc<Connection>`
/// snapshots and do their I/O after it is released.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ClientId, Arc<Connection>>>>,
    opened_total: Arc<AtomicU64>,
    closed_total: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, connection: impl Into<Arc<Connection>>) -> ClientId {
        let connection = connection.into();
        let id = connection.id().clone();
        self.connections
            .write()
            .await
            .insert(id.clone(), connection);
        self.opened_total.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Remove a connection. Returns the entry only to the caller that
    /// actually removed it; later calls for the same id are no-ops.
    pub async fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        let removed = self.connections.write().await.remove(id);
        if removed.is_some() {
            self.closed_total.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Stable copy of the current entries. Entries may be removed
    /// concurrently after this returns.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Connection),
    {
        for conn in self.snapshot().await {
            visitor(&conn);
        }
    }

    pub async fn count(&self, filter: Option<&ClientFilter>) -> usize {
        let connections = self.connections.read().await;
        match filter {
            Some(filter) => connections.values().filter(|c| filter(&c.info)).count(),
            None => connections.len(),
        }
    }

    pub async fn stats(&self) -> ClientStats {
        let connections = self.snapshot().await;
        ClientStats::from_connections(
            &connections,
            self.opened_total.load(Ordering::Relaxed),
            self.closed_total.load(Ordering::Relaxed),
        )
    }
}
