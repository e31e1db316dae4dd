//! Connection hub: owns the registry and the sweep loops, and is the only
//! surface HTTP handlers use to reach connected clients.

use crate::broadcast;
use crate::config::HubConfig;
use crate::heartbeat;
use crate::protocol::ServerMessage;
use crate::registry::{ClientFilter, ClientStats, Connection, ConnectionRegistry, Outbound};
use crate::types::{ClientId, ConnectionInfo};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ConnectionHub {
    config: HubConfig,
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
    monitors: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            registry: ConnectionRegistry::new(),
            shutdown: CancellationToken::new(),
            monitors: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Start the liveness and idle sweep loops. Later calls are no-ops.
    pub fn start(&self) {
        let Ok(mut monitors) = self.monitors.lock() else {
            tracing::error!("Monitor list poisoned, sweeps not started");
            return;
        };
        if !monitors.is_empty() {
            tracing::debug!("Heartbeat monitors already running");
            return;
        }

        monitors.push(heartbeat::spawn_liveness_monitor(
            self.registry.clone(),
            self.config.heartbeat_interval,
            self.shutdown.child_token(),
        ));
        monitors.push(heartbeat::spawn_idle_monitor(
            self.registry.clone(),
            self.config.idle_sweep_interval,
            self.config.idle_timeout,
            self.shutdown.child_token(),
        ));
        tracing::info!("Heartbeat monitors started");
    }

    #[cfg(test)]
    fn monitor_count(&self) -> usize {
        self.monitors.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Register a freshly accepted transport and greet it with its identity.
    ///
    /// The returned connection is armed alive and carries a token that is
    /// cancelled on eviction or hub shutdown.
    pub async fn register(
        &self,
        info: ConnectionInfo,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(info, outbound, self.shutdown.child_token()));
        let id = self.registry.add(conn.clone()).await;

        conn.send_message(&ServerMessage::connection(id.clone()));
        tracing::info!(
            client_id = %id,
            addr = %conn.info.address_key(),
            user_agent = %conn.info.user_agent,
            "Client connected"
        );
        conn
    }

    /// Remove a client. Whichever path gets here first (close, error,
    /// eviction) does the cleanup; the rest are no-ops.
    pub async fn disconnect(&self, id: &ClientId, reason: &str) -> bool {
        match self.registry.remove(id).await {
            Some(conn) => {
                conn.terminate();
                tracing::info!(client_id = %id, reason, "Client disconnected");
                true
            }
            None => false,
        }
    }

    pub async fn get_client_count(&self, filter: Option<&ClientFilter>) -> usize {
        self.registry.count(filter).await
    }

    pub async fn get_client_stats(&self) -> ClientStats {
        self.registry.stats().await
    }

    pub async fn broadcast(
        &self,
        payload: Map<String, Value>,
        filter: Option<&ClientFilter>,
    ) -> usize {
        broadcast::broadcast(&self.registry, payload, filter).await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once [`ConnectionHub::shutdown`] has been called
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await
    }

    /// Stop both sweep loops and close every connection
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let clients = self.registry.count(None).await;
        tracing::info!(clients, "Shutting down connection hub");
        self.shutdown.cancel();

        let monitors = match self.monitors.lock() {
            Ok(mut monitors) => std::mem::take(&mut *monitors),
            Err(_) => Vec::new(),
        };
        for handle in monitors {
            if let Err(e) = handle.await {
                tracing::error!("Heartbeat monitor panicked: {}", e);
            }
        }
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outbound() -> (
        mpsc::UnboundedSender<Outbound>,
        mpsc::UnboundedReceiver<Outbound>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_register_sends_confirmation() {
        let hub = ConnectionHub::default();
        let (tx, mut rx) = outbound();
        let conn = hub.register(ConnectionInfo::new(None, None), tx).await;

        assert_eq!(hub.get_client_count(None).await, 1);
        let Outbound::Text(text) = rx.recv().await.unwrap() else {
            panic!("Expected text frame");
        };
        match serde_json::from_str::<ServerMessage>(&text).unwrap() {
            ServerMessage::Connection { client_id, .. } => assert_eq!(&client_id, conn.id()),
            other => panic!("Expected connection message, got {:?}", other),
        }
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn test_connect_then_disconnect_counts() {
        let hub = ConnectionHub::default();
        let mut conns = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..6 {
            let (tx, rx) = outbound();
            conns.push(hub.register(ConnectionInfo::new(None, None), tx).await);
            receivers.push(rx);
        }

        for conn in conns.iter().take(4) {
            assert!(hub.disconnect(conn.id(), "test").await);
            assert!(!hub.disconnect(conn.id(), "test again").await);
        }

        assert_eq!(hub.get_client_count(None).await, 2);
        let stats = hub.get_client_stats().await;
        assert_eq!(stats.opened_total, 6);
        assert_eq!(stats.closed_total, 4);
        assert!(conns[0].is_terminated());
    }

    #[tokio::test]
    async fn test_broadcast_through_hub() {
        let hub = ConnectionHub::default();
        let (tx1, _rx1) = outbound();
        let (tx2, _rx2) = outbound();
        hub.register(ConnectionInfo::new(None, None), tx1).await;
        let target = hub.register(ConnectionInfo::new(None, None), tx2).await;

        let payload = json!({"event": "match", "name": "Alice"})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(hub.broadcast(payload.clone(), None).await, 2);

        let target_id = target.id().clone();
        let only_target = move |info: &ConnectionInfo| info.client_id == target_id;
        assert_eq!(hub.broadcast(payload, Some(&only_target)).await, 1);
    }

    #[tokio::test]
    async fn test_start_twice_keeps_one_pair_of_monitors() {
        let hub = ConnectionHub::default();
        hub.start();
        hub.start();
        assert_eq!(hub.monitor_count(), 2);

        hub.shutdown().await;
        assert_eq!(hub.monitor_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_terminates_connections_and_monitors() {
        let hub = ConnectionHub::default();
        hub.start();
        let (tx, _rx) = outbound();
        let conn = hub.register(ConnectionInfo::new(None, None), tx).await;

        hub.shutdown().await;
        assert!(hub.is_shutting_down());
        assert!(conn.is_terminated());
        // Second call is a no-op
        hub.shutdown().await;
    }
}
