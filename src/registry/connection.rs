use crate::protocol::ServerMessage;
use crate::types::{ClientId, ConnectionInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Frames queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    /// Transport-level liveness probe
    Ping,
}

/// One accepted session.
///
/// The socket is owned by the connection's writer task; this entry only holds
/// the queue feeding it and the token that tears it down, so either side may
/// go away first.
#[derive(Debug)]
pub struct Connection {
    pub info: ConnectionInfo,
    opened_at: Instant,
    alive: AtomicBool,
    last_activity: Mutex<Instant>,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: CancellationToken,
}

impl Connection {
    pub fn new(
        info: ConnectionInfo,
        outbound: mpsc::UnboundedSender<Outbound>,
        shutdown: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            info,
            opened_at: now,
            alive: AtomicBool::new(true),
            last_activity: Mutex::new(now),
            outbound,
            shutdown,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.info.client_id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Record an observed pong or keepalive
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clear the liveness flag, returning what it was before
    pub(crate) fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Record application traffic
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Whether the writer task is still draining this connection's queue
    pub fn is_writable(&self) -> bool {
        !self.outbound.is_closed() && !self.shutdown.is_cancelled()
    }

    pub fn send_text(&self, text: String) -> bool {
        self.is_writable() && self.outbound.send(Outbound::Text(text)).is_ok()
    }

    pub fn send_message(&self, msg: &ServerMessage) -> bool {
        match serde_json::to_string(msg) {
            Ok(json) => self.send_text(json),
            Err(e) => {
                tracing::error!(client_id = %self.id(), "Failed to serialize message: {}", e);
                false
            }
        }
    }

    pub fn send_ping(&self) -> bool {
        self.is_writable() && self.outbound.send(Outbound::Ping).is_ok()
    }

    /// Force the transport closed. Safe to call any number of times.
    pub fn terminate(&self) {
        self.shutdown.cancel();
    }

    pub fn closed(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    pub fn is_terminated(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::connection;
    use super::*;

    #[test]
    fn test_new_connection_is_alive() {
        let (conn, _rx) = connection();
        assert!(conn.is_alive());
        assert!(conn.take_alive());
        assert!(!conn.is_alive());
        conn.mark_alive();
        assert!(conn.is_alive());
    }

    #[test]
    fn test_send_after_receiver_dropped_fails() {
        let (conn, rx) = connection();
        assert!(conn.send_text("hi".to_string()));
        drop(rx);
        assert!(!conn.is_writable());
        assert!(!conn.send_text("hi".to_string()));
        assert!(!conn.send_ping());
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let (conn, mut rx) = connection();
        conn.terminate();
        conn.terminate();
        assert!(conn.is_terminated());
        assert!(!conn.send_ping());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_idle_time() {
        let (conn, _rx) = connection();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(conn.idle_for() >= Duration::from_secs(10));
        conn.touch();
        assert!(conn.idle_for() < Duration::from_secs(1));
        assert!(conn.age() >= Duration::from_secs(10));
    }
}
