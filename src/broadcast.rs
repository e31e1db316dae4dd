use crate::protocol::now_iso;
use crate::registry::{ClientFilter, ConnectionRegistry};
use serde_json::{Map, Value};

/// Deliver `payload` to every live connection accepted by `filter`.
///
/// The payload is stamped with the server's `timestamp` (replacing any the
/// caller set), serialized once, and queued on each writable connection.
/// Returns how many sends succeeded. Delivery is best-effort: a failed send is
/// logged and skipped, never retried.
pub async fn broadcast(
    registry: &ConnectionRegistry,
    mut payload: Map<String, Value>,
    filter: Option<&ClientFilter>,
) -> usize {
    payload.insert("timestamp".to_string(), Value::String(now_iso()));

    let json = match serde_json::to_string(&payload) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize broadcast payload: {}", e);
            return 0;
        }
    };

    let mut delivered = 0;
    for conn in registry.snapshot().await {
        if let Some(filter) = filter {
            if !filter(&conn.info) {
                continue;
            }
        }
        if !conn.is_writable() {
            continue;
        }
        if conn.send_text(json.clone()) {
            delivered += 1;
        } else {
            tracing::warn!(client_id = %conn.id(), "Broadcast delivery failed");
        }
    }

    tracing::debug!(delivered, "Broadcast complete");
    delivered
}
