use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Opaque connection identity (a ULID string)
pub type ClientId = String;

/// User agent recorded when the upgrade request carried none
pub const UNKNOWN_USER_AGENT: &str = "unknown";

/// Immutable facts about a connection, captured at accept time.
///
/// This is what broadcast predicates and client counts get to see; the
/// transport handle itself never leaves the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub client_id: ClientId,
    pub remote_addr: Option<SocketAddr>,
    pub user_agent: String,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn new(remote_addr: Option<SocketAddr>, user_agent: Option<String>) -> Self {
        Self {
            client_id: ulid::Ulid::new().to_string(),
            remote_addr,
            user_agent: user_agent
                .map(|ua| ua.trim().to_string())
                .filter(|ua| !ua.is_empty())
                .unwrap_or_else(|| UNKNOWN_USER_AGENT.to_string()),
            connected_at: Utc::now(),
        }
    }

    /// Address key used for grouping in stats (IP only, ports are per-socket noise)
    pub fn address_key(&self) -> String {
        self.remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}
