//! Point-in-time connection statistics for the observability endpoint

use serde::Serialize;
use std::collections::HashMap;

use super::Connection;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    pub total: usize,
    pub by_user_agent: HashMap<String, usize>,
    pub by_address: HashMap<String, usize>,
    /// Age of every live connection, in whole seconds
    pub connection_ages: Vec<u64>,
    pub average_age_secs: f64,
    pub oldest_age_secs: u64,
    pub opened_total: u64,
    pub closed_total: u64,
}

impl ClientStats {
    pub(super) fn from_connections(
        connections: &[std::sync::Arc<Connection>],
        opened_total: u64,
        closed_total: u64,
    ) -> Self {
        let mut stats = ClientStats {
            total: connections.len(),
            opened_total,
            closed_total,
            ..Default::default()
        };

        for conn in connections {
            *stats
                .by_user_agent
                .entry(conn.info.user_agent.clone())
                .or_insert(0) += 1;
            *stats.by_address.entry(conn.info.address_key()).or_insert(0) += 1;
            stats.connection_ages.push(conn.age().as_secs());
        }

        stats.connection_ages.sort_unstable();
        stats.oldest_age_secs = stats.connection_ages.last().copied().unwrap_or(0);
        if !stats.connection_ages.is_empty() {
            let sum: u64 = stats.connection_ages.iter().sum();
            stats.average_age_secs = sum as f64 / stats.connection_ages.len() as f64;
        }

        stats
    }
}
