//! Liveness and idle sweeps over the connection registry

use crate::registry::ConnectionRegistry;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Outcome of a single sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub probed: usize,
    pub evicted: usize,
}

async fn evict(registry: &ConnectionRegistry, id: &str, reason: &str) -> bool {
    match registry.remove(id).await {
        Some(conn) => {
            conn.terminate();
            tracing::warn!(client_id = %id, reason, "Evicting connection");
            true
        }
        // Already gone through the close path
        None => false,
    }
}

/// One liveness pass.
///
/// A connection whose flag is still false from the previous pass is evicted;
/// everyone else has the flag cleared and gets a ping. A silent peer therefore
/// survives exactly one pass.
pub async fn sweep_liveness(registry: &ConnectionRegistry) -> SweepReport {
    let mut report = SweepReport::default();

    for conn in registry.snapshot().await {
        report.checked += 1;

        if !conn.take_alive() {
            if evict(registry, conn.id(), "heartbeat timeout").await {
                report.evicted += 1;
            }
            continue;
        }

        if conn.send_ping() {
            report.probed += 1;
        } else if evict(registry, conn.id(), "transport closed").await {
            report.evicted += 1;
        }
    }

    report
}

/// One idle pass: evict anything without application traffic for longer
/// than `idle_timeout`, whatever its liveness flag says.
pub async fn sweep_idle(registry: &ConnectionRegistry, idle_timeout: Duration) -> SweepReport {
    let mut report = SweepReport::default();

    for conn in registry.snapshot().await {
        report.checked += 1;
        if conn.idle_for() > idle_timeout && evict(registry, conn.id(), "idle timeout").await {
            report.evicted += 1;
        }
    }

    report
}

fn log_report(kind: &str, report: &SweepReport) {
    if report.evicted > 0 {
        tracing::info!(
            sweep = kind,
            checked = report.checked,
            evicted = report.evicted,
            "Sweep evicted connections"
        );
    } else {
        tracing::debug!(sweep = kind, checked = report.checked, "Sweep complete");
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    // First tick is one full period out, not immediate
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Spawn the liveness sweep loop
pub fn spawn_liveness_monitor(
    registry: ConnectionRegistry,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let report = sweep_liveness(&registry).await;
                    log_report("liveness", &report);
                }
            }
        }
        tracing::debug!("Liveness monitor stopped");
    })
}

/// Spawn the idle sweep loop
pub fn spawn_idle_monitor(
    registry: ConnectionRegistry,
    period: Duration,
    idle_timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let report = sweep_idle(&registry, idle_timeout).await;
                    log_report("idle", &report);
                }
            }
        }
        tracing::debug!("Idle monitor stopped");
    })
}
