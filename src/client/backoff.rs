//! Reconnect policy: exponential backoff with jitter and an attempt budget

use rand::Rng;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Hub WebSocket URL, e.g. `ws://localhost:3001/ws`
    pub url: String,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Automatic attempts before giving up
    pub max_attempts: u32,
    /// Relative jitter, 0.2 means ±20%
    pub jitter: f64,
    /// Period of the application-level `ping`
    pub ping_interval: Duration,
    /// Close the socket when no `pong` has been seen for this long
    pub stale_ack_timeout: Duration,
    pub connect_timeout: Duration,
}

impl ReconnectConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            jitter: 0.2,
            ping_interval: Duration::from_secs(15),
            stale_ack_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Attempt budget exhausted; only a manual reconnect leaves this state
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Normal close code; the other side meant it
    Intentional,
    Abnormal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Stay disconnected until told otherwise
    Stay,
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
}

impl Backoff {
    /// `jitter` is clamped to `0.0..=1.0`; NaN means no jitter
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        let jitter = if jitter.is_nan() {
            0.0
        } else {
            jitter.clamp(0.0, 1.0)
        };
        Self { base, cap, jitter }
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// `min(cap, base * 2^attempt)` before jitter
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Smallest and largest delay `delay` can return for `attempt`
    pub fn bounds(&self, attempt: u32) -> (Duration, Duration) {
        let nominal = self.nominal(attempt);
        (
            nominal.mul_f64(1.0 - self.jitter),
            nominal.mul_f64(1.0 + self.jitter),
        )
    }

    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let factor = rng.random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        self.nominal(attempt).mul_f64(factor)
    }
}

/// Transition table for the reconnect state machine
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    backoff: Backoff,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            backoff: Backoff::new(config.base_delay, config.max_delay, config.jitter),
            max_attempts: config.max_attempts,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// Manual reconnect: start over with a full attempt budget
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn on_close<R: Rng + ?Sized>(&mut self, kind: CloseKind, rng: &mut R) -> NextStep {
        match kind {
            CloseKind::Intentional => NextStep::Stay,
            CloseKind::Abnormal if self.attempts >= self.max_attempts => NextStep::GiveUp,
            CloseKind::Abnormal => {
                let delay = self.backoff.delay(self.attempts, rng);
                self.attempts += 1;
                NextStep::Retry {
                    attempt: self.attempts,
                    delay,
                }
            }
        }
    }
}
