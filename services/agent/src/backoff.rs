//! Reconnect delay generation.
//!
//! Decorrelated jitter: each delay is a uniform draw from
//! `[initial, 3 * prev_capped]`, capped at `max`, where `prev_capped` is the
//! plain exponential schedule for the current attempt. Concurrent clients
//! reconnecting after a shared outage therefore spread out instead of
//! thundering back in lockstep; ties remain probabilistic.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Delay generator for one reconnection campaign.
///
/// `next_delay` advances the attempt counter; `reset` starts a fresh campaign
/// (called on every successful open). There is no attempt limit — sessions
/// reconnect indefinitely until told to stop.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Backoff { config, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let initial = self.config.initial.as_millis() as f64;
        let max = self.config.max.as_millis() as f64;

        let prev_capped = (initial * self.config.multiplier.powi(self.attempt as i32)).min(max);
        let draw = rand::thread_rng().gen_range(initial..=(3.0 * prev_capped).max(initial));
        self.attempt = self.attempt.saturating_add(1);

        Duration::from_millis(draw.min(max) as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
