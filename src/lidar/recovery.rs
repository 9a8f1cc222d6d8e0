use super::health::{ConnectionHealth, ConnectionState, SharedHealth};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTier {
    /// Stop, probe, flush, restart over the open handle
    Restart,
    /// Soft reboot and reopen the serial handle
    Reopen,
    /// Power cycle the USB device and rediscover its port
    PowerCycle,
}

impl fmt::Display for RecoveryTier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RecoveryTier::Restart => "restart",
            RecoveryTier::Reopen => "reopen",
            RecoveryTier::PowerCycle => "power cycle",
        };
        f.write_str(name)
    }
}

/// Escalation order, indexed by `attempt - 1`
pub const RECOVERY_LADDER: [RecoveryTier; 6] = [
    RecoveryTier::Restart,
    RecoveryTier::Restart,
    RecoveryTier::Reopen,
    RecoveryTier::Reopen,
    RecoveryTier::PowerCycle,
    RecoveryTier::PowerCycle,
];

#[derive(Deserialize, Debug, Clone)]
pub struct RecoveryConfig {
    #[serde(default = "default_staleness_timeout_ms")]
    pub staleness_timeout_ms: u64,
    #[serde(default = "default_empty_read_threshold")]
    pub empty_read_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_command_pause_ms")]
    pub command_pause_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_spin_up_ms")]
    pub spin_up_ms: u64,
    #[serde(default = "default_verify_window_ms")]
    pub verify_window_ms: u64,
    /// Verification passes with strictly more plausible samples than this
    #[serde(default = "default_verify_min_samples")]
    pub verify_min_samples: usize,
    #[serde(default = "default_device_wait_attempts")]
    pub device_wait_attempts: u32,
    #[serde(default = "default_device_wait_interval_ms")]
    pub device_wait_interval_ms: u64,
}

fn default_staleness_timeout_ms() -> u64 {
    5000
}

fn default_empty_read_threshold() -> u32 {
    50
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_command_pause_ms() -> u64 {
    500
}

fn default_probe_timeout_ms() -> u64 {
    500
}

fn default_spin_up_ms() -> u64 {
    3000
}

fn default_verify_window_ms() -> u64 {
    5000
}

fn default_verify_min_samples() -> usize {
    10
}

fn default_device_wait_attempts() -> u32 {
    10
}

fn default_device_wait_interval_ms() -> u64 {
    500
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            staleness_timeout_ms: default_staleness_timeout_ms(),
            empty_read_threshold: default_empty_read_threshold(),
            cooldown_ms: default_cooldown_ms(),
            command_pause_ms: default_command_pause_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            spin_up_ms: default_spin_up_ms(),
            verify_window_ms: default_verify_window_ms(),
            verify_min_samples: default_verify_min_samples(),
            device_wait_attempts: default_device_wait_attempts(),
            device_wait_interval_ms: default_device_wait_interval_ms(),
        }
    }
}

impl RecoveryConfig {
    pub fn staleness_timeout(&self) -> Duration {
        Duration::from_millis(self.staleness_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn command_pause(&self) -> Duration {
        Duration::from_millis(self.command_pause_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn spin_up(&self) -> Duration {
        Duration::from_millis(self.spin_up_ms)
    }

    pub fn verify_window(&self) -> Duration {
        Duration::from_millis(self.verify_window_ms)
    }

    pub fn device_wait_interval(&self) -> Duration {
        Duration::from_millis(self.device_wait_interval_ms)
    }
}

/// Decides when and how hard to recover the link.
///
/// Owned by the driver task, the only writer of [`ConnectionHealth`].
/// Performs no I/O itself: [`RecoverySupervisor::poll`] hands out the tier to
/// run and [`RecoverySupervisor::report`] records its outcome.
pub struct RecoverySupervisor {
    config: RecoveryConfig,
    health: SharedHealth,
    cooldown_until: Option<Instant>,
}

impl RecoverySupervisor {
    pub fn new(config: RecoveryConfig, health: SharedHealth) -> Self {
        Self {
            config,
            health,
            cooldown_until: None,
        }
    }

    pub fn health(&self) -> ConnectionHealth {
        self.health.snapshot()
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Link opened, staleness is measured from here
    pub fn connected(&mut self, now: Instant) {
        self.health.update(|health| {
            health.state = ConnectionState::Connected;
            health.last_valid_scan_time = Some(now);
            health.consecutive_empty_reads = 0;
        });
    }

    pub fn disconnected(&mut self) {
        self.health
            .update(|health| health.state = ConnectionState::Disconnected);
    }

    pub fn record_read(&mut self, bytes_read: usize) {
        let threshold = self.config.empty_read_threshold;
        let went_silent = self.health.update(|health| {
            if bytes_read > 0 {
                health.consecutive_empty_reads = 0;
                return false;
            }
            health.consecutive_empty_reads = health.consecutive_empty_reads.saturating_add(1);
            if health.consecutive_empty_reads >= threshold {
                health.last_valid_scan_time = None;
                if health.state == ConnectionState::Connected {
                    health.state = ConnectionState::Degraded;
                }
            }
            health.consecutive_empty_reads == threshold
        });
        if went_silent {
            warn!(
                "Lidar silent for {} consecutive reads, forcing health check",
                threshold
            );
        }
    }

    pub fn record_scan(&mut self, now: Instant, scans_per_second: u32) {
        let was_connected = self.health.update(|health| {
            let was_connected = health.state == ConnectionState::Connected;
            health.state = ConnectionState::Connected;
            health.last_valid_scan_time = Some(now);
            health.consecutive_empty_reads = 0;
            health.recovery_attempt_count = 0;
            health.scans_per_second = scans_per_second;
            was_connected
        });
        if !was_connected {
            info!("Lidar scans flowing again");
        }
        self.cooldown_until = None;
    }

    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until
            .map(|until| now < until)
            .unwrap_or(false)
    }

    fn is_stale(&self, health: &ConnectionHealth, now: Instant) -> bool {
        match health.last_valid_scan_time {
            Some(last) => now.duration_since(last) > self.config.staleness_timeout(),
            None => true,
        }
    }

    /// Health check. Returns the tier to run next, if any.
    pub fn poll(&mut self, now: Instant) -> Option<RecoveryTier> {
        if let Some(until) = self.cooldown_until {
            if now < until {
                return None;
            }
            info!("Recovery cooldown over, restarting from the first tier");
            self.cooldown_until = None;
            self.health
                .update(|health| health.recovery_attempt_count = 0);
        }

        let health = self.health.snapshot();
        if !self.is_stale(&health, now) || health.recovery_attempt_count >= RECOVERY_LADDER.len()
        {
            return None;
        }

        let attempt = health.recovery_attempt_count + 1;
        let tier = RECOVERY_LADDER[attempt - 1];
        self.health.update(|health| {
            health.recovery_attempt_count = attempt;
            health.state = ConnectionState::Recovering;
        });
        warn!(
            "No valid lidar scan, recovery attempt {}/{} ({})",
            attempt,
            RECOVERY_LADDER.len(),
            tier
        );
        Some(tier)
    }

    pub fn report(&mut self, tier: RecoveryTier, recovered: bool, now: Instant) {
        if recovered {
            info!("Lidar recovered by {}", tier);
            self.health.update(|health| {
                health.state = ConnectionState::Connected;
                health.last_valid_scan_time = Some(now);
                health.consecutive_empty_reads = 0;
                health.recovery_attempt_count = 0;
            });
            return;
        }

        let attempts = self.health.update(|health| {
            health.state = ConnectionState::Disconnected;
            health.recovery_attempt_count
        });
        warn!("Lidar recovery by {} failed", tier);
        if attempts >= RECOVERY_LADDER.len() {
            error!(
                "All {} recovery attempts failed, cooling down for {:?}",
                attempts,
                self.config.cooldown()
            );
            self.cooldown_until = Some(now + self.config.cooldown());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> RecoverySupervisor {
        RecoverySupervisor::new(RecoveryConfig::default(), SharedHealth::default())
    }

    #[test]
    fn fresh_link_is_not_stale() {
        let start = Instant::now();
        let mut supervisor = supervisor();
        supervisor.connected(start);
        assert_eq!(supervisor.poll(start + Duration::from_secs(5)), None);
        assert_eq!(supervisor.health().state, ConnectionState::Connected);
    }

    #[test]
    fn stale_link_escalates_through_ladder() {
        let start = Instant::now();
        let mut supervisor = supervisor();
        supervisor.connected(start);
        let mut now = start + Duration::from_millis(5001);
        let mut tiers = vec![];
        while let Some(tier) = supervisor.poll(now) {
            assert_eq!(supervisor.health().state, ConnectionState::Recovering);
            tiers.push(tier);
            supervisor.report(tier, false, now);
            now += Duration::from_secs(10);
            if tiers.len() > 10 {
                break;
            }
        }
        assert_eq!(tiers, RECOVERY_LADDER.to_vec());
        assert_eq!(supervisor.health().recovery_attempt_count, 6);
        assert_eq!(supervisor.health().state, ConnectionState::Disconnected);
    }

    #[test]
    fn cooldown_after_exhausting_attempts() {
        let start = Instant::now();
        let mut supervisor = supervisor();
        supervisor.connected(start);
        let failed_at = start + Duration::from_secs(60);
        for _ in 0..RECOVERY_LADDER.len() {
            let tier = supervisor.poll(failed_at).unwrap();
            supervisor.report(tier, false, failed_at);
        }
        assert!(supervisor.in_cooldown(failed_at));

        let almost = failed_at + Duration::from_millis(29_999);
        assert_eq!(supervisor.poll(almost), None);
        assert_eq!(supervisor.health().recovery_attempt_count, 6);

        let after = failed_at + Duration::from_secs(30);
        assert_eq!(supervisor.poll(after), Some(RecoveryTier::Restart));
        // counter went back to zero, then this check used attempt one
        assert_eq!(supervisor.health().recovery_attempt_count, 1);
        assert!(!supervisor.in_cooldown(after));
    }

    #[test]
    fn successful_recovery_resets_counter() {
        let start = Instant::now();
        let mut supervisor = supervisor();
        supervisor.connected(start);
        let now = start + Duration::from_secs(6);
        let first = supervisor.poll(now).unwrap();
        supervisor.report(first, false, now);
        let second = supervisor.poll(now).unwrap();
        supervisor.report(second, true, now);

        let health = supervisor.health();
        assert_eq!(health.recovery_attempt_count, 0);
        assert_eq!(health.state, ConnectionState::Connected);
        assert_eq!(health.last_valid_scan_time, Some(now));
        assert_eq!(supervisor.poll(now + Duration::from_secs(1)), None);
    }

    #[test]
    fn silent_reads_force_health_check() {
        let start = Instant::now();
        let mut supervisor = supervisor();
        supervisor.connected(start);
        for _ in 0..49 {
            supervisor.record_read(0);
        }
        assert_eq!(supervisor.poll(start), None);
        supervisor.record_read(0);
        assert_eq!(supervisor.health().state, ConnectionState::Degraded);
        assert_eq!(supervisor.health().last_valid_scan_time, None);
        // well inside the staleness window, yet the check fires
        assert_eq!(supervisor.poll(start), Some(RecoveryTier::Restart));
    }

    #[test]
    fn data_resets_empty_read_counter() {
        let start = Instant::now();
        let mut supervisor = supervisor();
        supervisor.connected(start);
        for _ in 0..30 {
            supervisor.record_read(0);
        }
        supervisor.record_read(128);
        assert_eq!(supervisor.health().consecutive_empty_reads, 0);
    }

    #[test]
    fn scans_clear_recovery_state() {
        let start = Instant::now();
        let mut supervisor = supervisor();
        supervisor.connected(start);
        let now = start + Duration::from_secs(6);
        let tier = supervisor.poll(now).unwrap();
        supervisor.report(tier, false, now);
        supervisor.record_scan(now, 7);
        let health = supervisor.health();
        assert_eq!(health.state, ConnectionState::Connected);
        assert_eq!(health.recovery_attempt_count, 0);
        assert_eq!(health.scans_per_second, 7);
    }
}
