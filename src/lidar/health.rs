use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    /// Link is open but silent or stale
    Degraded,
    Recovering,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Recovering => "recovering",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHealth {
    pub state: ConnectionState,
    /// `None` when no scan arrived yet or the link was declared silent
    pub last_valid_scan_time: Option<Instant>,
    pub consecutive_empty_reads: u32,
    pub recovery_attempt_count: usize,
    /// Completed scans over the last full second
    pub scans_per_second: u32,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_valid_scan_time: None,
            consecutive_empty_reads: 0,
            recovery_attempt_count: 0,
            scans_per_second: 0,
        }
    }
}

impl ConnectionHealth {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Health record shared between the driver task and readers.
///
/// The lock is only ever held for a copy or a field update.
#[derive(Debug, Clone, Default)]
pub struct SharedHealth {
    inner: Arc<Mutex<ConnectionHealth>>,
}

impl SharedHealth {
    pub fn snapshot(&self) -> ConnectionHealth {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn update<R>(&self, change: impl FnOnce(&mut ConnectionHealth) -> R) -> R {
        let mut health = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut health)
    }
}
