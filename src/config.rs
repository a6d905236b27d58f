//! Runtime settings for the capture scheduler and the HTTP server.

use crate::error::PaymentError;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_CAPTURE_CONCURRENCY: usize = 4;
pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How long a capture lock survives a crashed holder. Also the age after
    /// which a CRON_CAPTURING claim is considered abandoned, so it must be
    /// longer than `gateway_timeout`.
    pub lock_ttl: Duration,
    /// Upper bound on one gateway capture call. Expiry counts as a failed attempt.
    pub gateway_timeout: Duration,
    /// Orders captured in parallel within one run.
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_ttl: DEFAULT_LOCK_TTL,
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
            concurrency: DEFAULT_CAPTURE_CONCURRENCY,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.lock_ttl <= self.gateway_timeout {
            return Err(PaymentError::ValidationError(format!(
                "capture lock ttl ({}s) must be longer than the gateway timeout ({}s)",
                self.lock_ttl.as_secs(),
                self.gateway_timeout.as_secs()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Shared secret for the cron endpoint. `None` rejects every cron call.
    pub cron_secret: Option<String>,
    /// Period of the in-process capture job; `None` disables it.
    pub capture_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            cron_secret: None,
            capture_interval: Some(DEFAULT_CAPTURE_INTERVAL),
        }
    }
}

/// Parses a duration given in whole seconds, as the CLI accepts it.
pub fn parse_seconds(raw: &str) -> Result<Duration, String> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("invalid number of seconds '{}': {}", raw, e))
}
