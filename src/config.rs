//! Client configuration.
//!
//! Durations are stored as whole milliseconds so a config reads naturally
//! as JSON:
//!
//! ```
//! use std::time::Duration;
//! use switchboard::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{
//!     "client_id": "billing-1",
//!     "default_request_timeout_ms": 2500,
//!     "dispatch_workers": 4
//! }"#).unwrap();
//!
//! assert_eq!(config.default_request_timeout(), Duration::from_millis(2500));
//! assert_eq!(config.inbound_queue_capacity, 1000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::topic::WILDCARD_SUFFIX;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60 * 60 * 1000;
const DEFAULT_DISPATCH_WORKERS: usize = 1;
const DEFAULT_INBOUND_QUEUE_CAPACITY: usize = 1000;
const DEFAULT_SHUTDOWN_GRACE_PERIOD_MS: u64 = 5_000;
const DEFAULT_TIMEOUT_SWEEP_INTERVAL_MS: u64 = 100;
const DEFAULT_SERVICE_TTL_CHECK_INTERVAL_MS: u64 = 30_000;

/// Settings for a [`Client`](crate::Client).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Identity of this client on the fabric. Also names its reply-to topic.
    #[serde(default = "generate_client_id")]
    pub client_id: String,

    /// Timeout for requests sent without an explicit one.
    #[serde(default = "default_request_timeout")]
    pub default_request_timeout_ms: u64,

    /// Threads running callbacks.
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,

    /// Pending callback jobs per worker before delivery blocks.
    #[serde(default = "default_inbound_queue_capacity")]
    pub inbound_queue_capacity: usize,

    /// How long `destroy` waits for in-flight callbacks.
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period_ms: u64,

    /// How often asynchronous requests are checked for timeouts.
    #[serde(default = "default_timeout_sweep_interval")]
    pub timeout_sweep_interval_ms: u64,

    /// How often service registrations are checked for a ttl refresh.
    #[serde(default = "default_service_ttl_check_interval")]
    pub service_ttl_check_interval_ms: u64,
}

fn generate_client_id() -> String {
    Uuid::new_v4().to_string()
}

const fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

const fn default_dispatch_workers() -> usize {
    DEFAULT_DISPATCH_WORKERS
}

const fn default_inbound_queue_capacity() -> usize {
    DEFAULT_INBOUND_QUEUE_CAPACITY
}

const fn default_shutdown_grace_period() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_PERIOD_MS
}

const fn default_timeout_sweep_interval() -> u64 {
    DEFAULT_TIMEOUT_SWEEP_INTERVAL_MS
}

const fn default_service_ttl_check_interval() -> u64 {
    DEFAULT_SERVICE_TTL_CHECK_INTERVAL_MS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: generate_client_id(),
            default_request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            dispatch_workers: DEFAULT_DISPATCH_WORKERS,
            inbound_queue_capacity: DEFAULT_INBOUND_QUEUE_CAPACITY,
            shutdown_grace_period_ms: DEFAULT_SHUTDOWN_GRACE_PERIOD_MS,
            timeout_sweep_interval_ms: DEFAULT_TIMEOUT_SWEEP_INTERVAL_MS,
            service_ttl_check_interval_ms: DEFAULT_SERVICE_TTL_CHECK_INTERVAL_MS,
        }
    }
}

impl ClientConfig {
    /// Defaults with a freshly generated client id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ClientError::invalid_argument(format!("malformed client config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_default_request_timeout(mut self, timeout: Duration) -> Self {
        self.default_request_timeout_ms = millis(timeout);
        self
    }

    pub fn with_dispatch_workers(mut self, workers: usize) -> Self {
        self.dispatch_workers = workers;
        self
    }

    pub fn with_inbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.inbound_queue_capacity = capacity;
        self
    }

    pub fn with_shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period_ms = millis(grace);
        self
    }

    pub fn with_timeout_sweep_interval(mut self, interval: Duration) -> Self {
        self.timeout_sweep_interval_ms = millis(interval);
        self
    }

    pub fn with_service_ttl_check_interval(mut self, interval: Duration) -> Self {
        self.service_ttl_check_interval_ms = millis(interval);
        self
    }

    pub fn default_request_timeout(&self) -> Duration {
        Duration::from_millis(self.default_request_timeout_ms)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }

    pub fn timeout_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_sweep_interval_ms)
    }

    pub fn service_ttl_check_interval(&self) -> Duration {
        Duration::from_millis(self.service_ttl_check_interval_ms)
    }

    /// Validate the configuration.
    ///
    /// Checks for:
    /// - An empty client id, or one containing `/` or the wildcard suffix
    /// - Zero workers, queue capacity, request timeout or check intervals
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(ClientError::invalid_argument("client_id must not be empty"));
        }
        if self.client_id.contains('/') || self.client_id.contains(WILDCARD_SUFFIX) {
            return Err(ClientError::invalid_argument(format!(
                "client_id {:?} must not contain '/' or '{}'",
                self.client_id, WILDCARD_SUFFIX
            )));
        }

        let positive = [
            ("dispatch_workers", self.dispatch_workers as u64),
            ("inbound_queue_capacity", self.inbound_queue_capacity as u64),
            ("default_request_timeout_ms", self.default_request_timeout_ms),
            ("timeout_sweep_interval_ms", self.timeout_sweep_interval_ms),
            ("service_ttl_check_interval_ms", self.service_ttl_check_interval_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ClientError::invalid_argument(format!(
                    "{} must be greater than zero",
                    field
                )));
            }
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
