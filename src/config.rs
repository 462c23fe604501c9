//! Coordinator configuration.

use crate::relay::{HttpRelaySource, RelaySource, StaticRelaySource};
use rtccore::media::IceServer;
use rtccore::net::HttpClient;
use rtccore::relay::RelayCredentialsSpec;
use rtccore::types::UserId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const ENV_RELAY_URL: &str = "RTC_MESH_RELAY_URL";
pub const ENV_RELAY_USER: &str = "RTC_MESH_RELAY_USER";
pub const ENV_RELAY_SECRET: &str = "RTC_MESH_RELAY_SECRET";
pub const ENV_RING_TIMEOUT_SECS: &str = "RTC_MESH_RING_TIMEOUT_SECS";

const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_EVENT_CAPACITY: usize = 100;
const DEFAULT_LOG_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Where relay (STUN/TURN) servers come from.
#[derive(Clone, Debug, Default)]
pub struct RelayConfig {
    /// Credential endpoint. When unset, `fallback_servers` are used as-is.
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub secret: Option<String>,
    /// How long fetched servers are reused. `None` fetches on every call.
    pub cache_ttl: Option<Duration>,
    pub fallback_servers: Vec<IceServer>,
}

impl RelayConfig {
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            username: Some(username.into()),
            secret: Some(secret.into()),
            ..Default::default()
        }
    }

    /// Build the relay source this configuration describes.
    pub fn build_source(&self, http: Arc<dyn HttpClient>) -> Arc<dyn RelaySource> {
        match &self.endpoint {
            Some(endpoint) => {
                let mut spec = RelayCredentialsSpec::new(endpoint);
                if let (Some(user), Some(secret)) = (&self.username, &self.secret) {
                    spec = spec.with_basic_auth(user, secret);
                }
                Arc::new(HttpRelaySource::new(spec, http, self.cache_ttl))
            }
            None => Arc::new(StaticRelaySource::new(self.fallback_servers.clone())),
        }
    }
}

/// Configuration shared by the direct and push-to-talk coordinators.
#[derive(Clone, Debug)]
pub struct CallConfig {
    pub self_id: UserId,
    /// How long a direct call may ring before it is declined.
    pub ring_timeout: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Number of log entries retained in snapshots.
    pub log_limit: usize,
    pub relay: RelayConfig,
}

impl CallConfig {
    pub fn new(self_id: impl Into<UserId>) -> Self {
        Self {
            self_id: self_id.into(),
            ring_timeout: DEFAULT_RING_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            log_limit: DEFAULT_LOG_LIMIT,
            relay: RelayConfig::default(),
        }
    }

    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = timeout;
        self
    }

    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// Defaults overridden by `RTC_MESH_*` environment variables.
    pub fn from_env(self_id: impl Into<UserId>) -> Result<Self, ConfigError> {
        Self::from_lookup(self_id, |name| std::env::var(name).ok())
    }

    fn from_lookup(
        self_id: impl Into<UserId>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::new(self_id);

        if let Some(raw) = lookup(ENV_RING_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: ENV_RING_TIMEOUT_SECS,
                value: raw.clone(),
            })?;
            config.ring_timeout = Duration::from_secs(secs);
        }

        config.relay.endpoint = lookup(ENV_RELAY_URL).filter(|v| !v.is_empty());
        config.relay.username = lookup(ENV_RELAY_USER);
        config.relay.secret = lookup(ENV_RELAY_SECRET);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CallConfig::new("alice");
        assert_eq!(config.ring_timeout, Duration::from_secs(60));
        assert!(config.relay.endpoint.is_none());
        assert!(config.relay.cache_ttl.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = CallConfig::from_lookup(
            "alice",
            lookup(&[
                (ENV_RING_TIMEOUT_SECS, "15"),
                (ENV_RELAY_URL, "https://relay.example.net/_turn/app"),
                (ENV_RELAY_USER, "user"),
                (ENV_RELAY_SECRET, "secret"),
            ]),
        )
        .unwrap();

        assert_eq!(config.ring_timeout, Duration::from_secs(15));
        assert_eq!(
            config.relay.endpoint.as_deref(),
            Some("https://relay.example.net/_turn/app")
        );
        assert_eq!(config.relay.username.as_deref(), Some("user"));
    }

    #[test]
    fn test_invalid_timeout_is_rejected() {
        let err = CallConfig::from_lookup("alice", lookup(&[(ENV_RING_TIMEOUT_SECS, "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: ENV_RING_TIMEOUT_SECS,
                ..
            }
        ));
    }
}
