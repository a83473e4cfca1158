//! Dispatcher Configuration
//!
//! Policy constants for retries, backoff, the global quota, and bucket
//! eviction. The remote contract pins none of these exactly, so they are
//! all configurable with documented defaults.

use std::time::Duration;

/// Configuration for one dispatcher instance.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Base URL prefixed to every route path.
    pub base_url: String,

    /// Credential attached verbatim as the `Authorization` header.
    /// Managing the credential (rotation, refresh) is the caller's concern.
    pub token: Option<String>,

    /// `User-Agent` sent with every exchange.
    pub user_agent: String,

    /// Per-exchange timeout.
    pub request_timeout: Duration,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Requeues allowed for a request that keeps getting 429s.
    pub max_rate_limit_retries: u32,

    /// Retries for 5xx responses and network failures.
    pub max_server_retries: u32,

    /// First 5xx/network retry delay; doubles on each further retry.
    pub backoff_initial: Duration,

    /// Ceiling for the doubled retry delay.
    pub backoff_cap: Duration,

    /// Global slots per window, shared across all buckets. The remote
    /// never discloses this ceiling in headers.
    pub global_limit: u32,

    /// Global window length.
    pub global_window: Duration,

    /// Idle time past a bucket's reset before its state is evicted.
    pub eviction_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_rate_limit_retries: 5,
            max_server_retries: 3,
            backoff_initial: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            global_limit: 50,
            global_window: Duration::from_secs(1),
            eviction_grace: Duration::from_secs(60),
        }
    }
}

impl DispatcherConfig {
    /// Default configuration against the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the `Authorization` credential.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Override the `User-Agent`.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DispatcherConfig::default();

        assert!(config.max_rate_limit_retries > 0);
        assert!(config.max_server_retries > 0);
        assert!(config.backoff_initial < config.backoff_cap);
        assert!(config.global_limit > 0);
    }

    #[test]
    fn builder_sets_credential() {
        let config = DispatcherConfig::new("https://api.example.com").token("Bot abc");

        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.token.as_deref(), Some("Bot abc"));
    }
}
