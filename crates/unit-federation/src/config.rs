//! Federation configuration.
//!
//! Loaded from environment variables with defaults suitable for local
//! development.

use std::time::Duration;

use unit_org::DEFAULT_PROJECT_TIMEOUT_MS;

use crate::login::MappingPolicy;

/// Configuration for the federation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederationConfig {
    /// Timeout used for projects that do not set their own
    pub default_timeout_ms: u64,

    /// What a login does when mapping fails
    pub policy: MappingPolicy,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_PROJECT_TIMEOUT_MS,
            policy: MappingPolicy::Strict,
        }
    }
}

impl FederationConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FEDERATION_TIMEOUT_MS`: provisioning timeout in milliseconds (default: 5000)
    /// - `FEDERATION_STRICT_MAPPING`: fail logins when mapping fails (default: true)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            default_timeout_ms: std::env::var("FEDERATION_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(default.default_timeout_ms),
            policy: std::env::var("FEDERATION_STRICT_MAPPING")
                .map(|s| {
                    if s == "false" || s == "0" {
                        MappingPolicy::BestEffort
                    } else {
                        MappingPolicy::Strict
                    }
                })
                .unwrap_or(default.policy),
        }
    }

    /// Default provisioning timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FederationConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.policy, MappingPolicy::Strict);
    }
}
