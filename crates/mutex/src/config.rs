// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{MutexError, Result};

/// Variant tag mixed into every identifier digest
pub const ENV_VARIANT_TAG: &str = "DBMUTEX_VARIANT_TAG";
/// Environment suffix for type-level mutex names
pub const ENV_ENVIRONMENT: &str = "DBMUTEX_ENV";
/// Characters of the lock name kept in display names
pub const ENV_DISPLAY_PREFIX_LEN: &str = "DBMUTEX_DISPLAY_PREFIX_LEN";
/// Default acquisition timeout in milliseconds
pub const ENV_DEFAULT_TIMEOUT_MS: &str = "DBMUTEX_DEFAULT_TIMEOUT_MS";

/// Mutex configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutexConfig {
    /// Tag hashed together with each name; mutexes with different tags never collide
    #[serde(default = "default_variant_tag")]
    pub variant_tag: String,

    /// Appended as `@environment` to type-level mutex names
    #[serde(default)]
    pub environment: Option<String>,

    /// Length of the readable name prefix in display names
    #[serde(default = "default_display_prefix_len")]
    pub display_prefix_len: usize,

    /// Timeout used by registry-issued options; `None` waits on the database
    #[serde(default)]
    pub default_timeout: Option<Duration>,
}

impl Default for MutexConfig {
    fn default() -> Self {
        Self {
            variant_tag: default_variant_tag(),
            environment: None,
            display_prefix_len: default_display_prefix_len(),
            default_timeout: None,
        }
    }
}

fn default_variant_tag() -> String {
    "dbmutex".to_string()
}

fn default_display_prefix_len() -> usize {
    32
}

fn env_opt_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_opt_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl MutexConfig {
    /// Build configuration from `DBMUTEX_*` environment variables.
    /// Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            variant_tag: env_opt_str(ENV_VARIANT_TAG).unwrap_or(defaults.variant_tag),
            environment: env_opt_str(ENV_ENVIRONMENT),
            display_prefix_len: env_opt_parse(ENV_DISPLAY_PREFIX_LEN).unwrap_or(defaults.display_prefix_len),
            default_timeout: env_opt_parse::<u64>(ENV_DEFAULT_TIMEOUT_MS).map(Duration::from_millis),
        }
    }

    /// Set the environment suffix
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Set the variant tag
    pub fn with_variant_tag(mut self, variant_tag: impl Into<String>) -> Self {
        self.variant_tag = variant_tag.into();
        self
    }

    /// Set the default timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.variant_tag.is_empty() {
            return Err(MutexError::invalid_argument("Variant tag must not be empty"));
        }

        if self.display_prefix_len == 0 {
            return Err(MutexError::invalid_argument("Display prefix length must be greater than zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MutexConfig::default();
        assert_eq!(config.variant_tag, "dbmutex");
        assert_eq!(config.environment, None);
        assert_eq!(config.display_prefix_len, 32);
        assert_eq!(config.default_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = MutexConfig::default();
        config.variant_tag.clear();
        assert!(matches!(config.validate(), Err(MutexError::InvalidArgument { .. })));

        let mut config = MutexConfig::default();
        config.display_prefix_len = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env() {
        temp_env::with_vars(
            [
                (ENV_VARIANT_TAG, Some("billing")),
                (ENV_ENVIRONMENT, Some("test")),
                (ENV_DISPLAY_PREFIX_LEN, Some("8")),
                (ENV_DEFAULT_TIMEOUT_MS, Some("2500")),
            ],
            || {
                let config = MutexConfig::from_env();
                assert_eq!(config.variant_tag, "billing");
                assert_eq!(config.environment.as_deref(), Some("test"));
                assert_eq!(config.display_prefix_len, 8);
                assert_eq!(config.default_timeout, Some(Duration::from_millis(2500)));
            },
        );
    }

    #[test]
    fn test_from_env_falls_back() {
        temp_env::with_vars(
            [
                (ENV_VARIANT_TAG, Some("  ")),
                (ENV_ENVIRONMENT, None),
                (ENV_DISPLAY_PREFIX_LEN, Some("many")),
                (ENV_DEFAULT_TIMEOUT_MS, None),
            ],
            || {
                assert_eq!(MutexConfig::from_env(), MutexConfig::default());
            },
        );
    }

    #[test]
    fn test_serialization() {
        let config = MutexConfig::default()
            .with_environment("production")
            .with_default_timeout(Duration::from_secs(5));
        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: MutexConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(config, deserialized);

        let partial: MutexConfig = serde_json::from_str(r#"{"environment": "staging"}"#).unwrap();
        assert_eq!(partial.variant_tag, "dbmutex");
        assert_eq!(partial.environment.as_deref(), Some("staging"));
    }
}
