//! Client defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default per-request time budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings applied to a `Client` when its transport is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub user_agent: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Retries after the first failed attempt.
    pub retry_count: u32,
    /// Pause between attempts. Zero retries immediately.
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    pub follow_redirects: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("curlkit/{}", env!("CARGO_PKG_VERSION")),
            timeout: DEFAULT_TIMEOUT,
            retry_count: 0,
            retry_delay: Duration::ZERO,
            follow_redirects: true,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `CURLKIT_USER_AGENT`, `CURLKIT_TIMEOUT_SECS`,
    /// `CURLKIT_RETRY_COUNT` and `CURLKIT_RETRY_DELAY_MS`. Unparsable values
    /// are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(agent) = lookup("CURLKIT_USER_AGENT") {
            config.user_agent = agent;
        }
        if let Some(secs) = lookup("CURLKIT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(count) = lookup("CURLKIT_RETRY_COUNT").and_then(|v| v.parse().ok()) {
            config.retry_count = count;
        }
        if let Some(ms) = lookup("CURLKIT_RETRY_DELAY_MS").and_then(|v| v.parse().ok()) {
            config.retry_delay = Duration::from_millis(ms);
        }
        config
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
