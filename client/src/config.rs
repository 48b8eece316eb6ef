use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://apis.roblox.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every handle built from it
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: concat!("opencloud-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a config from `OPENCLOUD_*` environment variables, keeping the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var("OPENCLOUD_BASE_URL") {
            config = config.with_base_url(base_url);
        }

        if let Ok(raw) = std::env::var("OPENCLOUD_TIMEOUT_SECS") {
            let secs = raw.parse::<u64>().map_err(|_| {
                Error::Config(format!("OPENCLOUD_TIMEOUT_SECS must be an integer, got '{raw}'"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        if let Ok(user_agent) = std::env::var("OPENCLOUD_USER_AGENT") {
            config.user_agent = user_agent;
        }

        Ok(config)
    }
}
