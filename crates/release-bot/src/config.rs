//! Configuration for the release bot service.
//!
//! Read once at startup and passed by value to the components that need it.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::dispatch::DispatchConfig;
use crate::tracker::github::GITHUB_API_URL;

/// Service configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Token for GitHub API calls.
    pub github_token: Option<String>,
    /// Webhook signing secret. Signatures are not checked without one.
    pub webhook_secret: Option<String>,
    /// Debug logging.
    pub debug: bool,
    /// GitHub API base URL (GitHub Enterprise installs differ).
    pub github_api_url: String,
    /// Worker pool sizing and job deadline.
    pub dispatch: DispatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            github_token: None,
            webhook_secret: None,
            debug: false,
            github_api_url: GITHUB_API_URL.to_string(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Config {
    /// Build from `RELEASE_BOT_*` environment variables, falling back to
    /// defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parsed("RELEASE_BOT_PORT").unwrap_or(defaults.port),
            github_token: non_empty("RELEASE_BOT_GITHUB_TOKEN"),
            webhook_secret: non_empty("RELEASE_BOT_WEBHOOK_SECRET"),
            debug: non_empty("RELEASE_BOT_DEBUG").is_some(),
            github_api_url: non_empty("GITHUB_API_URL").unwrap_or(defaults.github_api_url),
            dispatch: DispatchConfig {
                workers: parsed("RELEASE_BOT_WORKERS")
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.dispatch.workers),
                queue_depth: parsed("RELEASE_BOT_QUEUE_DEPTH")
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.dispatch.queue_depth),
                job_timeout: parsed("RELEASE_BOT_RECONCILE_TIMEOUT_SECS")
                    .filter(|n| *n > 0)
                    .map_or(defaults.dispatch.job_timeout, Duration::from_secs),
            },
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug |= debug;
        self
    }
}

// Keep secrets out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("debug", &self.debug)
            .field("github_api_url", &self.github_api_url)
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    non_empty(key).and_then(|s| s.trim().parse().ok())
}
