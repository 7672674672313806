//! Client and channel configuration.
//!
//! `ClientConfig` drives the secure request client and can be loaded from `NIU_*`
//! environment variables. `ChannelConfig` drives one persistent channel and is the
//! `data` of the broker's `connect` command.

use crate::{Error, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use niu_core::retry::{ExponentialBackoff, DEFAULT_BASE_DELAY};
use niu_platform::Platform;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default refresh endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "/v1/auth/refresh";
/// Default logout endpoint.
pub const DEFAULT_LOGOUT_PATH: &str = "/v1/auth/logout";
/// Default login page.
pub const DEFAULT_LOGIN_PATH: &str = "/login";
/// Default storage key of the public secret bundle.
pub const DEFAULT_SECRET_PUBLIC_NAME: &str = "sk1";
/// Default storage key of the private secret bundle.
pub const DEFAULT_SECRET_PRIVATE_NAME: &str = "sk2";
/// Default storage key of the bearer token.
pub const DEFAULT_TOKEN_NAME: &str = "token";
/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Which methods the transport retry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMode {
    /// Retry every method.
    #[default]
    All,
    /// Retry only GET, PUT and DELETE.
    IdempotentOnly,
}

/// Secure request client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// API base URL, prefixed to every request path.
    pub api_base_url: String,
    /// Path of the session refresh endpoint.
    pub refresh_path: String,
    /// Path of the logout endpoint.
    pub logout_path: String,
    /// Login page location used for redirects.
    pub login_path: String,
    /// Encrypt POST/PUT bodies.
    pub enable_crypto: bool,
    /// Server Ed25519 public key used to verify responses.
    pub server_sign_key: [u8; 32],
    /// Server X25519 public key used for body encryption.
    pub server_box_key: [u8; 32],
    /// Platform reported in `x-platform`.
    pub platform: Platform,
    /// Storage key of the public secret bundle.
    pub secret_public_name: String,
    /// Storage key of the private secret bundle.
    pub secret_private_name: String,
    /// Storage key of the bearer token.
    pub token_name: String,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
    /// Transport retry policy.
    pub retry: ExponentialBackoff,
    /// Methods eligible for transport retry.
    pub retry_mode: RetryMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            refresh_path: DEFAULT_REFRESH_PATH.into(),
            logout_path: DEFAULT_LOGOUT_PATH.into(),
            login_path: DEFAULT_LOGIN_PATH.into(),
            enable_crypto: true,
            server_sign_key: [0u8; 32],
            server_box_key: [0u8; 32],
            platform: Platform::Browser,
            secret_public_name: DEFAULT_SECRET_PUBLIC_NAME.into(),
            secret_private_name: DEFAULT_SECRET_PRIVATE_NAME.into(),
            token_name: DEFAULT_TOKEN_NAME.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: ExponentialBackoff::http(),
            retry_mode: RetryMode::All,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("refresh_path", &self.refresh_path)
            .field("login_path", &self.login_path)
            .field("enable_crypto", &self.enable_crypto)
            .field("platform", &self.platform)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .field("retry_mode", &self.retry_mode)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Configuration for `api_base_url` with the server's public keys.
    pub fn new(
        api_base_url: impl Into<String>,
        server_sign_key: [u8; 32],
        server_box_key: [u8; 32],
    ) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            server_sign_key,
            server_box_key,
            ..Self::default()
        }
    }

    /// Load from `NIU_*` environment variables on top of the defaults.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `NIU_API_BASE_URL` | `api_base_url` (required) |
    /// | `NIU_API_REFRESH_TOKEN_PATH` | `refresh_path` |
    /// | `NIU_API_LOGOUT_PATH` | `logout_path` |
    /// | `NIU_LOGIN_URL` | `login_path` |
    /// | `NIU_ENABLE_CRYPTO` | `enable_crypto` (`true`/`false`) |
    /// | `NIU_SERVER_SIGN_KEY` | `server_sign_key` (base64, required) |
    /// | `NIU_SERVER_BOX_KEY` | `server_box_key` (base64) |
    /// | `NIU_PLATFORM` | `platform` (name or id) |
    /// | `NIU_SECRET_PUBLIC_NAME` | `secret_public_name` |
    /// | `NIU_SECRET_PRIVATE_NAME` | `secret_private_name` |
    /// | `NIU_REQUEST_TIMEOUT_MS` | `request_timeout` |
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for malformed values or when `validate` fails.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("NIU_API_BASE_URL") {
            config.api_base_url = v;
        }
        if let Some(v) = lookup("NIU_API_REFRESH_TOKEN_PATH") {
            config.refresh_path = v;
        }
        if let Some(v) = lookup("NIU_API_LOGOUT_PATH") {
            config.logout_path = v;
        }
        if let Some(v) = lookup("NIU_LOGIN_URL") {
            config.login_path = v;
        }
        if let Some(v) = lookup("NIU_ENABLE_CRYPTO") {
            config.enable_crypto = parse_bool("NIU_ENABLE_CRYPTO", &v)?;
        }
        if let Some(v) = lookup("NIU_SERVER_SIGN_KEY") {
            config.server_sign_key = parse_key("NIU_SERVER_SIGN_KEY", &v)?;
        }
        if let Some(v) = lookup("NIU_SERVER_BOX_KEY") {
            config.server_box_key = parse_key("NIU_SERVER_BOX_KEY", &v)?;
        }
        if let Some(v) = lookup("NIU_PLATFORM") {
            config.platform = v
                .parse()
                .map_err(|e| Error::Config(format!("NIU_PLATFORM: {}", e)))?;
        }
        if let Some(v) = lookup("NIU_SECRET_PUBLIC_NAME") {
            config.secret_public_name = v;
        }
        if let Some(v) = lookup("NIU_SECRET_PRIVATE_NAME") {
            config.secret_private_name = v;
        }
        if let Some(v) = lookup("NIU_REQUEST_TIMEOUT_MS") {
            let ms = v
                .trim()
                .parse::<u64>()
                .map_err(|e| Error::Config(format!("NIU_REQUEST_TIMEOUT_MS: {}", e)))?;
            config.request_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the refresh endpoint path.
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Set the logout endpoint path.
    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = path.into();
        self
    }

    /// Set the login page location.
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Enable or disable body encryption.
    pub fn with_crypto(mut self, enabled: bool) -> Self {
        self.enable_crypto = enabled;
        self
    }

    /// Set the reported platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Set the secret bundle storage keys.
    pub fn with_secret_names(
        mut self,
        public_name: impl Into<String>,
        private_name: impl Into<String>,
    ) -> Self {
        self.secret_public_name = public_name.into();
        self.secret_private_name = private_name.into();
        self
    }

    /// Set the bearer token storage key.
    pub fn with_token_name(mut self, name: impl Into<String>) -> Self {
        self.token_name = name.into();
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the transport retry policy.
    pub fn with_retry(mut self, retry: ExponentialBackoff) -> Self {
        self.retry = retry;
        self
    }

    /// Restrict or widen transport retry.
    pub fn with_retry_mode(mut self, mode: RetryMode) -> Self {
        self.retry_mode = mode;
        self
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.is_empty() {
            return Err(Error::Config("api_base_url is required".into()));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "api_base_url must be http(s): {}",
                self.api_base_url
            )));
        }
        for (name, path) in [
            ("refresh_path", &self.refresh_path),
            ("logout_path", &self.logout_path),
            ("login_path", &self.login_path),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(format!("{} must start with '/': {}", name, path)));
            }
        }
        if self.server_sign_key == [0u8; 32] {
            return Err(Error::Config("server_sign_key is required".into()));
        }
        if self.enable_crypto && self.server_box_key == [0u8; 32] {
            return Err(Error::Config(
                "server_box_key is required when crypto is enabled".into(),
            ));
        }
        if self.secret_public_name.is_empty()
            || self.secret_private_name.is_empty()
            || self.secret_public_name == self.secret_private_name
        {
            return Err(Error::Config(
                "secret bundle names must be distinct and non-empty".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request_timeout must be positive".into()));
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::Config(format!("{}: expected a boolean, got {}", name, other))),
    }
}

fn parse_key(name: &str, value: &str) -> Result<[u8; 32]> {
    let value = value.trim();
    let bytes = STANDARD
        .decode(value)
        .or_else(|_| URL_SAFE_NO_PAD.decode(value.trim_end_matches('=')))
        .map_err(|e| Error::Config(format!("{}: {}", name, e)))?;

    bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::Config(format!("{}: expected 32 bytes, got {}", name, bytes.len())))
}

/// Persistent channel configuration.
///
/// Deserializes from the broker's `connect` command data:
///
/// ```
/// use niu_transport::config::ChannelConfig;
///
/// let config: ChannelConfig = serde_json::from_str(
///     r#"{"url":"wss://localhost:8001/hub/chat","subprotocol":["niu-v1"],
///         "heartbeatInterval":10000,"maxRetryAttempts":10}"#,
/// ).unwrap();
/// assert_eq!(config.heartbeat().as_millis(), 10_000);
/// assert_eq!(config.pong_timeout().as_millis(), 20_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// WebSocket URL.
    pub url: String,
    /// Requested subprotocols.
    #[serde(default)]
    pub subprotocol: Vec<String>,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval: u64,
    /// Reconnect attempts before giving up.
    pub max_retry_attempts: u32,
    /// How long a ping may go unanswered, in milliseconds; twice the heartbeat
    /// when absent. Checked on each heartbeat tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pong_timeout: Option<u64>,
    /// Reconnect base delay in milliseconds.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: u64,
}

fn default_retry_base_delay() -> u64 {
    DEFAULT_BASE_DELAY.as_millis() as u64
}

impl ChannelConfig {
    /// Configuration for `url` with a 10 s heartbeat and 10 reconnect attempts.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subprotocol: Vec::new(),
            heartbeat_interval: 10_000,
            max_retry_attempts: niu_core::retry::CHANNEL_MAX_ATTEMPTS,
            pong_timeout: None,
            retry_base_delay: default_retry_base_delay(),
        }
    }

    /// Add a requested subprotocol.
    pub fn with_subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocol.push(protocol.into());
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.as_millis() as u64;
        self
    }

    /// Set the reconnect attempt limit.
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Set the pong liveness window.
    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the reconnect base delay.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay.as_millis() as u64;
        self
    }

    /// Heartbeat interval.
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    /// Effective pong liveness window.
    pub fn pong_timeout(&self) -> Duration {
        self.pong_timeout
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.heartbeat().saturating_mul(2))
    }

    /// Reconnect policy.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.retry_base_delay),
            self.max_retry_attempts,
        )
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(Error::Config(format!("channel url must be ws(s): {}", self.url)));
        }
        if self.heartbeat_interval == 0 {
            return Err(Error::Config("heartbeatInterval must be positive".into()));
        }
        if self.pong_timeout() < self.heartbeat() {
            return Err(Error::Config(
                "pongTimeout must not be shorter than heartbeatInterval".into(),
            ));
        }
        Ok(())
    }
}
