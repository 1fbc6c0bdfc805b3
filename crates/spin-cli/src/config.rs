//! Client configuration loaded from environment variables.
//!
//! Only the credentials are required; everything else defaults to the
//! public spin.de endpoints.

use std::time::Duration;

use spin_net::{ClientConfig, SessionConfig};
use spin_shared::constants::{DEFAULT_CHAT_HOST, DEFAULT_CHAT_PORT, KEEPALIVE_INTERVAL_SECS};
use spin_shared::AwayReplyPolicy;

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Env: `SPIN_USERNAME`
    pub username: String,

    /// Env: `SPIN_PASSWORD`
    pub password: String,

    /// Chat server host.
    /// Env: `SPIN_SERVER`
    /// Default: `www.spin.de`
    pub server: String,

    /// Env: `SPIN_PORT`
    /// Default: `3003`
    pub port: u16,

    /// Log in to the web API over HTTPS.
    /// Env: `SPIN_SECURE_LOGIN` (true/false)
    /// Default: `true`
    pub secure_login: bool,

    /// Overrides the pattern used to highlight mentions.
    /// Env: `SPIN_NICK_REGEX`
    pub nick_regex: Option<String>,

    /// When to reply to private messages while away.
    /// Env: `SPIN_SHOW_AWAY` (`always`, `never`, `non-buddies`)
    /// Default: `always`
    pub show_away: AwayReplyPolicy,

    /// Env: `SPIN_KEEPALIVE_SECS`
    /// Default: `30`
    pub keepalive_secs: u64,

    /// Env: `SPIN_WEB_BASE`
    pub web_base: Option<String>,

    /// Env: `SPIN_LAST_MAIL_CHECK`
    pub last_mail_check: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            server: DEFAULT_CHAT_HOST.to_string(),
            port: DEFAULT_CHAT_PORT,
            secure_login: true,
            nick_regex: None,
            show_away: AwayReplyPolicy::default(),
            keepalive_secs: KEEPALIVE_INTERVAL_SECS,
            web_base: None,
            last_mail_check: String::new(),
        }
    }
}

impl CliConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(user) = var("SPIN_USERNAME") {
            config.username = user;
        }

        if let Some(password) = var("SPIN_PASSWORD") {
            config.password = password;
        }

        if let Some(server) = var("SPIN_SERVER") {
            config.server = server;
        }

        if let Some(val) = var("SPIN_PORT") {
            match val.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => tracing::warn!(value = %val, "Invalid SPIN_PORT, using default"),
            }
        }

        if let Some(val) = var("SPIN_SECURE_LOGIN") {
            config.secure_login = val != "false" && val != "0";
        }

        if let Some(pattern) = var("SPIN_NICK_REGEX") {
            if !pattern.is_empty() {
                config.nick_regex = Some(pattern);
            }
        }

        if let Some(val) = var("SPIN_SHOW_AWAY") {
            match val.parse::<AwayReplyPolicy>() {
                Ok(policy) => config.show_away = policy,
                Err(e) => tracing::warn!(value = %val, error = %e, "Invalid SPIN_SHOW_AWAY, using default"),
            }
        }

        if let Some(val) = var("SPIN_KEEPALIVE_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.keepalive_secs = secs,
                _ => tracing::warn!(value = %val, "Invalid SPIN_KEEPALIVE_SECS, using default"),
            }
        }

        if let Some(base) = var("SPIN_WEB_BASE") {
            config.web_base = Some(base.trim_end_matches('/').to_string());
        }

        if let Some(stamp) = var("SPIN_LAST_MAIL_CHECK") {
            config.last_mail_check = stamp;
        }

        config
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut session = SessionConfig {
            username: self.username.clone(),
            password: self.password.clone(),
            secure_login: self.secure_login,
            away_policy: self.show_away,
            nick_pattern: self.nick_regex.clone(),
            last_mail_check: self.last_mail_check.clone(),
            ..Default::default()
        };
        if let Some(base) = &self.web_base {
            session.web_base = base.clone();
        }

        ClientConfig {
            session,
            host: self.server.clone(),
            port: self.port,
            keepalive_interval: Duration::from_secs(self.keepalive_secs),
        }
    }
}
