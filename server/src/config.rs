use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dealroom realtime chat service
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "dealroom-chat", version, about = "Dealroom realtime chat service")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "DEALROOM_PORT", default_value = "1984")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "DEALROOM_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./dealroom-chat.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "DEALROOM_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, identity secret)
    #[arg(long, env = "DEALROOM_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Quiet interval after the last typing signal, in milliseconds
    #[arg(long, env = "DEALROOM_TYPING_QUIET_MS", default_value = "2000")]
    pub typing_quiet_ms: u64,

    /// Seconds between server heartbeat pings
    #[arg(long, env = "DEALROOM_HEARTBEAT_INTERVAL_SECS", default_value = "10")]
    pub heartbeat_interval_secs: u64,

    /// Seconds to wait for a pong before dropping the connection
    #[arg(long, env = "DEALROOM_HEARTBEAT_TIMEOUT_SECS", default_value = "15")]
    pub heartbeat_timeout_secs: u64,

    /// Retries against the message store before reporting it unavailable
    #[arg(long, env = "DEALROOM_STORE_RETRY_ATTEMPTS", default_value = "3")]
    pub store_retry_attempts: u32,

    /// Initial store retry backoff in milliseconds (doubled per retry)
    #[arg(long, env = "DEALROOM_STORE_RETRY_BACKOFF_MS", default_value = "50")]
    pub store_retry_backoff_ms: u64,

    /// Page size used by fetchMessages when the caller gives none
    #[arg(long, env = "DEALROOM_DEFAULT_PAGE_SIZE", default_value = "50")]
    pub default_page_size: u32,

    /// Upper bound for a requested page size
    #[arg(long, env = "DEALROOM_MAX_PAGE_SIZE", default_value = "200")]
    pub max_page_size: u32,

    /// Maximum message text length (chars)
    #[arg(long, env = "DEALROOM_MAX_TEXT_LENGTH", default_value = "4000")]
    pub max_text_length: usize,

    /// Shared secret expected in X-Notify-Token on the collaboration webhook
    #[arg(long, env = "DEALROOM_NOTIFY_TOKEN")]
    pub notify_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1984,
            bind_address: "0.0.0.0".to_string(),
            config: "./dealroom-chat.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            typing_quiet_ms: 2000,
            heartbeat_interval_secs: 10,
            heartbeat_timeout_secs: 15,
            store_retry_attempts: 3,
            store_retry_backoff_ms: 50,
            default_page_size: 50,
            max_page_size: 200,
            max_text_length: 4000,
            notify_token: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (DEALROOM_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("DEALROOM_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// Runtime knobs consumed by the chat service and connection actors.
    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            typing_quiet: Duration::from_millis(self.typing_quiet_ms),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            store_retry_attempts: self.store_retry_attempts,
            store_retry_backoff: Duration::from_millis(self.store_retry_backoff_ms),
            default_page_size: self.default_page_size.max(1),
            max_page_size: self.max_page_size.max(1),
            max_text_length: self.max_text_length,
            notify_token: self.notify_token.clone().filter(|t| !t.is_empty()),
        }
    }
}

/// Settings carried in `AppState`.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub typing_quiet: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub store_retry_attempts: u32,
    pub store_retry_backoff: Duration,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub max_text_length: usize,
    pub notify_token: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Config::default().chat_settings()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Dealroom Chat Service Configuration
# Place this file at ./dealroom-chat.toml or specify with --config <path>
# All settings can be overridden via environment variables (DEALROOM_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 1984)
# port = 1984

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and identity token secret
# data_dir = "./data"

# ---- Typing indicators ----
# Quiet interval after which a typing indicator clears on its own (ms)
# typing_quiet_ms = 2000

# ---- Connections ----
# Heartbeat ping cadence and pong deadline (seconds)
# heartbeat_interval_secs = 10
# heartbeat_timeout_secs = 15

# ---- Message store ----
# Bounded retries before a send is reported as store_unavailable
# store_retry_attempts = 3
# store_retry_backoff_ms = 50

# History page sizes
# default_page_size = 50
# max_page_size = 200

# Maximum message length in characters
# max_text_length = 4000

# ---- Collaboration notifications ----
# When set, POST /api/collaborations/notify requires X-Notify-Token
# notify_token = ""
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_project_into_settings() {
        let settings = Config::default().chat_settings();
        assert_eq!(settings.typing_quiet, Duration::from_millis(2000));
        assert_eq!(settings.heartbeat_timeout, Duration::from_secs(15));
        assert_eq!(settings.store_retry_attempts, 3);
        assert!(settings.notify_token.is_none());
    }

    #[test]
    fn empty_notify_token_is_disabled() {
        let config = Config {
            notify_token: Some(String::new()),
            ..Config::default()
        };
        assert!(config.chat_settings().notify_token.is_none());
    }

    #[test]
    fn template_mentions_every_section() {
        let template = generate_config_template();
        assert!(template.contains("typing_quiet_ms"));
        assert!(template.contains("heartbeat_timeout_secs"));
        assert!(template.contains("store_retry_attempts"));
    }
}
