use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config_env::{
    optional_trimmed_env, parse_bool_env, parse_u32_env, parse_u64_env, require_env,
    string_env_or,
};

pub const DEFAULT_KEY_PREFIX: &str = "handy";
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 60 * 60 * 24;
pub const DEFAULT_CHAT_SESSION_TTL_SECONDS: u64 = 60 * 60 * 24;
pub const DEFAULT_OFFER_WINDOW_SECONDS: u64 = 5 * 60;
pub const DEFAULT_WHATSAPP_API_URL: &str = "https://graph.facebook.com/v21.0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid boolean in env var {0}")]
    ParseBool(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Where conversation and chat-bridge records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionBackend {
    Redis {
        url: String,
        /// Use a process-local store when Redis cannot be reached at startup.
        fallback_to_memory: bool,
    },
    /// Process-local store. Records do not survive a restart.
    Memory,
}

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub api_url: String,
    pub phone_number_id: Option<String>,
    pub access_token: Option<String>,
    pub verify_token: String,
}

#[derive(Debug, Clone)]
pub struct MarketplaceSettings {
    pub key_prefix: String,
    pub session_ttl: Duration,
    pub chat_session_ttl: Duration,
    pub offer_window: Duration,
}

impl Default for MarketplaceSettings {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECONDS),
            chat_session_ttl: Duration::from_secs(DEFAULT_CHAT_SESSION_TTL_SECONDS),
            offer_window: Duration::from_secs(DEFAULT_OFFER_WINDOW_SECONDS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub migrations_dir: PathBuf,
    pub session_backend: SessionBackend,
    pub marketplace: MarketplaceSettings,
    pub whatsapp: WhatsAppConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let session_backend = match string_env_or("SESSION_BACKEND", "redis")
            .to_ascii_lowercase()
            .as_str()
        {
            "redis" => SessionBackend::Redis {
                url: require_env("REDIS_URL")?,
                fallback_to_memory: parse_bool_env("SESSION_FALLBACK_TO_MEMORY", false)?,
            },
            "memory" => SessionBackend::Memory,
            other => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "SESSION_BACKEND must be 'redis' or 'memory', got '{other}'"
                )));
            }
        };

        let config = Self {
            bind_addr: string_env_or("WEBHOOK_BIND_ADDR", "127.0.0.1:8080"),
            database_url: require_env("DATABASE_URL")?,
            database_max_connections: parse_u32_env("DATABASE_MAX_CONNECTIONS", 10)?,
            migrations_dir: optional_trimmed_env("MIGRATIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../db/migrations")
                }),
            session_backend,
            marketplace: MarketplaceSettings {
                key_prefix: string_env_or("SESSION_KEY_PREFIX", DEFAULT_KEY_PREFIX),
                session_ttl: Duration::from_secs(parse_u64_env(
                    "SESSION_TTL_SECONDS",
                    DEFAULT_SESSION_TTL_SECONDS,
                )?),
                chat_session_ttl: Duration::from_secs(parse_u64_env(
                    "CHAT_SESSION_TTL_SECONDS",
                    DEFAULT_CHAT_SESSION_TTL_SECONDS,
                )?),
                offer_window: Duration::from_secs(parse_u64_env(
                    "OFFER_WINDOW_SECONDS",
                    DEFAULT_OFFER_WINDOW_SECONDS,
                )?),
            },
            whatsapp: WhatsAppConfig {
                api_url: string_env_or("WHATSAPP_API_URL", DEFAULT_WHATSAPP_API_URL),
                phone_number_id: optional_trimmed_env("WHATSAPP_PHONE_NUMBER_ID"),
                access_token: optional_trimmed_env("WHATSAPP_ACCESS_TOKEN"),
                verify_token: require_env("WHATSAPP_VERIFY_TOKEN")?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_max_connections == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "DATABASE_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }
        self.marketplace.validate()?;
        self.whatsapp.validate()
    }
}

impl MarketplaceSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_prefix.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidConfiguration(
                "SESSION_KEY_PREFIX must not contain whitespace".to_string(),
            ));
        }
        if self.session_ttl.is_zero() {
            return Err(ConfigError::InvalidConfiguration(
                "SESSION_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.chat_session_ttl.is_zero() {
            return Err(ConfigError::InvalidConfiguration(
                "CHAT_SESSION_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.offer_window.is_zero() {
            return Err(ConfigError::InvalidConfiguration(
                "OFFER_WINDOW_SECONDS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl WhatsAppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = Url::parse(&self.api_url).map_err(|err| {
            ConfigError::InvalidConfiguration(format!("WHATSAPP_API_URL is not a valid URL: {err}"))
        })?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(ConfigError::InvalidConfiguration(
                "WHATSAPP_API_URL must use http or https".to_string(),
            ));
        }
        if self.verify_token.is_empty() {
            return Err(ConfigError::InvalidConfiguration(
                "WHATSAPP_VERIFY_TOKEN must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Sends are simulated unless both the phone number id and token are set.
    pub fn delivery_enabled(&self) -> bool {
        self.phone_number_id.is_some() && self.access_token.is_some()
    }
}
