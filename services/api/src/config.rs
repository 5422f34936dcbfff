use ailab_core::gateway::GeminiConfig;
use ailab_core::gateway::gemini::{DEFAULT_API_BASE, DEFAULT_MODEL, DEFAULT_TTS_MODEL, DEFAULT_VOICE};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub storage_path: PathBuf,
    pub gemini: GeminiConfig,
    /// Key used for every learner until one enters their own.
    pub gemini_api_key: Option<String>,
    pub log_level: Level,
}

/// Reads `name`, falling back to `default` when unset. A set but blank value is an error.
fn var_or(name: &str, default: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => Err(ConfigError::MissingVar(format!(
            "{name} is set but empty"
        ))),
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => Ok(default.to_string()),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000")?;
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let storage_path = PathBuf::from(var_or("STORAGE_PATH", "./ailab-storage.json")?);

        let api_base = var_or("GEMINI_API_BASE", DEFAULT_API_BASE)?;
        if !(api_base.starts_with("http://") || api_base.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "GEMINI_API_BASE".to_string(),
                format!("'{}' is not an http(s) URL", api_base),
            ));
        }
        let gemini = GeminiConfig {
            api_base,
            model: var_or("GEMINI_MODEL", DEFAULT_MODEL)?,
            tts_model: var_or("GEMINI_TTS_MODEL", DEFAULT_TTS_MODEL)?,
            voice: var_or("GEMINI_VOICE", DEFAULT_VOICE)?,
        };

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            storage_path,
            gemini,
            gemini_api_key,
            log_level,
        })
    }
}
