//! Command line and environment configuration.
//!
//! Precedence, highest first:
//! 1. `--config/-c` flag (falls back to `MCP_CONFIG_PATH`)
//! 2. `MCP_HOST__*` environment variables, e.g. `MCP_HOST__MODEL`
//! 3. Built-in defaults
//!
//! The API key is always read from `ANTHROPIC_API_KEY`.

use std::time::Duration;

use clap::Parser;
use config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;

use crate::llm::orchestrator::DEFAULT_FOLLOW_UP_DEPTH;
use crate::llm::{DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, HostOptions, LlmSettings};
use crate::mcp::client::ClientTimeouts;
use crate::mcp::registry::CollisionPolicy;

/// Environment variable holding the LLM API key.
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Prefix for host settings in the environment.
pub const ENV_PREFIX: &str = "MCP_HOST";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Chat with an LLM that can call MCP tool servers",
    long_about = None
)]
pub struct Cli {
    /// Path to the MCP server configuration file
    #[arg(short, long, env = "MCP_CONFIG_PATH")]
    pub config: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("no server configuration given: pass --config or set MCP_CONFIG_PATH")]
    MissingConfigPath,

    #[error("ANTHROPIC_API_KEY is not set")]
    MissingApiKey,

    #[error("invalid host settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("invalid host settings: {0}")]
    Invalid(String),
}

/// Tunables layered from defaults and `MCP_HOST__*` variables.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HostSettings {
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub init_timeout_secs: u64,
    pub llm_timeout_secs: u64,
    pub follow_up_depth: usize,
    pub collision_policy: CollisionPolicy,
}

impl HostSettings {
    pub fn load() -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .set_default("model", DEFAULT_MODEL)?
            .set_default("base_url", DEFAULT_BASE_URL)?
            .set_default("max_tokens", i64::from(DEFAULT_MAX_TOKENS))?
            .set_default("request_timeout_secs", 30)?
            .set_default("init_timeout_secs", 30)?
            .set_default("llm_timeout_secs", 120)?
            .set_default("follow_up_depth", i64::try_from(DEFAULT_FOLLOW_UP_DEPTH).unwrap_or(1))?
            .set_default("collision_policy", CollisionPolicy::default().to_string())?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model cannot be empty".into()));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be positive".into()));
        }
        for (key, secs) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("init_timeout_secs", self.init_timeout_secs),
            ("llm_timeout_secs", self.llm_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be positive")));
            }
        }
        Ok(())
    }
}

/// Everything the binary needs to start.
#[derive(Clone)]
pub struct AppConfig {
    pub config_path: String,
    pub api_key: String,
    pub host: HostSettings,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("config_path", &self.config_path)
            .field("api_key", &"<redacted>")
            .field("host", &self.host)
            .finish()
    }
}

impl AppConfig {
    /// Parse the process arguments. Usage errors, `--help` and `--version`
    /// come back as [`ConfigError::Cli`] instead of exiting.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(Cli::try_parse()?)
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::from_cli(Cli::try_parse_from(args)?)
    }

    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let config_path = cli
            .config
            .filter(|p| !p.trim().is_empty())
            .ok_or(ConfigError::MissingConfigPath)?;

        let api_key = std::env::var(API_KEY_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        Ok(Self {
            config_path,
            api_key,
            host: HostSettings::load()?,
        })
    }

    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            base_url: self.host.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.host.model.clone(),
            max_tokens: self.host.max_tokens,
            timeout: Duration::from_secs(self.host.llm_timeout_secs),
        }
    }

    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            follow_up_depth: self.host.follow_up_depth,
            collision_policy: self.host.collision_policy,
            client_timeouts: ClientTimeouts {
                request: Duration::from_secs(self.host.request_timeout_secs),
                initialize: Duration::from_secs(self.host.init_timeout_secs),
            },
        }
    }
}
