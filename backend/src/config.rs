//! Configuration management.

use crate::llm::InferenceSettings;
use crate::paths::{DataPaths, PathConfig};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Name of the per-directory config file.
const LOCAL_CONFIG_FILE: &str = ".legal-mcp.toml";

/// Prefix of configuration environment variables.
const ENV_PREFIX: &str = "LEGAL_MCP_";

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    inference: InferenceSettings,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    auth: AuthSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_port")]
    port: u16,
    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StorageConfig {
    data_dir: Option<PathBuf>,
    documents_path: Option<PathBuf>,
    prompts_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionConfig {
    /// Idle time after which a session is closed; 0 disables the sweep
    #[serde(default = "default_idle_timeout")]
    idle_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct AuthSection {
    api_key: Option<String>,
}

fn default_port() -> u16 {
    legal_mcp_types::DEFAULT_PORT
}

fn default_idle_timeout() -> u64 {
    3600
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on
    pub port: u16,
    /// Allowed CORS origins (empty = any)
    pub allowed_origins: Vec<String>,
    /// Directory of PDF documents
    pub documents_path: PathBuf,
    /// Prompt library file
    pub prompts_path: PathBuf,
    /// Anthropic API connection
    pub inference: InferenceSettings,
    /// Idle session expiry (`None` disables it)
    pub session_idle_timeout: Option<Duration>,
    /// API key protecting the MCP endpoint
    pub api_key: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `config.toml` in user config directory (~/.config/legal-mcp/ on Linux)
    /// 2. `.legal-mcp.toml` in current directory
    ///
    /// Environment variables use the `LEGAL_MCP_` prefix with `__` between
    /// section and key, e.g. `LEGAL_MCP_SERVER__PORT`.
    pub fn from_figment(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        documents_path: Option<PathBuf>,
        prompts_path: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(LOCAL_CONFIG_FILE));
        let user_config = directories::ProjectDirs::from("", "", "legal-mcp")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // Priority: defaults < user config < local config < env vars < CLI args
        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile::default()));

        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(p) = port {
            figment = figment.merge(Serialized::default("server.port", p));
        }
        if let Some(ref dd) = data_dir {
            figment = figment.merge(Serialized::default("storage.data_dir", dd));
        }
        if let Some(ref dp) = documents_path {
            figment = figment.merge(Serialized::default("storage.documents_path", dp));
        }
        if let Some(ref pp) = prompts_path {
            figment = figment.merge(Serialized::default("storage.prompts_path", pp));
        }

        let config_file: ConfigFile = figment.extract()?;

        let data_paths = DataPaths::resolve(PathConfig {
            data_dir: config_file.storage.data_dir,
            documents_path: config_file.storage.documents_path,
            prompts_path: config_file.storage.prompts_path,
        })?;

        let mut inference = config_file.inference;
        if inference.api_key.as_deref().map_or(true, str::is_empty) {
            inference.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }

        let idle = config_file.session.idle_timeout_secs;
        Ok(Self {
            port: config_file.server.port,
            allowed_origins: config_file.server.allowed_origins,
            documents_path: data_paths.documents_path,
            prompts_path: data_paths.prompts_path,
            inference,
            session_idle_timeout: (idle > 0).then(|| Duration::from_secs(idle)),
            api_key: config_file.auth.api_key.filter(|k| !k.is_empty()),
        })
    }
}
