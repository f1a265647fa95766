use super::error::ConfigError;
use super::server::ServerConfig;
use std::path::Path;

/// Application configuration loaded from host.toml
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Default model as a "provider/model" string.
    pub model: String,
    pub system_prompt: Option<String>,
    /// Tool-call rounds allowed within one generation step.
    pub max_tool_steps: usize,
    /// Non-interactive runs approve every tool call when set.
    pub auto_approve: bool,
    pub providers: Vec<ProviderConfig>,
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub id: String,
    pub endpoint: String,
    /// Name of the environment variable holding the API key, if any.
    pub api_key_env: Option<String>,
}

impl AppConfig {
    pub const DEFAULT_TOOL_STEPS: usize = 20;

    /// Load configuration from a file path (or the default path if None)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        super::loader::load_config(path)
    }
}
