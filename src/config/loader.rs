use super::CONFIG_PATH;
use super::app::{AppConfig, ProviderConfig};
use super::error::ConfigError;
use super::server::{RawServer, ServerConfig};
use dotenvy::dotenv;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Once;
use tracing::debug;

static ENV_LOADER: Once = Once::new();

/// Raw configuration structure for deserialization from TOML
#[derive(Debug, Deserialize, Default)]
pub(super) struct RawConfig {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub max_tool_steps: Option<usize>,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub providers: Vec<RawProvider>,
    #[serde(default)]
    pub servers: Vec<RawServer>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct RawProvider {
    pub id: String,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// Ensures environment variables are loaded from a local .env once.
pub fn ensure_env_loaded() {
    ENV_LOADER.call_once(|| {
        let _ = dotenv();
    });
}

/// Load and validate configuration from a file path
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    ensure_env_loaded();
    let config_path = path.unwrap_or_else(|| Path::new(CONFIG_PATH));
    read_config(config_path)
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading host configuration file");

    let content = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let parsed: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    validate_and_build(parsed)
}

pub(super) fn validate_and_build(parsed: RawConfig) -> Result<AppConfig, ConfigError> {
    let model = parsed.model.ok_or(ConfigError::MissingModel)?;

    let mut providers = Vec::with_capacity(parsed.providers.len());
    for raw in parsed.providers {
        let endpoint = raw.endpoint.ok_or_else(|| ConfigError::MissingEndpoint {
            provider: raw.id.clone(),
        })?;
        providers.push(ProviderConfig {
            id: raw.id,
            endpoint,
            api_key_env: raw.api_key_env,
        });
    }

    let mut seen = HashSet::new();
    let mut servers = Vec::with_capacity(parsed.servers.len());
    for raw in parsed.servers {
        let server = ServerConfig::try_from(raw)?;
        if !seen.insert(server.name.clone()) {
            return Err(ConfigError::DuplicateServer {
                server: server.name,
            });
        }
        servers.push(server);
    }

    Ok(AppConfig {
        model,
        system_prompt: parsed.system_prompt,
        max_tool_steps: parsed.max_tool_steps.unwrap_or(AppConfig::DEFAULT_TOOL_STEPS),
        auto_approve: parsed.auto_approve,
        providers,
        servers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::server::TransportConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn loads_full_config() {
        let file = write_config(
            r#"
            model = "local/qwen3"
            system_prompt = "be terse"
            max_tool_steps = 8

            [[providers]]
            id = "local"
            endpoint = "http://127.0.0.1:11434/v1"

            [[servers]]
            name = "files"
            command = "files-server"
            args = ["--root", "/tmp"]

            [[servers]]
            name = "web"
            transport = "sse"
            url = "http://localhost:9000/sse"
            excluded_tools = ["dangerous_delete"]
            "#,
        );

        let config = load_config(Some(file.path())).expect("config loads");
        assert_eq!(config.model, "local/qwen3");
        assert_eq!(config.max_tool_steps, 8);
        assert_eq!(config.servers.len(), 2);
        assert!(matches!(
            config.servers[1].transport,
            TransportConfig::Sse(_)
        ));
        assert_eq!(config.servers[1].excluded_tools, vec!["dangerous_delete"]);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/host.toml"))).expect_err("no file");
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn missing_model_is_rejected() {
        let file = write_config("system_prompt = \"hi\"\n");
        let err = load_config(Some(file.path())).expect_err("model required");
        assert!(matches!(err, ConfigError::MissingModel));
    }

    #[test]
    fn duplicate_server_names_are_rejected() {
        let file = write_config(
            r#"
            model = "local/qwen3"

            [[servers]]
            name = "files"
            command = "a"

            [[servers]]
            name = "files"
            command = "b"
            "#,
        );
        let err = load_config(Some(file.path())).expect_err("duplicate server");
        assert!(matches!(err, ConfigError::DuplicateServer { server } if server == "files"));
    }
}
