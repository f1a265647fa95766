use super::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Declares one tool server: how to reach it and which of its tools to
/// expose. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub transport: TransportConfig,
    /// Non-empty list keeps only the named tools.
    pub allowed_tools: Vec<String>,
    /// Applied after the allow list; drops the named tools.
    pub excluded_tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Stdio(StdioConfig),
    Http(EndpointConfig),
    Sse(EndpointConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio(_) => "stdio",
            TransportConfig::Http(_) => "http",
            TransportConfig::Sse(_) => "sse",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioConfig {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub url: String,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawServer {
    name: String,
    #[serde(default = "default_transport")]
    transport: String,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    workdir: Option<String>,
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    allowed_tools: Vec<String>,
    #[serde(default)]
    excluded_tools: Vec<String>,
}

fn default_transport() -> String {
    "stdio".to_string()
}

impl TryFrom<RawServer> for ServerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawServer) -> Result<Self, ConfigError> {
        let expand = |s: &str| -> String {
            shellexpand::full(s)
                .map(|cow| cow.into_owned())
                .unwrap_or_else(|_| s.to_string())
        };

        let transport = match raw.transport.as_str() {
            "stdio" => {
                let command = raw.command.ok_or_else(|| ConfigError::MissingCommand {
                    server: raw.name.clone(),
                })?;
                TransportConfig::Stdio(StdioConfig {
                    command: PathBuf::from(expand(&command)),
                    args: raw.args.iter().map(|arg| expand(arg)).collect(),
                    env: raw
                        .env
                        .into_iter()
                        .map(|(key, value)| (key, expand(&value)))
                        .collect(),
                    workdir: raw.workdir.map(|dir| PathBuf::from(expand(&dir))),
                })
            }
            kind @ ("http" | "sse") => {
                let url = raw.url.ok_or_else(|| ConfigError::MissingUrl {
                    server: raw.name.clone(),
                    transport: kind.to_string(),
                })?;
                let endpoint = EndpointConfig {
                    url: expand(&url),
                    headers: raw
                        .headers
                        .into_iter()
                        .map(|(key, value)| (key, expand(&value)))
                        .collect(),
                };
                if kind == "http" {
                    TransportConfig::Http(endpoint)
                } else {
                    TransportConfig::Sse(endpoint)
                }
            }
            other => {
                return Err(ConfigError::UnknownTransport {
                    server: raw.name,
                    transport: other.to_string(),
                });
            }
        };

        Ok(Self {
            name: raw.name,
            transport,
            allowed_tools: raw.allowed_tools,
            excluded_tools: raw.excluded_tools,
        })
    }
}
