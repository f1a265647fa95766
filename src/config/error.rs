use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path:?}")]
    NotFound { path: PathBuf },

    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required field 'model' in configuration")]
    MissingModel,

    #[error("server '{server}' with stdio transport is missing required field 'command'")]
    MissingCommand { server: String },

    #[error("server '{server}' with {transport} transport is missing required field 'url'")]
    MissingUrl { server: String, transport: String },

    #[error("server '{server}' declares unknown transport '{transport}'")]
    UnknownTransport { server: String, transport: String },

    #[error("duplicate server name '{server}' in configuration")]
    DuplicateServer { server: String },

    #[error("provider '{provider}' is missing required field 'endpoint'")]
    MissingEndpoint { provider: String },
}
