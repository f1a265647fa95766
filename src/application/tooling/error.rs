use thiserror::Error;

/// Faults on the wire between this host and one tool server. Every variant
/// names the server so failures stay diagnosable without retry-masking.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("tool server '{server}' is not configured")]
    NotConfigured { server: String },
    #[error("failed to spawn tool server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tool server '{server}' transport error: {message}")]
    Transport { server: String, message: String },
    #[error("http request to tool server '{server}' failed: {source}")]
    Http {
        server: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("tool server '{server}' returned invalid JSON: {source}")]
    InvalidJson {
        server: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("tool server '{server}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
    #[error("tool server '{server}' terminated unexpectedly")]
    Terminated { server: String },
    #[error("request to tool server '{server}' cancelled")]
    Cancelled { server: String },
}

impl TransportError {
    pub fn server(&self) -> &str {
        match self {
            TransportError::NotConfigured { server }
            | TransportError::Spawn { server, .. }
            | TransportError::Transport { server, .. }
            | TransportError::Http { server, .. }
            | TransportError::InvalidJson { server, .. }
            | TransportError::Rpc { server, .. }
            | TransportError::Terminated { server }
            | TransportError::Cancelled { server } => server,
        }
    }
}

/// Errors building the tool catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Individual server failures are warnings; this fires only when every
    /// configured server failed to connect or list its tools.
    #[error("all {count} configured tool servers failed to load: {summary}")]
    AllServersFailed { count: usize, summary: String },
}

/// Hard faults from the generic tool invoker. Tool-logical failures are not
/// errors at this level; they come back as error-flagged tool output.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("tool '{name}' is not registered in the catalog")]
    UnknownTool { name: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}
