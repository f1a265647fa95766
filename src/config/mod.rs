pub mod app;
pub mod error;
pub mod loader;
pub mod server;

/// Default config file path - can be overridden via CLI argument
pub const CONFIG_PATH: &str = "config/host.toml";

pub use app::{AppConfig, ProviderConfig};
pub use error::ConfigError;
pub use server::{EndpointConfig, ServerConfig, StdioConfig, TransportConfig};
