pub mod catalog;
pub mod connection;
pub mod error;
pub mod invoker;
pub mod pool;
pub mod schema;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{NAME_SEPARATOR, ToolCatalog, ToolDescriptor, ToolMapping, build_catalog};
pub use connection::{Connection, Health, RawTool};
pub use error::{CatalogError, InvokeError, TransportError};
pub use invoker::{ToolCall, ToolInvoker, ToolOutput};
pub use pool::{ConnectionPool, Connector, DefaultConnector};
pub use transport::Transport;
