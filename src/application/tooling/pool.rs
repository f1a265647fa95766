use super::connection::{Connection, Health};
use super::error::TransportError;
use super::transport::{HttpTransport, SseTransport, StdioTransport, Transport};
use crate::config::{ServerConfig, TransportConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// Builds a connected transport for a server config. The pool goes through
/// this seam so tests can substitute scripted transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ServerConfig) -> Result<Box<dyn Transport>, TransportError>;
}

pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, config: &ServerConfig) -> Result<Box<dyn Transport>, TransportError> {
        match &config.transport {
            TransportConfig::Stdio(stdio) => Ok(Box::new(
                StdioTransport::connect(&config.name, stdio).await?,
            )),
            TransportConfig::Http(endpoint) => {
                Ok(Box::new(HttpTransport::connect(&config.name, endpoint)?))
            }
            TransportConfig::Sse(endpoint) => Ok(Box::new(
                SseTransport::connect(&config.name, endpoint).await?,
            )),
        }
    }
}

/// Owns the canonical connection per server name. Connects lazily, verifies
/// liveness on the invocation path, and recovers from failures when a
/// server is next used rather than probing in the background.
pub struct ConnectionPool {
    configs: HashMap<String, ServerConfig>,
    connector: Box<dyn Connector>,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    // Serialises first connects so a burst of calls to a cold server spawns
    // one subprocess, not several.
    create_lock: AsyncMutex<()>,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub fn new(configs: Vec<ServerConfig>) -> Self {
        Self::with_connector(configs, Box::new(DefaultConnector))
    }

    pub fn with_connector(configs: Vec<ServerConfig>, connector: Box<dyn Connector>) -> Self {
        let configs = configs
            .into_iter()
            .map(|config| (config.name.clone(), config))
            .collect();
        Self {
            configs,
            connector,
            connections: Mutex::new(HashMap::new()),
            create_lock: AsyncMutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn server_names(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }

    pub fn config(&self, server: &str) -> Option<&ServerConfig> {
        self.configs.get(server)
    }

    /// Returns the canonical connection, creating it (with handshake) if
    /// none exists. First-load failures surface verbatim; there is no retry
    /// on this path.
    pub async fn get_connection(&self, server: &str) -> Result<Arc<Connection>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Transport {
                server: server.to_string(),
                message: "connection pool is closed".to_string(),
            });
        }

        if let Some(existing) = self.lookup(server) {
            return Ok(existing);
        }

        let config = self
            .configs
            .get(server)
            .ok_or_else(|| TransportError::NotConfigured {
                server: server.to_string(),
            })?;

        let _guard = self.create_lock.lock().await;
        // Another caller may have connected while we waited.
        if let Some(existing) = self.lookup(server) {
            return Ok(existing);
        }

        debug!(server, transport = config.transport.kind(), "connecting to tool server");
        let transport = self.connector.connect(config).await?;
        let connection = Arc::new(Connection::open(server, transport).await?);
        self.connections
            .lock()
            .expect("connection registry lock")
            .insert(server.to_string(), Arc::clone(&connection));
        Ok(connection)
    }

    /// As [`get_connection`], but verifies the existing connection is still
    /// responsive before handing it out; a failed probe discards it and
    /// connects fresh. Used by the tool-invocation path, where calls are
    /// the primary staleness signal.
    pub async fn get_connection_checked(
        &self,
        server: &str,
    ) -> Result<Arc<Connection>, TransportError> {
        if let Some(existing) = self.lookup(server) {
            if existing.health() != Health::Unhealthy {
                match existing.ping().await {
                    Ok(()) => return Ok(existing),
                    Err(err) => {
                        warn!(server, %err, "liveness probe failed; reconnecting");
                    }
                }
            } else {
                debug!(server, "connection marked unhealthy; reconnecting");
            }
            self.discard(server, &existing);
            existing.close().await;
        }
        self.get_connection(server).await
    }

    /// Marks the server's connection unhealthy after a failed remote call.
    /// Reconnection happens on the next acquisition, not here, so a burst
    /// of failing calls cannot trigger a reconnect storm.
    pub fn handle_connection_error(&self, server: &str) {
        if let Some(connection) = self.lookup(server) {
            connection.mark_unhealthy();
            warn!(server, "connection flagged unhealthy after failed call");
        }
    }

    /// Closes every owned connection. Idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<Arc<Connection>> = {
            let mut connections = self.connections.lock().expect("connection registry lock");
            connections.drain().map(|(_, conn)| conn).collect()
        };
        for connection in drained {
            connection.close().await;
        }
    }

    fn lookup(&self, server: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .expect("connection registry lock")
            .get(server)
            .cloned()
    }

    /// Removes the entry only if it still is the given connection, so a
    /// replacement created by a concurrent caller survives.
    fn discard(&self, server: &str, connection: &Arc<Connection>) {
        let mut connections = self.connections.lock().expect("connection registry lock");
        if let Some(current) = connections.get(server) {
            if Arc::ptr_eq(current, connection) {
                connections.remove(server);
            }
        }
    }
}
