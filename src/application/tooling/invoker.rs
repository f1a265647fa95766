use super::catalog::{ToolCatalog, ToolDescriptor};
use super::error::InvokeError;
use super::pool::ConnectionPool;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// A tool invocation as the model requested it: prefixed catalog name plus
/// the raw argument JSON.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: String,
}

/// The invoker's two result channels in one value: `is_error` carries the
/// tool's own verdict, while transport faults never reach this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Presents every catalog entry as one uniform invocable unit. Resolves
/// prefixed names, acquires healthy connections, and keeps "the tool
/// failed" strictly separate from "the transport failed".
pub struct ToolInvoker {
    pool: Arc<ConnectionPool>,
    catalog: Arc<ToolCatalog>,
}

impl ToolInvoker {
    pub fn new(pool: Arc<ConnectionPool>, catalog: Arc<ToolCatalog>) -> Self {
        Self { pool, catalog }
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        self.catalog.descriptors()
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Invoke a registered tool by prefixed name.
    ///
    /// Malformed argument JSON and tool-reported failures come back as
    /// `Ok` with `is_error` set, so the model can see and react to them;
    /// an `Err` always means the invocation layer itself faulted.
    pub async fn invoke(&self, call: &ToolCall) -> Result<ToolOutput, InvokeError> {
        let arguments = match parse_arguments(&call.input) {
            Ok(value) => value,
            Err(err) => {
                debug!(tool = %call.name, %err, "model produced malformed tool arguments");
                return Ok(ToolOutput::error(format!(
                    "invalid tool arguments: {err}"
                )));
            }
        };

        let mapping = self
            .catalog
            .resolve(&call.name)
            .ok_or_else(|| InvokeError::UnknownTool {
                name: call.name.clone(),
            })?;

        self.call_mapped(&mapping.server, &mapping.tool, arguments)
            .await
    }

    /// Direct invocation boundary: call a tool on a named server without
    /// going through the catalog's prefixed namespace.
    pub async fn call_server_tool(
        &self,
        server: &str,
        tool: &str,
        arguments_json: &str,
    ) -> Result<ToolOutput, InvokeError> {
        let arguments = match parse_arguments(arguments_json) {
            Ok(value) => value,
            Err(err) => {
                return Ok(ToolOutput::error(format!(
                    "invalid tool arguments: {err}"
                )));
            }
        };
        self.call_mapped(server, tool, arguments).await
    }

    async fn call_mapped(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolOutput, InvokeError> {
        let connection = self.pool.get_connection_checked(server).await?;
        match connection.call_tool(tool, arguments).await {
            Ok(result) => Ok(marshal_result(result)),
            Err(err) => {
                warn!(server, tool, %err, "tool call failed at the transport layer");
                self.pool.handle_connection_error(server);
                Err(InvokeError::Transport(err))
            }
        }
    }
}

/// Empty input means "no arguments", not an error.
fn parse_arguments(input: &str) -> Result<Value, serde_json::Error> {
    if input.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(input)
}

/// Flattens a tool-protocol call result to a string payload plus the
/// server's own error flag. Text content parts join with newlines;
/// anything else serializes verbatim.
fn marshal_result(result: Value) -> ToolOutput {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let content = match result.get("content").and_then(Value::as_array) {
        Some(parts) => parts
            .iter()
            .map(|part| {
                if part.get("type").and_then(Value::as_str) == Some("text") {
                    part.get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    };

    ToolOutput { content, is_error }
}
