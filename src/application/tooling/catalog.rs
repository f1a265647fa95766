use super::connection::RawTool;
use super::error::CatalogError;
use super::pool::ConnectionPool;
use super::schema::normalize_schema;
use crate::config::ServerConfig;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use tracing::{info, warn};

/// Separator between the owning server's name and the tool's own name in
/// the model-facing tool name.
pub const NAME_SEPARATOR: &str = "__";

/// The externally visible shape of one tool, normalized and globally
/// addressable. This is what the model sees.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Prefixed name, `"<server>__<tool>"`.
    pub name: String,
    pub description: String,
    /// Named parameter schemas (the object schema's `properties`).
    pub parameters: Map<String, Value>,
    pub required: Vec<String>,
}

impl ToolDescriptor {
    /// The full object schema, as model APIs expect it.
    pub fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": self.parameters,
            "required": self.required,
        })
    }
}

/// Immutable dispatch record mapping a prefixed name back to the owning
/// server and the tool's original name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolMapping {
    pub prefixed: String,
    pub server: String,
    pub tool: String,
}

/// Every registered tool across all loaded servers, keyed for dispatch by
/// prefixed name. Built once at startup; never mutated afterwards.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    descriptors: Vec<ToolDescriptor>,
    mappings: HashMap<String, ToolMapping>,
}

impl ToolCatalog {
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn resolve(&self, prefixed: &str) -> Option<&ToolMapping> {
        self.mappings.get(prefixed)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    fn insert(&mut self, descriptor: ToolDescriptor, mapping: ToolMapping) {
        self.mappings.insert(mapping.prefixed.clone(), mapping);
        self.descriptors.push(descriptor);
    }
}

/// Connects to every configured server and assembles the catalog. A single
/// server failing to connect or list tools is a warning and its tools are
/// simply absent; the load fails only when every server failed.
pub async fn build_catalog(
    pool: &ConnectionPool,
    configs: &[ServerConfig],
) -> Result<ToolCatalog, CatalogError> {
    let mut catalog = ToolCatalog::default();
    let mut failures = Vec::new();

    for config in configs {
        let tools = match list_server_tools(pool, config).await {
            Ok(tools) => tools,
            Err(message) => {
                warn!(server = %config.name, %message, "skipping tool server");
                failures.push(format!("{}: {message}", config.name));
                continue;
            }
        };

        let mut admitted = 0usize;
        for raw in tools {
            if !admits(config, &raw.name) {
                continue;
            }
            let (descriptor, mapping) = register_tool(&config.name, raw);
            catalog.insert(descriptor, mapping);
            admitted += 1;
        }
        info!(server = %config.name, tools = admitted, "registered tool server");
    }

    if !configs.is_empty() && failures.len() == configs.len() {
        return Err(CatalogError::AllServersFailed {
            count: configs.len(),
            summary: failures.join("; "),
        });
    }
    Ok(catalog)
}

async fn list_server_tools(
    pool: &ConnectionPool,
    config: &ServerConfig,
) -> Result<Vec<RawTool>, String> {
    let connection = pool
        .get_connection(&config.name)
        .await
        .map_err(|err| err.to_string())?;
    connection.list_tools().await.map_err(|err| err.to_string())
}

/// Allow-list (when non-empty) then deny-list.
fn admits(config: &ServerConfig, tool: &str) -> bool {
    if !config.allowed_tools.is_empty()
        && !config.allowed_tools.iter().any(|name| name == tool)
    {
        return false;
    }
    !config.excluded_tools.iter().any(|name| name == tool)
}

/// Normalizes one raw tool into its descriptor and dispatch mapping. A
/// missing or non-object schema resolves to an empty object schema.
fn register_tool(server: &str, raw: RawTool) -> (ToolDescriptor, ToolMapping) {
    let mut schema = raw.input_schema.unwrap_or_else(|| json!({}));
    normalize_schema(&mut schema);

    let parameters = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(|name| name.to_string())
                .collect()
        })
        .unwrap_or_default();

    let prefixed = format!("{server}{NAME_SEPARATOR}{}", raw.name);
    let descriptor = ToolDescriptor {
        name: prefixed.clone(),
        description: raw.description.unwrap_or_default(),
        parameters,
        required,
    };
    let mapping = ToolMapping {
        prefixed,
        server: server.to_string(),
        tool: raw.name,
    };
    (descriptor, mapping)
}
