use super::traits::ModelProvider;
use super::types::ModelError;
use std::collections::HashMap;
use std::sync::Arc;

/// Explicit provider registry, constructed once at startup and passed by
/// reference to whatever needs model access. There is no global fallback.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

/// A ready-to-call provider paired with the model name to request from it.
#[derive(Clone)]
pub struct ResolvedModel {
    pub provider: Arc<dyn ModelProvider>,
    pub model: String,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    /// Resolve a `"provider/model"` spec to a callable handle.
    pub fn resolve(&self, spec: &str) -> Result<ResolvedModel, ModelError> {
        let (provider_id, model) = spec.split_once('/').ok_or_else(|| {
            ModelError::InvalidModelSpec {
                spec: spec.to_string(),
            }
        })?;
        let provider = self
            .providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| ModelError::provider_not_found(provider_id))?;
        Ok(ResolvedModel {
            provider,
            model: model.to_string(),
        })
    }
}

/// Advisory model capabilities used to clamp request parameters. Lookup
/// never fails: unknown models get permissive defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCaps {
    pub max_tokens: Option<u32>,
    pub supports_temperature: bool,
}

impl Default for ModelCaps {
    fn default() -> Self {
        Self {
            max_tokens: None,
            supports_temperature: true,
        }
    }
}

pub fn caps_for(model: &str) -> ModelCaps {
    // Reasoning-model families reject a temperature parameter outright.
    if model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4") {
        return ModelCaps {
            max_tokens: None,
            supports_temperature: false,
        };
    }
    ModelCaps::default()
}
