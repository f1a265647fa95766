pub mod openai_compat;
pub mod registry;
pub mod traits;
pub mod types;

pub use openai_compat::OpenAiCompatClient;
pub use registry::{ModelCaps, ProviderRegistry, ResolvedModel, caps_for};
pub use traits::ModelProvider;
pub use types::{ModelError, ModelRequest, ModelResponse};
