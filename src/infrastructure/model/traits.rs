//! Model traits

use super::types::{ModelError, ModelRequest, ModelResponse};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Trait for model provider implementations
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider id as used in `"provider/model"` specs.
    fn id(&self) -> &str;

    /// Send a generation request and wait for the complete response.
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Streaming variant: text deltas go out on `chunks` as they arrive
    /// and the complete response is still returned at the end. Providers
    /// without streaming support fall back to [`chat`](Self::chat).
    async fn chat_stream(
        &self,
        request: ModelRequest,
        chunks: mpsc::UnboundedSender<String>,
    ) -> Result<ModelResponse, ModelError> {
        let _ = chunks;
        self.chat(request).await
    }
}
