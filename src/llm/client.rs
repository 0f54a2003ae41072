use async_trait::async_trait;

use crate::errors::EmuPilotResult;
use crate::llm::registry::ProviderKind;
use crate::llm::types::CompletionRequest;

/// Callback invoked with each content delta while a completion streams.
pub type TokenSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// A chat-completion backend. Implementations are provider-specific but
/// share the OpenAI-compatible request shape.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// Run one completion and return the full assistant reply.
    async fn generate(&self, request: &CompletionRequest) -> EmuPilotResult<String>;

    /// Stream one completion, feeding each content delta to `on_token`,
    /// and return the accumulated reply.
    async fn stream(
        &self,
        request: &CompletionRequest,
        on_token: TokenSink<'_>,
    ) -> EmuPilotResult<String>;
}
