use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{EmuPilotError, EmuPilotResult};
use crate::llm::client::CompletionClient;
use crate::llm::openai::OpenAiCompatClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    OpenRouter,
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn default_api_base(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::Ollama => "http://localhost:11434/v1",
        }
    }

    /// Environment variable holding the provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "EMUPILOT_OPENAI_API_KEY",
            ProviderKind::OpenRouter => "EMUPILOT_OPENROUTER_API_KEY",
            ProviderKind::Ollama => "EMUPILOT_OLLAMA_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = EmuPilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(EmuPilotError::UnknownProvider(other.to_string())),
        }
    }
}

type ClientFactory = Box<dyn Fn(&str, &str) -> Arc<dyn CompletionClient> + Send + Sync>;

/// Registry of completion-client factories, keyed by provider kind.
///
/// `with_defaults` wires every kind to the OpenAI-compatible client;
/// `register` swaps in a custom factory for one kind.
pub struct ClientRegistry {
    factories: HashMap<ProviderKind, ClientFactory>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in [
            ProviderKind::OpenAi,
            ProviderKind::OpenRouter,
            ProviderKind::Ollama,
        ] {
            registry.register(
                kind,
                Box::new(move |api_base, api_key| {
                    Arc::new(OpenAiCompatClient::new(kind, api_base, api_key))
                }),
            );
        }
        registry
    }

    pub fn register(&mut self, kind: ProviderKind, factory: ClientFactory) {
        self.factories.insert(kind, factory);
    }

    /// Build a client for `kind` with its default API base and the key from
    /// the provider's environment variable (empty when unset, which local
    /// backends like Ollama accept).
    pub fn client_for(&self, kind: ProviderKind) -> EmuPilotResult<Arc<dyn CompletionClient>> {
        let api_key = std::env::var(kind.api_key_env()).unwrap_or_default();
        self.client_with(kind, kind.default_api_base(), &api_key)
    }

    pub fn client_with(
        &self,
        kind: ProviderKind,
        api_base: &str,
        api_key: &str,
    ) -> EmuPilotResult<Arc<dyn CompletionClient>> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| EmuPilotError::UnknownProvider(kind.to_string()))?;
        tracing::debug!(provider = %kind, api_base = %api_base, "building completion client");
        Ok(factory(api_base, api_key))
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
