//! Language-model access: the completion-client trait, the
//! OpenAI-compatible implementation and the provider registry.

pub mod client;
pub mod openai;
pub mod registry;
pub mod sse;
pub mod types;
