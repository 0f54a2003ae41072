use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// One completion call. `system_prompt`, when set, is prepended to
/// `messages` as the first system message on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunkKind {
    Content,
    Done,
    Error,
}

/// One parsed server-sent event from a streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub kind: StreamChunkKind,
    pub content: String,
}

impl StreamChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            kind: StreamChunkKind::Content,
            content: text.into(),
        }
    }

    pub fn done() -> Self {
        Self {
            kind: StreamChunkKind::Done,
            content: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: StreamChunkKind::Error,
            content: message.into(),
        }
    }
}
