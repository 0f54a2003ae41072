use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmuPilotError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Upstream error: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("SSE parsing error: {0}")]
    Sse(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Request cancelled")]
    Cancelled,
}

impl EmuPilotError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// True for failures worth retrying: transport errors, 5xx and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Upstream {
                status: Some(status),
                ..
            } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl serde::Serialize for EmuPilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type EmuPilotResult<T> = Result<T, EmuPilotError>;
