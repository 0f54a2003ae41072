use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::commands::CommandSyntax;
use crate::agent::transcript::ConversationEntry;
use crate::config::EnvironmentConfig;
use crate::llm::registry::ProviderKind;

/// Lifecycle states of a piloting session. `Stopped` is terminal; a new
/// session is required to pilot again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Starting,
    Running,
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are piloting a real computer through its keyboard. You see the screen \
only as described to you; there is no mouse. To type into the machine, put \
the exact keystrokes in a fenced code block tagged bash, one command per \
block. Every block is typed verbatim and finished with Enter. Keep commands \
short and wait for the screen to update before deciding your next step. \
When the task is complete, reply in plain prose without any code block.";

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub provider: ProviderKind,
    pub model: String,
    pub task: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub status: SessionStatus,
}

impl Session {
    pub fn from_environment(env: &EnvironmentConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: env.provider,
            model: env.model.clone(),
            task: env.task.clone(),
            system_prompt: env
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: 1024,
            temperature: 0.7,
            status: SessionStatus::Idle,
        }
    }
}

/// A keyboard action extracted from a model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    TypeText { text: String },
    PressKey { key: String },
}

impl Action {
    pub fn describe(&self) -> String {
        match self {
            Action::TypeText { text } => format!("type {:?}", text.trim_end_matches('\n')),
            Action::PressKey { key } => format!("press {key}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Wait after each executed action before the screen is re-observed.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries for transient model failures, on top of the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub syntax: CommandSyntax,
    /// When set, the loop keeps taking turns on its own after each reply
    /// that contained at least one action.
    #[serde(default)]
    pub auto_continue: bool,
    #[serde(default = "default_max_auto_turns")]
    pub max_auto_turns: u32,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_dir: Option<PathBuf>,
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_auto_turns() -> u32 {
    8
}

fn default_max_failures() -> u32 {
    3
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            syntax: CommandSyntax::default(),
            auto_continue: false,
            max_auto_turns: default_max_auto_turns(),
            max_failures: default_max_failures(),
            transcript_dir: None,
        }
    }
}

/// Everything a dashboard needs to render the session.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub session: Session,
    pub processing: bool,
    pub entries: Vec<ConversationEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::assets::OsType;

    #[test]
    fn session_fills_defaults_from_environment() {
        let env = EnvironmentConfig {
            name: "lab".into(),
            os: OsType::Linux,
            provider: ProviderKind::Ollama,
            model: "llama3".into(),
            task: "uptime".into(),
            system_prompt: None,
            options: Default::default(),
        };
        let session = Session::from_environment(&env);
        assert_eq!(session.status, SessionStatus::Idle);
        assert_eq!(session.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(session.model, "llama3");
    }

    #[test]
    fn explicit_system_prompt_wins() {
        let env = EnvironmentConfig {
            name: "lab".into(),
            os: OsType::FreeDos,
            provider: ProviderKind::OpenAi,
            model: "gpt-4o".into(),
            task: "dir".into(),
            system_prompt: Some("You drive DOS.".into()),
            options: Default::default(),
        };
        let session = Session::from_environment(&env);
        assert_eq!(session.system_prompt, "You drive DOS.");
    }

    #[test]
    fn action_description_is_compact() {
        let typed = Action::TypeText {
            text: "ls -la\n".into(),
        };
        assert_eq!(typed.describe(), "type \"ls -la\"");
        let pressed = Action::PressKey { key: "enter".into() };
        assert_eq!(pressed.describe(), "press enter");
    }

    #[test]
    fn action_serializes_tagged() {
        let json = serde_json::to_value(Action::PressKey { key: "tab".into() }).unwrap();
        assert_eq!(json["type"], "press_key");
        assert_eq!(json["key"], "tab");
    }
}
