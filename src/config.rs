use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::emulator::assets::OsType;
use crate::emulator::types::InitOptions;
use crate::errors::{EmuPilotError, EmuPilotResult};
use crate::llm::registry::ProviderKind;

/// One piloting environment: which guest OS to boot, which model drives
/// it and what task the pilot is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub os: OsType,
    pub provider: ProviderKind,
    pub model: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub options: EnvOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvOptions {
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_vga_memory_mb")]
    pub vga_memory_mb: u32,
    #[serde(default)]
    pub network: bool,
    #[serde(default)]
    pub persist_state: bool,
    #[serde(default = "default_true")]
    pub autostart: bool,
}

fn default_memory_mb() -> u32 {
    128
}

fn default_vga_memory_mb() -> u32 {
    8
}

fn default_true() -> bool {
    true
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            memory_mb: default_memory_mb(),
            vga_memory_mb: default_vga_memory_mb(),
            network: false,
            persist_state: false,
            autostart: true,
        }
    }
}

impl EnvOptions {
    pub fn init_options(&self) -> InitOptions {
        InitOptions {
            memory_mb: self.memory_mb,
            vga_memory_mb: self.vga_memory_mb,
            network: self.network,
            persist_state: self.persist_state,
            autostart: self.autostart,
        }
    }
}

impl EnvironmentConfig {
    fn validate(&self) -> EmuPilotResult<()> {
        for (field, value) in [
            ("name", &self.name),
            ("model", &self.model),
            ("task", &self.task),
        ] {
            if value.trim().is_empty() {
                return Err(EmuPilotError::Parse(format!(
                    "field `{field}` must not be empty"
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_environment(text: &str) -> EmuPilotResult<EnvironmentConfig> {
    // Spanned rendering keeps the offending line in the error text.
    let config: EnvironmentConfig =
        toml::from_str(text).map_err(|e| EmuPilotError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

pub fn render_environment(config: &EnvironmentConfig) -> EmuPilotResult<String> {
    Ok(toml::to_string_pretty(config)?)
}

pub fn load_environment(path: impl AsRef<Path>) -> EmuPilotResult<EnvironmentConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let config = parse_environment(&content)?;
    tracing::info!(path = %path.display(), os = %config.os, provider = %config.provider, "environment loaded");
    Ok(config)
}

pub fn save_environment(
    path: impl AsRef<Path>,
    config: &EnvironmentConfig,
) -> EmuPilotResult<()> {
    let path = path.as_ref();
    let content = render_environment(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "environment saved");
    Ok(())
}
