use std::sync::Arc;

use base64::Engine as _;
use serde::{Deserialize, Serialize, Serializer};

use crate::emulator::assets::OsType;

/// Lifecycle of one emulator session. Failure states are terminal for the
/// attempt; `destroy` is the only way out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmulatorStatus {
    Uninitialized,
    Loading,
    Creating,
    Ready,
    Running,
    Stopped,
    Destroyed,
    LoadFailed,
    InitFailed,
    DownloadError,
    DeviceError,
}

impl std::fmt::Display for EmulatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Creating => "creating",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Destroyed => "destroyed",
            Self::LoadFailed => "load_failed",
            Self::InitFailed => "init_failed",
            Self::DownloadError => "download_error",
            Self::DeviceError => "device_error",
        };
        f.write_str(s)
    }
}

/// PNG-encoded frame captured from the engine framebuffer.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl Screenshot {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.png)
    }
}

impl Serialize for Screenshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Screenshot", 3)?;
        s.serialize_field("width", &self.width)?;
        s.serialize_field("height", &self.height)?;
        s.serialize_field("data_base64", &self.to_base64())?;
        s.end()
    }
}

/// Tunables for one boot; mirrors the `[options]` table of the environment
/// document.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub memory_mb: u32,
    pub vga_memory_mb: u32,
    pub network: bool,
    pub persist_state: bool,
    pub autostart: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            memory_mb: 128,
            vga_memory_mb: 8,
            network: false,
            persist_state: false,
            autostart: true,
        }
    }
}

/// Value snapshot published to subscribers; every publish is a fresh copy.
#[derive(Debug, Clone, Serialize)]
pub struct EmulatorSnapshot {
    pub is_running: bool,
    pub os_type: OsType,
    #[serde(serialize_with = "serialize_screenshot")]
    pub screenshot: Option<Arc<Screenshot>>,
    pub status: EmulatorStatus,
    pub memory_usage: Option<u64>,
    pub network_active: bool,
    /// Boot asset download progress, 0 to 100.
    pub boot_progress: u8,
    pub last_action: Option<String>,
}

pub(crate) fn serialize_screenshot<S>(
    screenshot: &Option<Arc<Screenshot>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match screenshot {
        Some(shot) => serializer.serialize_some(shot.as_ref()),
        None => serializer.serialize_none(),
    }
}
