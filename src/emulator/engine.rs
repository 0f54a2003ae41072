use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::emulator::assets::BootMedia;
use crate::errors::EmuPilotResult;

/// Handle returned by [`EmulationEngine::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Host slot the virtual screen renders into. The facade checks attachment
/// before boot; everything else about the slot belongs to the host shell.
#[derive(Debug, Clone)]
pub struct MountPoint {
    id: String,
    attached: bool,
}

impl MountPoint {
    pub fn attached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attached: true,
        }
    }

    pub fn detached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attached: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

/// Raw framebuffer contents as exposed by the engine.
#[derive(Debug, Clone)]
pub struct ScreenFrame {
    pub width: u32,
    pub height: u32,
    /// RGBA, row-major, `width * height * 4` bytes.
    pub rgba: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineEventKind {
    Ready,
    Stopped,
    DownloadProgress,
    DownloadError,
    Boot,
    Error,
    ScreenSetMode,
    ScreenSetSize,
}

/// Events an engine instance emits to registered listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EngineEvent {
    Ready,
    Stopped,
    DownloadProgress { file: String, loaded: u64, total: u64 },
    DownloadError { file: String },
    Boot,
    Error { message: String },
    ScreenSetMode { graphical: bool },
    ScreenSetSize { width: u32, height: u32 },
}

impl EngineEvent {
    pub fn kind(&self) -> EngineEventKind {
        match self {
            Self::Ready => EngineEventKind::Ready,
            Self::Stopped => EngineEventKind::Stopped,
            Self::DownloadProgress { .. } => EngineEventKind::DownloadProgress,
            Self::DownloadError { .. } => EngineEventKind::DownloadError,
            Self::Boot => EngineEventKind::Boot,
            Self::Error { .. } => EngineEventKind::Error,
            Self::ScreenSetMode { .. } => EngineEventKind::ScreenSetMode,
            Self::ScreenSetSize { .. } => EngineEventKind::ScreenSetSize,
        }
    }
}

pub type EventCallback = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Surface the facade drives. Implementations wrap a concrete x86 engine;
/// tests substitute a recording fake.
pub trait EmulationEngine: Send + Sync {
    fn run(&self);
    fn pause(&self);
    fn restart(&self);
    fn destroy(&self);
    /// Inject printable text through the engine's keyboard device.
    fn send_text(&self, text: &str);
    /// Inject raw scancodes. Set 1; extended codes carry the `0xE0` prefix
    /// in the high byte.
    fn send_scancodes(&self, codes: &[u16]);
    fn screenshot(&self) -> Option<ScreenFrame>;
    fn memory_usage(&self) -> Option<u64>;
    fn add_listener(&self, kind: EngineEventKind, callback: EventCallback) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}

/// Options assembled by the facade for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub mount: MountPoint,
    pub memory_mb: u32,
    pub vga_memory_mb: u32,
    pub wasm_url: String,
    pub bios_url: String,
    pub vga_bios_url: String,
    pub media: BootMedia,
    pub boot_order: u16,
    pub autostart: bool,
    pub acpi: bool,
    pub network_enabled: bool,
    pub preserve_state: bool,
}

/// Capability handle standing in for the engine library global.
pub trait EngineFactory: Send + Sync {
    /// False when the engine library failed to load in the host.
    fn is_loaded(&self) -> bool;
    fn create(&self, options: EngineOptions) -> EmuPilotResult<Arc<dyn EmulationEngine>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_matches_variant() {
        let cases: Vec<(EngineEvent, EngineEventKind)> = vec![
            (EngineEvent::Ready, EngineEventKind::Ready),
            (EngineEvent::Stopped, EngineEventKind::Stopped),
            (
                EngineEvent::DownloadProgress {
                    file: "bios.bin".into(),
                    loaded: 1,
                    total: 2,
                },
                EngineEventKind::DownloadProgress,
            ),
            (
                EngineEvent::DownloadError {
                    file: "bios.bin".into(),
                },
                EngineEventKind::DownloadError,
            ),
            (EngineEvent::Boot, EngineEventKind::Boot),
            (
                EngineEvent::Error {
                    message: "ide fault".into(),
                },
                EngineEventKind::Error,
            ),
            (
                EngineEvent::ScreenSetMode { graphical: false },
                EngineEventKind::ScreenSetMode,
            ),
            (
                EngineEvent::ScreenSetSize {
                    width: 640,
                    height: 400,
                },
                EngineEventKind::ScreenSetSize,
            ),
        ];
        for (event, kind) in cases {
            assert_eq!(event.kind(), kind);
        }
    }

    #[test]
    fn mount_point_attachment() {
        assert!(MountPoint::attached("screen").is_attached());
        assert!(!MountPoint::detached("screen").is_attached());
        assert_eq!(MountPoint::attached("screen").id(), "screen");
    }
}
