use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EmuPilotResult;

/// Boot order words as the BIOS consumes them (one nibble per boot device).
pub const BOOT_ORDER_WINDOWS: u16 = 0x123;
pub const BOOT_ORDER_FREEDOS: u16 = 0x321;
pub const BOOT_ORDER_LINUX: u16 = 0x132;

/// Relative path of the engine's binary payload under the asset base.
pub const ENGINE_WASM: &str = "engine/emulator.wasm";

/// Guest operating systems with stock boot profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Linux,
    Windows,
    FreeDos,
}

impl OsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::FreeDos => "freedos",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "linux" => Some(Self::Linux),
            "windows" => Some(Self::Windows),
            "freedos" => Some(Self::FreeDos),
            _ => None,
        }
    }

    /// Unrecognized names get the linux profile.
    pub fn parse_or_default(name: &str) -> Self {
        Self::from_name(name).unwrap_or(Self::Linux)
    }
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device a boot image is attached to, with the image URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "device", content = "url", rename_all = "snake_case")]
pub enum BootMedia {
    Cdrom(String),
    HardDisk(String),
    Floppy(String),
}

impl BootMedia {
    pub fn url(&self) -> &str {
        match self {
            Self::Cdrom(url) | Self::HardDisk(url) | Self::Floppy(url) => url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumKind {
    Cdrom,
    HardDisk,
    Floppy,
}

/// Static catalog entry for one OS. Paths are relative to the asset base.
#[derive(Debug, Clone)]
pub struct BootProfile {
    pub bios: &'static str,
    pub vga_bios: &'static str,
    pub medium: &'static str,
    pub medium_kind: MediumKind,
    pub boot_order: u16,
    pub acpi: bool,
}

pub fn boot_profile(os: OsType) -> BootProfile {
    match os {
        OsType::Linux => BootProfile {
            bios: "bios/seabios.bin",
            vga_bios: "bios/vgabios.bin",
            medium: "images/linux.iso",
            medium_kind: MediumKind::Cdrom,
            boot_order: BOOT_ORDER_LINUX,
            acpi: true,
        },
        OsType::Windows => BootProfile {
            bios: "bios/seabios.bin",
            vga_bios: "bios/vgabios.bin",
            medium: "images/windows.img",
            medium_kind: MediumKind::HardDisk,
            boot_order: BOOT_ORDER_WINDOWS,
            acpi: true,
        },
        OsType::FreeDos => BootProfile {
            bios: "bios/seabios.bin",
            vga_bios: "bios/vgabios.bin",
            medium: "images/freedos.img",
            medium_kind: MediumKind::Floppy,
            boot_order: BOOT_ORDER_FREEDOS,
            acpi: false,
        },
    }
}

/// Fully resolved asset URLs for one boot attempt.
#[derive(Debug, Clone)]
pub struct BootAssets {
    pub wasm_url: String,
    pub bios_url: String,
    pub vga_bios_url: String,
    pub media: BootMedia,
    pub boot_order: u16,
    pub acpi: bool,
}

impl BootAssets {
    /// Probe order mirrors load order: engine payload, firmware, boot medium.
    pub fn urls(&self) -> [&str; 4] {
        [
            &self.wasm_url,
            &self.bios_url,
            &self.vga_bios_url,
            self.media.url(),
        ]
    }
}

pub fn boot_assets(os: OsType, base: &str) -> BootAssets {
    let profile = boot_profile(os);
    let media_url = join_url(base, profile.medium);
    let media = match profile.medium_kind {
        MediumKind::Cdrom => BootMedia::Cdrom(media_url),
        MediumKind::HardDisk => BootMedia::HardDisk(media_url),
        MediumKind::Floppy => BootMedia::Floppy(media_url),
    };
    BootAssets {
        wasm_url: join_url(base, ENGINE_WASM),
        bios_url: join_url(base, profile.bios),
        vga_bios_url: join_url(base, profile.vga_bios),
        media,
        boot_order: profile.boot_order,
        acpi: profile.acpi,
    }
}

fn join_url(base: &str, rel: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        rel.trim_start_matches('/')
    )
}

/// Existence check for a boot asset before engine construction.
#[async_trait]
pub trait AssetProber: Send + Sync {
    async fn exists(&self, url: &str) -> EmuPilotResult<bool>;
}

/// HEAD-request prober for HTTP-served assets.
pub struct HttpAssetProber {
    client: reqwest::Client,
}

impl HttpAssetProber {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpAssetProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetProber for HttpAssetProber {
    async fn exists(&self, url: &str) -> EmuPilotResult<bool> {
        let response = self.client.head(url).send().await?;
        tracing::debug!(url = %url, status = response.status().as_u16(), "asset probed");
        Ok(response.status().is_success())
    }
}
