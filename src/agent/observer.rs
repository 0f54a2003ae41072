use async_trait::async_trait;

use crate::emulator::types::{EmulatorSnapshot, Screenshot};

/// Turns the emulator's visible state into text the model can reason
/// about. The default implementation is synthetic; a vision model or an
/// OCR pass can slot in behind the same trait.
#[async_trait]
pub trait ScreenObserver: Send + Sync {
    async fn describe(
        &self,
        screenshot: Option<&Screenshot>,
        snapshot: &EmulatorSnapshot,
    ) -> String;
}

/// Describes the machine state from the snapshot alone, without reading
/// pixels.
pub struct SyntheticObserver;

#[async_trait]
impl ScreenObserver for SyntheticObserver {
    async fn describe(
        &self,
        screenshot: Option<&Screenshot>,
        snapshot: &EmulatorSnapshot,
    ) -> String {
        let mut description = format!(
            "[screen] The {} machine is {}.",
            snapshot.os_type, snapshot.status
        );
        match screenshot {
            Some(shot) => {
                description.push_str(&format!(
                    " A {}x{} frame was captured.",
                    shot.width, shot.height
                ));
            }
            None => description.push_str(" No frame could be captured."),
        }
        if let Some(action) = &snapshot.last_action {
            description.push_str(&format!(" Last action: {action}."));
        }
        description
    }
}
