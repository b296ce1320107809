use anyhow::Result;

use crate::detect::result::Detection;

/// Synchronous detector backend trait.
///
/// Implementations MUST:
/// - Treat the pixel slice as read-only and ephemeral
/// - Not retain pixels beyond the `detect` call
/// - Return boxes normalized to 0..1 of the given image
///
/// Backends run on the `BackendDetector` worker thread, never on the scheduler.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on packed RGB8 pixels.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
