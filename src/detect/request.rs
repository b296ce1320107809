use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;

use crate::frame::Frame;

/// Rotation hint derived from display orientation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
        }
    }
}

/// A frame prepared for detection.
pub struct DetectionRequest {
    /// Full-resolution source frame.
    pub frame: Arc<Frame>,
    /// Source frame downscaled to the detector's input size.
    pub image: RgbImage,
    pub rotation: Rotation,
    pub submitted_at: Instant,
}

impl DetectionRequest {
    pub fn new(frame: Arc<Frame>, image: RgbImage, rotation: Rotation) -> Self {
        Self {
            frame,
            image,
            rotation,
            submitted_at: Instant::now(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }
}

impl std::fmt::Debug for DetectionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionRequest")
            .field("sequence", &self.frame.sequence)
            .field("input", &self.image.dimensions())
            .field("rotation", &self.rotation)
            .finish()
    }
}
