use super::request::Rotation;

/// Result of running detection on one submitted frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    /// Dimensions of the source frame the boxes refer to.
    pub image_width: u32,
    pub image_height: u32,
    /// Rotation hint the request was submitted with.
    pub rotation: Rotation,
    /// Sequence number of the source frame.
    pub sequence: u64,
}

impl DetectionResult {
    /// The detection an overlay would draw: the first one reported.
    pub fn first(&self) -> Option<&Detection> {
        self.detections.first()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub label: String,
}

/// Box in normalized 0..1 image coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Map onto a `width` x `height` surface, in pixels.
    pub fn scaled(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let w = width as f32;
        let h = height as f32;
        (
            (self.left * w).round() as u32,
            (self.top * h).round() as u32,
            (self.right * w).round() as u32,
            (self.bottom * h).round() as u32,
        )
    }
}
