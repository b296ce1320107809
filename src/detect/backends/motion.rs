use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};

/// Cells per side of the comparison grid.
const GRID: u32 = 4;

const MOTION_CONFIDENCE: f32 = 0.85;

/// Motion backend. Hashes a grid of cells and reports the region whose cells changed
/// since the previous frame.
#[derive(Default)]
pub struct MotionBackend {
    last: Option<CellHashes>,
}

struct CellHashes {
    width: u32,
    height: u32,
    cells: Vec<[u8; 32]>,
}

impl MotionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn hash_cells(pixels: &[u8], width: u32, height: u32) -> Vec<[u8; 32]> {
        let stride = width as usize * 3;
        let mut cells = Vec::with_capacity((GRID * GRID) as usize);
        for gy in 0..GRID {
            let (y0, y1) = (gy * height / GRID, (gy + 1) * height / GRID);
            for gx in 0..GRID {
                let (x0, x1) = (
                    (gx * width / GRID) as usize * 3,
                    ((gx + 1) * width / GRID) as usize * 3,
                );
                let mut hasher = Sha256::new();
                for y in y0..y1 {
                    let row = y as usize * stride;
                    hasher.update(&pixels[row + x0..row + x1]);
                }
                cells.push(hasher.finalize().into());
            }
        }
        cells
    }
}

impl DetectorBackend for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() < expected {
            anyhow::bail!(
                "pixel buffer too short for {}x{}: {} < {} bytes",
                width,
                height,
                pixels.len(),
                expected
            );
        }

        let cells = Self::hash_cells(pixels, width, height);
        let previous = self.last.replace(CellHashes {
            width,
            height,
            cells,
        });
        let (Some(previous), Some(current)) = (previous, self.last.as_ref()) else {
            return Ok(Vec::new());
        };
        if previous.width != width || previous.height != height {
            return Ok(Vec::new());
        }

        let mut changed: Option<(u32, u32, u32, u32)> = None;
        for (index, (old, new)) in previous.cells.iter().zip(&current.cells).enumerate() {
            if old == new {
                continue;
            }
            let (gx, gy) = (index as u32 % GRID, index as u32 / GRID);
            changed = Some(match changed {
                None => (gx, gy, gx, gy),
                Some((l, t, r, b)) => (l.min(gx), t.min(gy), r.max(gx), b.max(gy)),
            });
        }

        Ok(changed
            .map(|(l, t, r, b)| {
                let cell = 1.0 / GRID as f32;
                vec![Detection {
                    bbox: BoundingBox {
                        left: l as f32 * cell,
                        top: t as f32 * cell,
                        right: (r + 1) as f32 * cell,
                        bottom: (b + 1) as f32 * cell,
                    },
                    confidence: MOTION_CONFIDENCE,
                    label: "motion".to_string(),
                }]
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fill: u8) -> Vec<u8> {
        vec![fill; 8 * 8 * 3]
    }

    #[test]
    fn motion_backend_detects_changed_region() {
        let mut backend = MotionBackend::default();

        assert!(backend.detect(&frame(10), 8, 8).unwrap().is_empty());
        assert!(backend.detect(&frame(10), 8, 8).unwrap().is_empty());

        let mut moved = frame(10);
        moved[0] = 200;
        let detections = backend.detect(&moved, 8, 8).unwrap();
        assert_eq!(detections.len(), 1);
        let bbox = detections[0].bbox;
        assert_eq!((bbox.left, bbox.top), (0.0, 0.0));
        assert_eq!((bbox.right, bbox.bottom), (0.25, 0.25));
        assert_eq!(detections[0].confidence, 0.85);
        assert_eq!(detections[0].label, "motion");

        let detections = backend.detect(&frame(99), 8, 8).unwrap();
        assert_eq!(detections[0].bbox.width(), 1.0);
        assert_eq!(detections[0].bbox.height(), 1.0);
    }

    #[test]
    fn size_change_resets_reference() {
        let mut backend = MotionBackend::default();
        backend.detect(&frame(1), 8, 8).unwrap();
        assert!(backend.detect(&vec![2u8; 4 * 4 * 3], 4, 4).unwrap().is_empty());
    }

    #[test]
    fn short_buffer_is_an_error() {
        let mut backend = MotionBackend::default();
        assert!(backend.detect(&[0u8; 10], 8, 8).is_err());
    }
}
