//! Frames and the latest-frame hand-off.
//!
//! - `Frame`: immutable decoded image. Pixels are private and only readable by borrow.
//! - `FrameBuffer`: single-slot "latest wins" cache shared by producer and consumer.
//! - `FramePublisher`: per-session producer handle that numbers and publishes frames.
//!
//! The buffer never queues. A publish replaces the held frame with one atomic pointer
//! swap, so a slow consumer silently skips intermediate frames and neither side blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwapOption;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Largest accepted frame width or height.
pub const MAX_FRAME_DIMENSION: u32 = 8192;

/// Byte length of a packed RGB8 frame, `None` on overflow.
pub fn rgb_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(3)
}

/// True when both sides are non-zero and within `MAX_FRAME_DIMENSION`.
pub fn valid_dimensions(width: u32, height: u32) -> bool {
    (1..=MAX_FRAME_DIMENSION).contains(&width) && (1..=MAX_FRAME_DIMENSION).contains(&height)
}

/// Decoded RGB8 frame. Not `Clone`: frames move into the buffer and are shared as `Arc<Frame>`.
pub struct Frame {
    /// Packed RGB8 pixels, `width * height * 3` bytes.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Monotonically increasing within one stream session, starting at 1.
    pub sequence: u64,

    /// Wall-clock capture time.
    pub captured_at: SystemTime,

    capture_instant: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
            captured_at: SystemTime::now(),
            capture_instant: Instant::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Time since capture, from a monotonic clock.
    pub fn age(&self) -> Duration {
        self.capture_instant.elapsed()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is deliberately left out.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer
// ----------------------------------------------------------------------------

/// Single-slot, overwrite-on-write frame cache.
#[derive(Default)]
pub struct FrameBuffer {
    slot: ArcSwapOption<Frame>,
    published: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame. Never blocks; the previous frame is dropped once its
    /// last reader lets go of it.
    pub fn publish(&self, frame: Frame) -> Arc<Frame> {
        let frame = Arc::new(frame);
        self.slot.store(Some(frame.clone()));
        self.published.fetch_add(1, Ordering::Relaxed);
        frame
    }

    /// The most recently published frame, or `None` if nothing is held.
    pub fn snapshot(&self) -> Option<Arc<Frame>> {
        self.slot.load_full()
    }

    pub fn has_frame(&self) -> bool {
        self.slot.load().is_some()
    }

    /// Drop the held frame. Used at session teardown so a stale frame is never detected.
    pub fn clear(&self) {
        self.slot.store(None);
    }

    /// Total publishes since creation.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

// ----------------------------------------------------------------------------
// FramePublisher
// ----------------------------------------------------------------------------

/// Producer handle for one stream session.
///
/// Each session gets a fresh publisher, so sequence numbers restart at 1 and stay
/// strictly increasing for the lifetime of that session.
pub struct FramePublisher {
    buffer: Arc<FrameBuffer>,
    last_sequence: u64,
    published: u64,
}

impl FramePublisher {
    pub fn new(buffer: Arc<FrameBuffer>) -> Self {
        Self {
            buffer,
            last_sequence: 0,
            published: 0,
        }
    }

    /// Publish a frame that was already numbered by its producer (the demuxer).
    ///
    /// Frames whose sequence does not advance are dropped.
    pub fn publish(&mut self, frame: Frame) -> bool {
        if frame.sequence <= self.last_sequence {
            log::warn!(
                "FramePublisher: dropping frame {} (last published {})",
                frame.sequence,
                self.last_sequence
            );
            return false;
        }
        self.last_sequence = frame.sequence;
        self.published += 1;
        self.buffer.publish(frame);
        true
    }

    /// Number and publish raw RGB8 pixels. Returns the assigned sequence number.
    pub fn publish_pixels(&mut self, data: Vec<u8>, width: u32, height: u32) -> u64 {
        let sequence = self.last_sequence + 1;
        self.publish(Frame::new(data, width, height, sequence));
        sequence
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
