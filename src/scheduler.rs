//! Periodic detection scheduler.
//!
//! One loop thread at a time. Each tick takes the latest frame from the `FrameBuffer`,
//! downscales it to the detector's input size and submits it with the current rotation
//! hint. The loop never waits on the detector; a tick without a frame is skipped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};

use crate::cancel::CancelToken;
use crate::detect::{DetectionListener, DetectionRequest, Detector, Rotation};
use crate::frame::{Frame, FrameBuffer};

// ----------------------------------------------------------------------------
// Orientation
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayOrientation {
    #[default]
    Portrait,
    Landscape,
}

impl DisplayOrientation {
    pub fn rotation(self) -> Rotation {
        match self {
            DisplayOrientation::Portrait => Rotation::Deg0,
            DisplayOrientation::Landscape => Rotation::Deg90,
        }
    }
}

/// Current display orientation, read once per tick.
pub trait OrientationSource: Send + Sync {
    fn orientation(&self) -> DisplayOrientation;
}

impl OrientationSource for DisplayOrientation {
    fn orientation(&self) -> DisplayOrientation {
        *self
    }
}

/// Orientation that can be changed while the scheduler runs.
#[derive(Default)]
pub struct SharedOrientation {
    landscape: AtomicBool,
}

impl SharedOrientation {
    pub fn new(orientation: DisplayOrientation) -> Self {
        let shared = Self::default();
        shared.set(orientation);
        shared
    }

    pub fn set(&self, orientation: DisplayOrientation) {
        self.landscape.store(
            orientation == DisplayOrientation::Landscape,
            Ordering::SeqCst,
        );
    }
}

impl OrientationSource for SharedOrientation {
    fn orientation(&self) -> DisplayOrientation {
        if self.landscape.load(Ordering::SeqCst) {
            DisplayOrientation::Landscape
        } else {
            DisplayOrientation::Portrait
        }
    }
}

// ----------------------------------------------------------------------------
// Stats
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub submissions: u64,
    pub empty_ticks: u64,
    pub failed_ticks: u64,
    pub loops_started: u64,
    /// Loops currently running. Never exceeds 1.
    pub active_loops: u64,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    submissions: AtomicU64,
    empty_ticks: AtomicU64,
    failed_ticks: AtomicU64,
    loops_started: AtomicU64,
    active_loops: AtomicU64,
}

// ----------------------------------------------------------------------------
// DetectionScheduler
// ----------------------------------------------------------------------------

struct LoopHandle {
    cancel: CancelToken,
    thread: JoinHandle<()>,
}

impl LoopHandle {
    fn cancel_and_join(self) {
        self.cancel.cancel();
        if self.thread.join().is_err() {
            log::warn!("DetectionScheduler: loop thread panicked");
        }
    }
}

/// Everything one loop thread needs.
#[derive(Clone)]
struct TickContext {
    buffer: Arc<FrameBuffer>,
    detector: Arc<dyn Detector>,
    listener: Arc<dyn DetectionListener>,
    orientation: Arc<dyn OrientationSource>,
    counters: Arc<Counters>,
}

pub struct DetectionScheduler {
    ctx: TickContext,
    current: Mutex<Option<LoopHandle>>,
}

impl DetectionScheduler {
    pub fn new(
        buffer: Arc<FrameBuffer>,
        detector: Arc<dyn Detector>,
        listener: Arc<dyn DetectionListener>,
        orientation: Arc<dyn OrientationSource>,
    ) -> Self {
        Self {
            ctx: TickContext {
                buffer,
                detector,
                listener,
                orientation,
                counters: Arc::new(Counters::default()),
            },
            current: Mutex::new(None),
        }
    }

    /// Start ticking every `interval`. A running loop is cancelled and joined first.
    pub fn start(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(anyhow!("detection interval must be positive"));
        }

        let mut current = self.lock_current()?;
        if let Some(previous) = current.take() {
            log::debug!("DetectionScheduler: replacing running loop");
            previous.cancel_and_join();
        }

        let cancel = CancelToken::new();
        let loop_cancel = cancel.clone();
        let ctx = self.ctx.clone();
        let thread = std::thread::Builder::new()
            .name("detection-scheduler".to_string())
            .spawn(move || run_loop(ctx, loop_cancel, interval))
            .context("spawn detection scheduler")?;

        self.ctx.counters.loops_started.fetch_add(1, Ordering::SeqCst);
        *current = Some(LoopHandle { cancel, thread });
        log::info!(
            "DetectionScheduler: started ({} ms interval)",
            interval.as_millis()
        );
        Ok(())
    }

    /// Cancel and join the running loop. No submission happens after this returns.
    pub fn stop(&self) {
        let previous = match self.lock_current() {
            Ok(mut current) => current.take(),
            Err(err) => {
                log::warn!("DetectionScheduler: {}", err);
                None
            }
        };
        if let Some(previous) = previous {
            previous.cancel_and_join();
            log::info!("DetectionScheduler: stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_current()
            .map(|current| current.is_some())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.ctx.counters;
        SchedulerStats {
            ticks: c.ticks.load(Ordering::SeqCst),
            submissions: c.submissions.load(Ordering::SeqCst),
            empty_ticks: c.empty_ticks.load(Ordering::SeqCst),
            failed_ticks: c.failed_ticks.load(Ordering::SeqCst),
            loops_started: c.loops_started.load(Ordering::SeqCst),
            active_loops: c.active_loops.load(Ordering::SeqCst),
        }
    }

    fn lock_current(&self) -> Result<MutexGuard<'_, Option<LoopHandle>>> {
        self.current
            .lock()
            .map_err(|_| anyhow!("scheduler state lock poisoned"))
    }
}

impl Drop for DetectionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(ctx: TickContext, cancel: CancelToken, interval: Duration) {
    ctx.counters.active_loops.fetch_add(1, Ordering::SeqCst);
    while !cancel.is_cancelled() {
        tick(&ctx, &cancel);
        if cancel.wait_timeout(interval) {
            break;
        }
    }
    ctx.counters.active_loops.fetch_sub(1, Ordering::SeqCst);
}

fn tick(ctx: &TickContext, cancel: &CancelToken) {
    let counters = &ctx.counters;
    counters.ticks.fetch_add(1, Ordering::Relaxed);

    let Some(frame) = ctx.buffer.snapshot() else {
        counters.empty_ticks.fetch_add(1, Ordering::Relaxed);
        return;
    };
    let rotation = ctx.orientation.orientation().rotation();
    let (width, height) = ctx.detector.input_size();

    let Some(image) = downscale(&frame, width, height) else {
        counters.failed_ticks.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "DetectionScheduler: cannot scale frame {} ({}x{}, {} bytes) to {}x{}",
            frame.sequence,
            frame.width,
            frame.height,
            frame.byte_len(),
            width,
            height
        );
        return;
    };

    if cancel.is_cancelled() {
        return;
    }
    ctx.detector.submit(
        DetectionRequest::new(frame, image, rotation),
        ctx.listener.clone(),
    );
    counters.submissions.fetch_add(1, Ordering::Relaxed);
}

/// Scale a frame to `width` x `height`. `None` if the frame's pixels do not match its
/// declared size or the target is empty.
pub fn downscale(frame: &Frame, width: u32, height: u32) -> Option<RgbImage> {
    if width == 0 || height == 0 {
        return None;
    }
    let source: ImageBuffer<Rgb<u8>, &[u8]> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.pixels())?;
    if (frame.width, frame.height) == (width, height) {
        return RgbImage::from_raw(width, height, frame.pixels().to_vec());
    }
    Some(imageops::resize(&source, width, height, FilterType::Triangle))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectionResult;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const FRAME_SIZE: (u32, u32) = (64, 48);

    /// Poll `condition` until it holds or two seconds pass.
    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[derive(Default)]
    struct RecordingDetector {
        input: Option<(u32, u32)>,
        submissions: Mutex<Vec<(u64, Rotation, (u32, u32))>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl RecordingDetector {
        fn count(&self) -> usize {
            self.submissions.lock().unwrap().len()
        }

        fn rotations(&self) -> Vec<Rotation> {
            self.submissions
                .lock()
                .unwrap()
                .iter()
                .map(|(_, rotation, _)| *rotation)
                .collect()
        }
    }

    impl Detector for RecordingDetector {
        fn input_size(&self) -> (u32, u32) {
            // Frames already at input size take the copy path in `downscale`.
            self.input.unwrap_or(FRAME_SIZE)
        }

        fn submit(&self, request: DetectionRequest, _listener: Arc<dyn DetectionListener>) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            self.submissions.lock().unwrap().push((
                request.sequence(),
                request.rotation,
                request.image.dimensions(),
            ));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct NullListener;

    impl DetectionListener for NullListener {
        fn on_result(&self, _result: DetectionResult) {}

        fn on_error(&self, _message: &str, _code: i32) {}
    }

    fn scheduler(
        buffer: Arc<FrameBuffer>,
        detector: Arc<RecordingDetector>,
        orientation: Arc<dyn OrientationSource>,
    ) -> DetectionScheduler {
        DetectionScheduler::new(buffer, detector, Arc::new(NullListener), orientation)
    }

    fn frame(sequence: u64) -> Frame {
        let (width, height) = FRAME_SIZE;
        Frame::new(vec![128u8; (width * height * 3) as usize], width, height, sequence)
    }

    #[test]
    fn empty_buffer_skips_ticks() -> Result<()> {
        let detector = Arc::new(RecordingDetector::default());
        let s = scheduler(
            Arc::new(FrameBuffer::new()),
            detector.clone(),
            Arc::new(DisplayOrientation::Portrait),
        );
        s.start(Duration::from_millis(5))?;
        assert!(wait_until(|| s.stats().ticks >= 2));
        s.stop();

        let stats = s.stats();
        assert!(stats.ticks >= 2);
        assert_eq!(stats.empty_ticks, stats.ticks);
        assert_eq!(detector.count(), 0);
        Ok(())
    }

    #[test]
    fn restart_keeps_a_single_loop() -> Result<()> {
        let buffer = Arc::new(FrameBuffer::new());
        buffer.publish(frame(1));
        let detector = Arc::new(RecordingDetector::default());
        let s = scheduler(
            buffer,
            detector.clone(),
            Arc::new(DisplayOrientation::Portrait),
        );

        for _ in 0..5 {
            s.start(Duration::from_millis(1))?;
            assert!(s.stats().active_loops <= 1);
        }
        assert!(wait_until(|| detector.count() >= 3));
        assert_eq!(s.stats().active_loops, 1);
        s.stop();

        let stats = s.stats();
        assert_eq!(stats.loops_started, 5);
        assert_eq!(stats.active_loops, 0);
        assert_eq!(detector.max_in_flight.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn no_submissions_after_stop() -> Result<()> {
        let buffer = Arc::new(FrameBuffer::new());
        buffer.publish(frame(1));
        let detector = Arc::new(RecordingDetector::default());
        let s = scheduler(
            buffer,
            detector.clone(),
            Arc::new(DisplayOrientation::Portrait),
        );
        s.start(Duration::from_millis(2))?;
        assert!(wait_until(|| detector.count() >= 1));
        s.stop();
        assert!(!s.is_running());

        let after_stop = detector.count();
        assert!(after_stop >= 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(detector.count(), after_stop);
        Ok(())
    }

    #[test]
    fn rotation_is_read_every_tick() -> Result<()> {
        let buffer = Arc::new(FrameBuffer::new());
        buffer.publish(frame(1));
        let orientation = Arc::new(SharedOrientation::new(DisplayOrientation::Portrait));
        let detector = Arc::new(RecordingDetector::default());
        let s = scheduler(buffer, detector.clone(), orientation.clone());

        s.start(Duration::from_millis(5))?;
        assert!(wait_until(|| detector.count() >= 1));
        orientation.set(DisplayOrientation::Landscape);
        assert!(wait_until(
            || detector.rotations().last() == Some(&Rotation::Deg90)
        ));
        s.stop();

        let rotations = detector.rotations();
        assert_eq!(rotations.first(), Some(&Rotation::Deg0));
        assert_eq!(rotations.last(), Some(&Rotation::Deg90));
        Ok(())
    }

    #[test]
    fn frames_are_scaled_to_detector_input() -> Result<()> {
        let buffer = Arc::new(FrameBuffer::new());
        buffer.publish(frame(3));
        let detector = Arc::new(RecordingDetector {
            input: Some((16, 12)),
            ..RecordingDetector::default()
        });
        let s = scheduler(
            buffer,
            detector.clone(),
            Arc::new(DisplayOrientation::Landscape),
        );
        s.start(Duration::from_millis(5))?;
        assert!(wait_until(|| detector.count() >= 1));
        s.stop();

        let submissions = detector.submissions.lock().unwrap();
        assert!(!submissions.is_empty());
        assert!(submissions
            .iter()
            .all(|entry| *entry == (3, Rotation::Deg90, (16, 12))));
        Ok(())
    }

    #[test]
    fn mismatched_frame_fails_the_tick() -> Result<()> {
        let buffer = Arc::new(FrameBuffer::new());
        buffer.publish(Frame::new(vec![0u8; 10], 64, 48, 1));
        let detector = Arc::new(RecordingDetector::default());
        let s = scheduler(
            buffer,
            detector.clone(),
            Arc::new(DisplayOrientation::Portrait),
        );
        s.start(Duration::from_millis(5))?;
        assert!(wait_until(|| s.stats().failed_ticks >= 1));
        s.stop();

        assert_eq!(detector.count(), 0);
        assert!(s.stats().failed_ticks >= 1);
        Ok(())
    }

    #[test]
    fn zero_interval_is_rejected() {
        let s = scheduler(
            Arc::new(FrameBuffer::new()),
            Arc::new(RecordingDetector::default()),
            Arc::new(DisplayOrientation::Portrait),
        );
        assert!(s.start(Duration::ZERO).is_err());
        assert!(!s.is_running());
    }

    #[test]
    fn downscale_defaults_to_detector_size() {
        let image = downscale(&frame(1), 384, 384).expect("scaled");
        assert_eq!(image.dimensions(), (384, 384));
        let same = downscale(&frame(1), 64, 48).expect("same size");
        assert_eq!(same.as_raw().len(), 64 * 48 * 3);
    }
}
