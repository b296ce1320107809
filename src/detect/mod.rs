//! Detection boundary.
//!
//! The core hands `DetectionRequest`s to a `Detector` and never waits for the answer.
//! Results and errors come back through a `DetectionListener`, possibly out of order;
//! each result carries the sequence number of the frame it was computed from.
//!
//! `BackendDetector` is the in-process detector: it runs a synchronous
//! `DetectorBackend` on a worker thread and drops requests while busy.

mod backend;
mod backends;
mod registry;
mod request;
mod result;
mod worker;

use std::sync::mpsc::Sender;
use std::sync::Arc;

pub use backend::DetectorBackend;
pub use backends::MotionBackend;
pub use registry::BackendRegistry;
pub use request::{DetectionRequest, Rotation};
pub use result::{BoundingBox, Detection, DetectionResult};
pub use worker::{BackendDetector, DetectorStats};

use crate::error::DetectionError;

/// Square input size expected by the bundled detectors.
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (384, 384);

/// External object-detection collaborator.
pub trait Detector: Send + Sync {
    /// Size the scheduler downscales frames to before submission.
    fn input_size(&self) -> (u32, u32) {
        DEFAULT_INPUT_SIZE
    }

    /// Queue a request. Must not block; completion is reported to `listener`.
    fn submit(&self, request: DetectionRequest, listener: Arc<dyn DetectionListener>);
}

/// Receives detection completions.
pub trait DetectionListener: Send + Sync {
    fn on_result(&self, result: DetectionResult);

    fn on_error(&self, message: &str, code: i32);
}

/// Outcome delivered by `ChannelListener`.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionOutcome {
    Result(DetectionResult),
    Error(DetectionError),
}

/// Listener that forwards every outcome into a channel.
pub struct ChannelListener {
    tx: Sender<DetectionOutcome>,
}

impl ChannelListener {
    pub fn new(tx: Sender<DetectionOutcome>) -> Self {
        Self { tx }
    }
}

impl DetectionListener for ChannelListener {
    fn on_result(&self, result: DetectionResult) {
        let _ = self.tx.send(DetectionOutcome::Result(result));
    }

    fn on_error(&self, message: &str, code: i32) {
        let _ = self.tx.send(DetectionOutcome::Error(DetectionError {
            message: message.to_string(),
            code,
        }));
    }
}
