//! camwatch
//!
//! Live camera ingestion with periodic object detection.
//!
//! # Architecture
//!
//! A session runs three independent units of work:
//!
//! 1. **Source**: a network MJPEG stream or a USB device produces frames on its own
//!    thread and publishes them into the `FrameBuffer`.
//! 2. **Scheduler**: a single periodic loop takes the latest frame, downscales it and
//!    submits it to a `Detector` without waiting for the answer.
//! 3. **Platform callbacks**: device attach, permission and detach notifications flow
//!    into the `DeviceConnectionManager` over a channel.
//!
//! The only state shared between them is the single-slot `FrameBuffer`. A slow detector
//! never slows the source down: intermediate frames are simply replaced.
//!
//! # Module Structure
//!
//! - `ingest`: multipart demuxer, stream sources, cancellable reads
//! - `device`: USB device state machine and platforms (synthetic, V4L2)
//! - `frame`: frames, latest-frame buffer, per-session publisher
//! - `scheduler`: periodic detection loop and orientation hints
//! - `detect`: detector boundary, worker-thread detector, bundled backends
//! - `session`: wiring and joint cancellation
//! - `config`: file + environment configuration for `camwatchd`

pub mod cancel;
pub mod config;
pub mod detect;
pub mod device;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod scheduler;
pub mod session;

pub use cancel::CancelToken;
pub use config::{CamwatchConfig, SourceKind};
pub use detect::{
    BackendDetector, BackendRegistry, ChannelListener, Detection, DetectionListener,
    DetectionOutcome, DetectionRequest, DetectionResult, Detector, DetectorBackend, Rotation,
};
pub use device::{
    CaptureParams, DeviceConnectionManager, DeviceEvent, DeviceInfo, DeviceSource, DeviceState,
    FrameFormat,
};
pub use error::{DetectionError, DeviceError, ParseError, StreamError};
pub use frame::{Frame, FrameBuffer, FramePublisher};
pub use ingest::{
    EndReason, FrameSource, MjpegDemuxer, ReaderSource, SourceContext, SourceEvent, StreamConfig,
    StreamSource,
};
pub use scheduler::{DetectionScheduler, DisplayOrientation, OrientationSource, SchedulerStats};
pub use session::{Session, SessionOptions};
