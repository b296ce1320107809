//! Error taxonomy.
//!
//! - `ParseError`: a single frame attempt was malformed. Absorbed by the demuxer.
//! - `StreamError`: the byte source failed or ended. Terminal for the session.
//! - `DeviceError`: watch, permission, open, configure or start failure. Drives the
//!   device state machine back to `Detached`.
//! - `DetectionError`: owned by the detector collaborator; only relayed.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("frame header boundary not found within {cap} bytes")]
    BoundaryNotFound { cap: usize },
    #[error("frame header has no Content-Length")]
    MissingContentLength,
    #[error("invalid Content-Length value '{0}'")]
    InvalidContentLength(String),
    #[error("Content-Length {len} exceeds limit of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("undecodable frame payload: {0}")]
    Undecodable(String),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream read failed: {0}")]
    Io(#[from] io::Error),
    #[error("stream ended")]
    Ended,
    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// Map a read error, treating the cancellation marker as `Cancelled`.
    pub(crate) fn from_read(err: io::Error) -> Self {
        if crate::ingest::is_cancelled_error(&err) {
            StreamError::Cancelled
        } else if err.kind() == io::ErrorKind::UnexpectedEof {
            StreamError::Ended
        } else {
            StreamError::Io(err)
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("failed to watch {device}: {reason}")]
    Watch { device: String, reason: String },
    #[error("permission request for {device} failed: {reason}")]
    Permission { device: String, reason: String },
    #[error("failed to open {device}: {reason}")]
    Open { device: String, reason: String },
    #[error("failed to configure {device}: {reason}")]
    Configure { device: String, reason: String },
    #[error("failed to start capture on {device}: {reason}")]
    Start { device: String, reason: String },
    #[error("capture on {device} failed: {reason}")]
    Capture { device: String, reason: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("detection failed ({code}): {message}")]
pub struct DetectionError {
    pub message: String,
    pub code: i32,
}

/// Error codes reported through `DetectionListener::on_error` by local detectors.
pub mod detection_codes {
    pub const BACKEND_FAILED: i32 = 1;
    pub const BUSY: i32 = 2;
    pub const UNAVAILABLE: i32 = 3;
}
