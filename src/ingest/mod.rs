//! Frame ingestion sources.
//!
//! This module provides the sources a session can be built over:
//! - Multipart MJPEG streams from network cameras (feature: ingest-http)
//! - Synthetic multipart streams for `stub://` URLs (testing, demos)
//! - Any in-process byte reader (`ReaderSource`)
//! - USB devices, via `device::DeviceSource`
//!
//! All sources publish `Frame`s into the shared `FrameBuffer` and report session
//! boundaries as `SourceEvent`s. The ingestion layer is responsible for:
//! - Demuxing and decoding frames on its own thread
//! - Numbering frames per stream session
//! - Observing the session's `CancelToken` and releasing its byte source on cancel
//!
//! The ingestion layer MUST NOT:
//! - Queue frames beyond the single slot in `FrameBuffer`
//! - Retry or reconnect on its own (restart policy belongs to the caller)
//! - Log frame content

pub mod mjpeg;
pub mod stream;

use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cancel::CancelToken;
use crate::error::{DeviceError, StreamError};
use crate::frame::{rgb_len, FrameBuffer, FramePublisher};

pub use mjpeg::{DemuxStats, MjpegDemuxer, HEADER_CAP, MAX_PAYLOAD_BYTES};
pub use stream::{StreamAuth, StreamConfig, StreamSource};

/// Why a stream session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// Cancelled by the owner.
    Stopped,
    /// The byte source reached end of stream.
    Ended,
    /// The device was removed.
    Disconnected,
    /// The byte source failed.
    Io(String),
    /// The device could not be opened, configured, started, or failed while capturing.
    Device(DeviceError),
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::Stopped => write!(f, "stopped"),
            EndReason::Ended => write!(f, "end of stream"),
            EndReason::Disconnected => write!(f, "device disconnected"),
            EndReason::Io(err) => write!(f, "i/o error: {}", err),
            EndReason::Device(err) => write!(f, "device error: {}", err),
        }
    }
}

/// Session boundary notifications emitted by sources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    /// Frames are flowing for a new stream session.
    Streaming { source: String },
    /// The current stream session is over.
    Ended { source: String, reason: EndReason },
    /// A device was refused because another one is held.
    Rejected { source: String, reason: String },
}

/// Everything a source needs while it runs.
#[derive(Clone)]
pub struct SourceContext {
    pub buffer: Arc<FrameBuffer>,
    pub events: Sender<SourceEvent>,
    pub cancel: CancelToken,
}

impl SourceContext {
    pub fn new(buffer: Arc<FrameBuffer>, events: Sender<SourceEvent>, cancel: CancelToken) -> Self {
        Self {
            buffer,
            events,
            cancel,
        }
    }

    /// A fresh publisher; call once per stream session.
    pub fn publisher(&self) -> FramePublisher {
        FramePublisher::new(self.buffer.clone())
    }

    pub fn emit(&self, event: SourceEvent) {
        // The receiver going away only means nobody is listening any more.
        let _ = self.events.send(event);
    }
}

/// A capability that produces frames for a session.
///
/// `run` blocks until the source is cancelled or fails terminally. Stream-based sources
/// run exactly one stream session; device-based sources may run several, one per
/// attach/connect cycle. Every session is bracketed by `Streaming` and `Ended` events.
pub trait FrameSource: Send {
    fn describe(&self) -> String;

    fn run(&mut self, ctx: &SourceContext);
}

// ----------------------------------------------------------------------------
// Cancellable reads
// ----------------------------------------------------------------------------

#[derive(Debug, Error)]
#[error("read cancelled")]
struct ReadCancelled;

pub(crate) fn is_cancelled_error(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<ReadCancelled>())
}

/// Pause before retrying a reader that reported `WouldBlock`.
const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(10);

/// Reader that checks a cancel token before every read and drops the inner reader
/// (closing the connection) once cancelled.
///
/// Read timeouts from the inner reader are treated as wake-ups: the read is retried
/// unless the token was cancelled in the meantime. `WouldBlock` is retried after a
/// short back-off. A reader that can block indefinitely needs a closer registered on
/// the token (see `ReaderSource::with_closer`).
pub struct CancellableReader<R> {
    inner: Option<R>,
    cancel: CancelToken,
}

impl<R: Read> CancellableReader<R> {
    pub fn new(inner: R, cancel: CancelToken) -> Self {
        Self {
            inner: Some(inner),
            cancel,
        }
    }
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.cancel.is_cancelled() {
                self.inner = None;
            }
            let Some(inner) = self.inner.as_mut() else {
                return Err(io::Error::other(ReadCancelled));
            };
            match inner.read(buf) {
                Err(err) if err.kind() == io::ErrorKind::TimedOut => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.cancel.wait_timeout(WOULD_BLOCK_BACKOFF);
                }
                other => return other,
            }
        }
    }
}

/// Demux `reader` into the session's frame buffer until it ends or is cancelled.
pub(crate) fn pump_frames<R: Read>(reader: R, ctx: &SourceContext, source: &str) -> EndReason {
    let reader = CancellableReader::new(reader, ctx.cancel.clone());
    let mut demuxer = MjpegDemuxer::new(reader);
    let mut publisher = ctx.publisher();

    let reason = loop {
        match demuxer.next_frame() {
            Ok(frame) => {
                publisher.publish(frame);
            }
            Err(StreamError::Cancelled) => break EndReason::Stopped,
            Err(_) if ctx.cancel.is_cancelled() => break EndReason::Stopped,
            Err(StreamError::Ended) => break EndReason::Ended,
            Err(StreamError::Io(err)) => break EndReason::Io(err.to_string()),
        }
    };

    let stats = demuxer.stats();
    log::info!(
        "{}: stream session over ({}): frames={} parse_errors={} decode_errors={} resyncs={}",
        source,
        reason,
        stats.frames,
        stats.parse_errors,
        stats.decode_errors,
        stats.resyncs
    );
    reason
}

/// Test-pattern pixels for synthetic sources. The scene shifts every 50 frames so
/// consecutive frames differ slightly and motion shows up periodically.
pub(crate) fn synthetic_pixels(width: u32, height: u32, frame_count: u64) -> Vec<u8> {
    let pixel_count = rgb_len(width, height).unwrap_or(0);
    let scene_state = frame_count / 50;

    let mut pixels = vec![0u8; pixel_count];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + frame_count + scene_state * 37) % 256) as u8;
    }
    pixels
}

// ----------------------------------------------------------------------------
// ReaderSource
// ----------------------------------------------------------------------------

type Closer = Box<dyn FnOnce() + Send>;

/// Stream source over an already-open byte reader. Runs one stream session.
pub struct ReaderSource {
    name: String,
    reader: Option<Box<dyn Read + Send>>,
    closer: Option<Closer>,
}

impl ReaderSource {
    /// Source over a reader that returns on its own: end of data, read timeouts or
    /// `WouldBlock`.
    pub fn new<R: Read + Send + 'static>(name: &str, reader: R) -> Self {
        Self {
            name: name.to_string(),
            reader: Some(Box::new(reader)),
            closer: None,
        }
    }

    /// Source over a reader that may block indefinitely. `close` runs when the session
    /// is cancelled and must make a pending read return.
    pub fn with_closer<R, F>(name: &str, reader: R, close: F) -> Self
    where
        R: Read + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        Self {
            closer: Some(Box::new(close)),
            ..Self::new(name, reader)
        }
    }

    /// Source over a connected TCP stream. Cancelling shuts the socket down.
    pub fn from_tcp(name: &str, stream: TcpStream) -> io::Result<Self> {
        let control = stream.try_clone()?;
        Ok(Self::with_closer(name, stream, move || {
            let _ = control.shutdown(Shutdown::Both);
        }))
    }

    /// Source over a connected Unix socket. Cancelling shuts the socket down.
    #[cfg(unix)]
    pub fn from_unix(name: &str, stream: UnixStream) -> io::Result<Self> {
        let control = stream.try_clone()?;
        Ok(Self::with_closer(name, stream, move || {
            let _ = control.shutdown(Shutdown::Both);
        }))
    }
}

impl FrameSource for ReaderSource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn run(&mut self, ctx: &SourceContext) {
        let Some(reader) = self.reader.take() else {
            log::warn!("{}: reader already consumed; sources are not restartable", self.name);
            ctx.emit(SourceEvent::Ended {
                source: self.name.clone(),
                reason: EndReason::Ended,
            });
            return;
        };
        if let Some(close) = self.closer.take() {
            ctx.cancel.on_cancel(close);
        }
        ctx.emit(SourceEvent::Streaming {
            source: self.name.clone(),
        });
        let reason = pump_frames(reader, ctx, &self.name);
        ctx.emit(SourceEvent::Ended {
            source: self.name.clone(),
            reason,
        });
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;

    struct Blocking {
        reads: usize,
    }

    impl Read for Blocking {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            std::thread::sleep(std::time::Duration::from_millis(5));
            Err(io::Error::new(io::ErrorKind::WouldBlock, "timeout"))
        }
    }

    #[test]
    fn cancelled_reader_reports_cancellation() {
        let cancel = CancelToken::new();
        let mut reader = CancellableReader::new(Cursor::new(vec![1u8; 8]), cancel.clone());
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        cancel.cancel();
        let err = reader.read(&mut buf).unwrap_err();
        assert!(is_cancelled_error(&err));
        assert!(matches!(StreamError::from_read(err), StreamError::Cancelled));
    }

    #[test]
    fn timeouts_are_retried_until_cancel() {
        let cancel = CancelToken::new();
        let mut reader = CancellableReader::new(Blocking { reads: 0 }, cancel.clone());
        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(30));
            canceller.cancel();
        });
        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).unwrap_err();
        assert!(is_cancelled_error(&err));
        handle.join().unwrap();
    }

    struct Spinning {
        reads: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Read for Spinning {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            self.reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"))
        }
    }

    #[test]
    fn would_block_backs_off_between_reads() {
        let reads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let cancel = CancelToken::new();
        let mut reader = CancellableReader::new(
            Spinning {
                reads: reads.clone(),
            },
            cancel.clone(),
        );
        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            canceller.cancel();
        });
        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).unwrap_err();
        handle.join().unwrap();

        assert!(is_cancelled_error(&err));
        let reads = reads.load(std::sync::atomic::Ordering::SeqCst);
        assert!((1..20).contains(&reads), "{} reads in 50ms", reads);
    }

    #[cfg(unix)]
    #[test]
    fn cancel_closes_a_blocked_socket() -> anyhow::Result<()> {
        let (reader, _writer) = std::os::unix::net::UnixStream::pair()?;
        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let ctx = SourceContext::new(Arc::new(FrameBuffer::new()), tx, cancel.clone());
        let mut source = ReaderSource::from_unix("socket", reader)?;
        let handle = std::thread::spawn(move || source.run(&ctx));

        assert!(matches!(
            rx.recv_timeout(std::time::Duration::from_secs(2)),
            Ok(SourceEvent::Streaming { .. })
        ));
        cancel.cancel();
        assert_eq!(
            rx.recv_timeout(std::time::Duration::from_secs(3))?,
            SourceEvent::Ended {
                source: "socket".into(),
                reason: EndReason::Stopped
            }
        );
        handle.join().unwrap();
        Ok(())
    }

    #[test]
    fn reader_source_brackets_its_session() {
        let mut data = Vec::new();
        let jpeg = mjpeg::encode_jpeg(vec![90u8; 8 * 8 * 3], 8, 8).unwrap();
        mjpeg::write_part(&mut data, &jpeg);
        mjpeg::write_part(&mut data, &jpeg);

        let buffer = Arc::new(FrameBuffer::new());
        let (tx, rx) = mpsc::channel();
        let ctx = SourceContext::new(buffer.clone(), tx, CancelToken::new());
        let mut source = ReaderSource::new("memory", Cursor::new(data));
        source.run(&ctx);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SourceEvent::Streaming {
                    source: "memory".into()
                },
                SourceEvent::Ended {
                    source: "memory".into(),
                    reason: EndReason::Ended
                },
            ]
        );
        assert_eq!(buffer.snapshot().unwrap().sequence, 2);
    }
}
