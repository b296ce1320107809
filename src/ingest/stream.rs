//! Network camera stream source.
//!
//! This module provides `StreamSource` for ingesting multipart MJPEG streams.
//!
//! The stream source is responsible for:
//! - Opening one connection per stream session
//! - Sending the optional auth header once, at connection open
//! - Handing the response body to the demuxer through a `CancellableReader`
//!
//! The stream source MUST NOT:
//! - Reconnect after the stream ends or fails
//! - Log the auth header value

use std::io::{self, Read};
use std::time::Duration;

#[cfg(feature = "ingest-http")]
use anyhow::Context;
use anyhow::Result;

use super::{
    mjpeg, pump_frames, synthetic_pixels, EndReason, FrameSource, SourceContext, SourceEvent,
};
use crate::cancel::CancelToken;
use crate::frame::valid_dimensions;

pub const DEFAULT_STREAM_URL: &str = "http://192.168.4.1/stream";
pub const DEFAULT_AUTH_HEADER: &str = "X-API-Key";

/// Custom header sent once when the connection opens.
#[derive(Clone)]
pub struct StreamAuth {
    pub header: String,
    pub value: String,
}

impl StreamAuth {
    pub fn api_key(value: &str) -> Self {
        Self {
            header: DEFAULT_AUTH_HEADER.to_string(),
            value: value.to_string(),
        }
    }
}

impl std::fmt::Debug for StreamAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAuth")
            .field("header", &self.header)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Configuration for a stream source.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Stream URL (e.g., "http://192.168.4.1/stream"), or "stub://name" for a synthetic stream.
    pub url: String,
    pub auth: Option<StreamAuth>,
    pub connect_timeout: Duration,
    /// Upper bound on a single blocking read; also how often cancellation is observed.
    pub read_timeout: Duration,
    /// Frame width (synthetic streams only).
    pub width: u32,
    /// Frame height (synthetic streams only).
    pub height: u32,
    /// Spacing between synthetic frames.
    pub frame_interval: Duration,
    /// End a synthetic stream after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            auth: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(500),
            width: 640,
            height: 480,
            frame_interval: Duration::from_millis(100),
            max_frames: None,
        }
    }
}

/// Multipart stream source.
///
/// Uses ureq for real cameras, with a synthetic fallback for `stub://` URLs.
pub struct StreamSource {
    config: StreamConfig,
    backend: StreamBackend,
}

enum StreamBackend {
    Synthetic,
    #[cfg(feature = "ingest-http")]
    Http(ureq::Agent),
}

impl StreamSource {
    pub fn new(config: StreamConfig) -> Result<Self> {
        if config.url.starts_with("stub://") {
            if !valid_dimensions(config.width, config.height) {
                anyhow::bail!("invalid stream size {}x{}", config.width, config.height);
            }
            return Ok(Self {
                config,
                backend: StreamBackend::Synthetic,
            });
        }

        #[cfg(feature = "ingest-http")]
        {
            let parsed = url::Url::parse(&config.url)
                .with_context(|| format!("invalid stream url {}", config.url))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("unsupported stream url scheme '{}'", parsed.scheme());
            }
            let agent = ureq::AgentBuilder::new()
                .timeout_connect(config.connect_timeout)
                .timeout_read(config.read_timeout)
                .build();
            Ok(Self {
                config,
                backend: StreamBackend::Http(agent),
            })
        }
        #[cfg(not(feature = "ingest-http"))]
        {
            anyhow::bail!("network streams require the ingest-http feature")
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn open(&self, cancel: &CancelToken) -> Result<Box<dyn Read + Send>> {
        match &self.backend {
            StreamBackend::Synthetic => {
                log::info!("StreamSource: connected to {} (synthetic)", self.config.url);
                Ok(Box::new(SyntheticMultipartReader::new(
                    self.config.clone(),
                    cancel.clone(),
                )))
            }
            #[cfg(feature = "ingest-http")]
            StreamBackend::Http(agent) => {
                let mut request = agent.get(&self.config.url);
                if let Some(auth) = &self.config.auth {
                    request = request.set(&auth.header, &auth.value);
                }
                let response = request
                    .call()
                    .with_context(|| format!("connect to {}", self.config.url))?;
                let content_type = response.content_type().to_string();
                if !content_type.starts_with("multipart/") {
                    log::warn!(
                        "StreamSource: {} answered with content type '{}'; demuxing anyway",
                        self.config.url,
                        content_type
                    );
                }
                log::info!(
                    "StreamSource: connected to {} (status {})",
                    self.config.url,
                    response.status()
                );
                Ok(Box::new(response.into_reader()))
            }
        }
    }
}

impl FrameSource for StreamSource {
    fn describe(&self) -> String {
        self.config.url.clone()
    }

    fn run(&mut self, ctx: &SourceContext) {
        let source = self.describe();
        let reader = match self.open(&ctx.cancel) {
            Ok(reader) => reader,
            Err(err) => {
                log::warn!("StreamSource: {:#}", err);
                ctx.emit(SourceEvent::Ended {
                    source,
                    reason: EndReason::Io(format!("{:#}", err)),
                });
                return;
            }
        };

        ctx.emit(SourceEvent::Streaming {
            source: source.clone(),
        });
        let reason = pump_frames(reader, ctx, &source);
        ctx.emit(SourceEvent::Ended { source, reason });
    }
}

// ----------------------------------------------------------------------------
// Synthetic stream (stub://) for tests
// ----------------------------------------------------------------------------

/// Produces a well-formed multipart byte stream on demand.
struct SyntheticMultipartReader {
    config: StreamConfig,
    cancel: CancelToken,
    pending: Vec<u8>,
    pos: usize,
    frame_count: u64,
}

impl SyntheticMultipartReader {
    fn new(config: StreamConfig, cancel: CancelToken) -> Self {
        Self {
            config,
            cancel,
            pending: Vec::new(),
            pos: 0,
            frame_count: 0,
        }
    }

    fn next_part(&mut self) -> io::Result<()> {
        self.frame_count += 1;
        let pixels = synthetic_pixels(self.config.width, self.config.height, self.frame_count);
        let jpeg = mjpeg::encode_jpeg(pixels, self.config.width, self.config.height)
            .map_err(io::Error::other)?;
        self.pending.clear();
        self.pos = 0;
        mjpeg::write_part(&mut self.pending, &jpeg);
        Ok(())
    }
}

impl Read for SyntheticMultipartReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.pending.len() {
            if self
                .config
                .max_frames
                .is_some_and(|max| self.frame_count >= max)
            {
                return Ok(0);
            }
            if self.frame_count > 0 && self.cancel.wait_timeout(self.config.frame_interval) {
                // Same wake-up a socket read timeout produces.
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "cancelled"));
            }
            self.next_part()?;
        }

        let available = &self.pending[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
