//! Multipart MJPEG demuxer.
//!
//! Turns a boundary-delimited byte stream into decoded frames. Each part on the wire is
//!
//! ```text
//! <header lines>\r\n\r\n<Content-Length bytes of image payload>
//! ```
//!
//! The demuxer is responsible for:
//! - Finding the end of each header block within a bounded lookahead
//! - Reading exactly `Content-Length` payload bytes
//! - Decoding the payload in-memory and numbering the resulting frames
//!
//! Malformed parts are dropped and demuxing continues. Only a failed or exhausted byte
//! source ends the stream. The demuxer keeps no frame history.

use std::io::{Cursor, Read};

use image::{GenericImageView, ImageFormat, RgbImage};

use crate::error::{ParseError, StreamError};
use crate::frame::Frame;

/// Upper bound on the header lookahead. The buffer never grows past this.
pub const HEADER_CAP: usize = 4096;

/// Largest payload accepted from a `Content-Length` header.
pub const MAX_PAYLOAD_BYTES: usize = 5 * 1024 * 1024;

const BOUNDARY: &[u8] = b"\r\n\r\n";
const PART_BOUNDARY: &str = "frame";

/// Counters for one demuxer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub frames: u64,
    pub parse_errors: u64,
    pub decode_errors: u64,
    pub resyncs: u64,
    pub bytes_read: u64,
}

/// Demuxer over any byte source. One per stream session; not restartable.
pub struct MjpegDemuxer<R> {
    reader: R,
    lookahead: Vec<u8>,
    sequence: u64,
    stats: DemuxStats,
    finished: bool,
}

impl<R: Read> MjpegDemuxer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            lookahead: Vec::with_capacity(HEADER_CAP),
            sequence: 0,
            stats: DemuxStats::default(),
            finished: false,
        }
    }

    pub fn stats(&self) -> &DemuxStats {
        &self.stats
    }

    /// Bytes currently held in the lookahead. Never exceeds `HEADER_CAP`.
    pub fn lookahead_len(&self) -> usize {
        self.lookahead.len()
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Next decoded frame.
    ///
    /// Parse and decode failures are absorbed; the returned error is always terminal and
    /// every later call returns `StreamError::Ended`.
    pub fn next_frame(&mut self) -> Result<Frame, StreamError> {
        loop {
            let payload = self.next_payload()?;
            match decode_payload(&payload) {
                Ok((pixels, width, height)) => {
                    self.sequence += 1;
                    self.stats.frames += 1;
                    return Ok(Frame::new(pixels, width, height, self.sequence));
                }
                Err(err) => {
                    self.stats.decode_errors += 1;
                    log::warn!("MjpegDemuxer: skipping frame: {}", err);
                }
            }
        }
    }

    /// Next raw payload, exactly as long as its declared `Content-Length`.
    pub fn next_payload(&mut self) -> Result<Vec<u8>, StreamError> {
        if self.finished {
            return Err(StreamError::Ended);
        }
        let result = self.read_part();
        if result.is_err() {
            self.finished = true;
        }
        result
    }

    fn read_part(&mut self) -> Result<Vec<u8>, StreamError> {
        loop {
            let header = self.read_header()?;
            match parse_content_length(&header) {
                Ok(len) => return self.read_payload(len),
                Err(err) => {
                    // Resume scanning just past the boundary of the bad header.
                    self.stats.parse_errors += 1;
                    log::warn!("MjpegDemuxer: dropping frame attempt: {}", err);
                }
            }
        }
    }

    /// Header bytes up to (not including) the blank line; the boundary is consumed.
    fn read_header(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut scan_from = 0;
        loop {
            if let Some(pos) = find_boundary(&self.lookahead[scan_from..]) {
                let end = scan_from + pos;
                let header = self.lookahead[..end].to_vec();
                self.lookahead.drain(..end + BOUNDARY.len());
                return Ok(header);
            }

            if self.lookahead.len() >= HEADER_CAP {
                // Keep the tail so a boundary split across the discard point still matches.
                let keep = BOUNDARY.len() - 1;
                let discard = self.lookahead.len() - keep;
                self.lookahead.drain(..discard);
                self.stats.resyncs += 1;
                self.stats.parse_errors += 1;
                log::debug!(
                    "MjpegDemuxer: resync after {} bytes: {}",
                    discard,
                    ParseError::BoundaryNotFound { cap: HEADER_CAP }
                );
            }

            scan_from = self.lookahead.len().saturating_sub(BOUNDARY.len() - 1);
            self.fill()?;
        }
    }

    /// Read more bytes into the lookahead without exceeding the cap.
    fn fill(&mut self) -> Result<(), StreamError> {
        let start = self.lookahead.len();
        self.lookahead.resize(HEADER_CAP, 0);
        let read = loop {
            match self.reader.read(&mut self.lookahead[start..]) {
                Ok(read) => break read,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.lookahead.truncate(start);
                    return Err(StreamError::from_read(err));
                }
            }
        };
        self.lookahead.truncate(start + read);
        if read == 0 {
            return Err(StreamError::Ended);
        }
        self.stats.bytes_read += read as u64;
        Ok(())
    }

    fn read_payload(&mut self, len: usize) -> Result<Vec<u8>, StreamError> {
        let mut payload = Vec::with_capacity(len);
        let buffered = len.min(self.lookahead.len());
        payload.extend(self.lookahead.drain(..buffered));
        if payload.len() < len {
            let start = payload.len();
            payload.resize(len, 0);
            self.reader
                .read_exact(&mut payload[start..])
                .map_err(StreamError::from_read)?;
            self.stats.bytes_read += (len - start) as u64;
        }
        Ok(payload)
    }
}

impl<R: Read> Iterator for MjpegDemuxer<R> {
    type Item = Result<Frame, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        Some(self.next_frame())
    }
}

fn find_boundary(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(BOUNDARY.len())
        .position(|window| window == BOUNDARY)
}

/// Extract `Content-Length` from a part header. The field name is case-insensitive.
pub fn parse_content_length(header: &[u8]) -> Result<usize, ParseError> {
    let text = String::from_utf8_lossy(header);
    for line in text.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("content-length") {
            continue;
        }
        let value = value.trim();
        let len: usize = value
            .parse()
            .map_err(|_| ParseError::InvalidContentLength(value.to_string()))?;
        if len > MAX_PAYLOAD_BYTES {
            return Err(ParseError::PayloadTooLarge {
                len,
                max: MAX_PAYLOAD_BYTES,
            });
        }
        return Ok(len);
    }
    Err(ParseError::MissingContentLength)
}

/// Decode an encoded image payload to packed RGB8.
pub fn decode_payload(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32), ParseError> {
    let image =
        image::load_from_memory(bytes).map_err(|err| ParseError::Undecodable(err.to_string()))?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Ok((rgb.into_raw(), width, height))
}

/// Encode packed RGB8 pixels as JPEG.
pub fn encode_jpeg(pixels: Vec<u8>, width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
    let image = RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow::anyhow!("pixel buffer does not match {}x{}", width, height))?;
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

/// Append one multipart part carrying `payload` to `out`.
pub fn write_part(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(
        format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            PART_BOUNDARY,
            payload.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n");
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
