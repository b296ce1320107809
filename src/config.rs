use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::device::{
    CaptureParams, DeviceSource, FrameFormat, SyntheticDeviceConfig, SyntheticPlatform,
};
use crate::frame::{valid_dimensions, MAX_FRAME_DIMENSION};
use crate::ingest::stream::{DEFAULT_AUTH_HEADER, DEFAULT_STREAM_URL};
use crate::ingest::{FrameSource, StreamAuth, StreamConfig, StreamSource};
use crate::scheduler::DisplayOrientation;

const DEFAULT_DEVICE_PATH: &str = "/dev/video0";
const DEFAULT_CAPTURE_WIDTH: u32 = 640;
const DEFAULT_CAPTURE_HEIGHT: u32 = 480;
const DEFAULT_STREAM_INTERVAL_MS: u64 = 300;
const DEFAULT_DEVICE_INTERVAL_MS: u64 = 150;
const DEFAULT_INPUT_SIZE: u32 = 384;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Deserialize, Default)]
struct CamwatchConfigFile {
    source: Option<SourceConfigFile>,
    capture: Option<CaptureConfigFile>,
    detection: Option<DetectionConfigFile>,
    orientation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    kind: Option<String>,
    url: Option<String>,
    auth_header: Option<String>,
    api_key: Option<String>,
    device: Option<String>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    format: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    interval_ms: Option<u64>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    backend: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Stream,
    Device,
}

#[derive(Debug, Clone)]
pub struct CamwatchConfig {
    pub source: SourceKind,
    pub stream: StreamSettings,
    pub device_path: String,
    pub capture: CaptureParams,
    pub detection: DetectionSettings,
    pub orientation: DisplayOrientation,
    interval_explicit: bool,
}

#[derive(Clone)]
pub struct StreamSettings {
    pub url: String,
    pub auth_header: String,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl std::fmt::Debug for StreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSettings")
            .field("url", &self.url)
            .field("auth_header", &self.auth_header)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub interval: Duration,
    pub input_width: u32,
    pub input_height: u32,
    /// Registry name of the detector backend; `None` selects the default.
    pub backend: Option<String>,
}

impl CamwatchConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAMWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (if any), then apply environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) if !path.as_os_str().is_empty() => Some(read_config_file(path)?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CamwatchConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let source = match source_file.kind.as_deref() {
            Some(kind) => parse_source_kind(kind)?,
            None => SourceKind::Stream,
        };
        let stream = StreamSettings {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            auth_header: source_file
                .auth_header
                .unwrap_or_else(|| DEFAULT_AUTH_HEADER.to_string()),
            api_key: source_file.api_key.filter(|key| !key.is_empty()),
            connect_timeout: Duration::from_millis(
                source_file
                    .connect_timeout_ms
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            read_timeout: Duration::from_millis(
                source_file
                    .read_timeout_ms
                    .unwrap_or(DEFAULT_READ_TIMEOUT_MS),
            ),
        };
        let device_path = source_file
            .device
            .unwrap_or_else(|| DEFAULT_DEVICE_PATH.to_string());

        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureParams {
            width: capture_file.width.unwrap_or(DEFAULT_CAPTURE_WIDTH),
            height: capture_file.height.unwrap_or(DEFAULT_CAPTURE_HEIGHT),
            format: match capture_file.format.as_deref() {
                Some(format) => parse_frame_format(format)?,
                None => FrameFormat::Mjpeg,
            },
        };

        let detection_file = file.detection.unwrap_or_default();
        let interval_explicit = detection_file.interval_ms.is_some();
        let detection = DetectionSettings {
            interval: Duration::from_millis(
                detection_file
                    .interval_ms
                    .unwrap_or_else(|| default_interval_ms(source)),
            ),
            input_width: detection_file.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
            input_height: detection_file.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
            backend: detection_file.backend,
        };

        let orientation = match file.orientation.as_deref() {
            Some(orientation) => parse_orientation(orientation)?,
            None => DisplayOrientation::Portrait,
        };

        Ok(Self {
            source,
            stream,
            device_path,
            capture,
            detection,
            orientation,
            interval_explicit,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(kind) = std::env::var("CAMWATCH_SOURCE") {
            if !kind.trim().is_empty() {
                self.source = parse_source_kind(&kind)?;
                if !self.interval_explicit {
                    self.detection.interval =
                        Duration::from_millis(default_interval_ms(self.source));
                }
            }
        }
        if let Ok(url) = std::env::var("CAMWATCH_STREAM_URL") {
            if !url.trim().is_empty() {
                self.stream.url = url;
            }
        }
        if let Ok(key) = std::env::var("CAMWATCH_API_KEY") {
            if !key.is_empty() {
                self.stream.api_key = Some(key);
            }
        }
        if let Ok(device) = std::env::var("CAMWATCH_DEVICE") {
            if !device.trim().is_empty() {
                self.device_path = device;
            }
        }
        if let Ok(interval) = std::env::var("CAMWATCH_DETECTION_INTERVAL_MS") {
            if !interval.trim().is_empty() {
                let millis: u64 = interval.trim().parse().map_err(|_| {
                    anyhow!(
                        "CAMWATCH_DETECTION_INTERVAL_MS must be an integer number of milliseconds"
                    )
                })?;
                self.detection.interval = Duration::from_millis(millis);
                self.interval_explicit = true;
            }
        }
        if let Ok(orientation) = std::env::var("CAMWATCH_ORIENTATION") {
            if !orientation.trim().is_empty() {
                self.orientation = parse_orientation(&orientation)?;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.detection.interval.is_zero() {
            return Err(anyhow!("detection interval must be greater than zero"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.detection.input_width == 0 || self.detection.input_height == 0 {
            return Err(anyhow!("detector input size must be greater than zero"));
        }
        if !valid_dimensions(self.capture.width, self.capture.height) {
            return Err(anyhow!(
                "capture size {}x{} exceeds {} pixels per side",
                self.capture.width,
                self.capture.height,
                MAX_FRAME_DIMENSION
            ));
        }
        if !valid_dimensions(self.detection.input_width, self.detection.input_height) {
            return Err(anyhow!(
                "detector input size {}x{} exceeds {} pixels per side",
                self.detection.input_width,
                self.detection.input_height,
                MAX_FRAME_DIMENSION
            ));
        }
        let header = self.stream.auth_header.trim();
        if header.is_empty()
            || !header
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(anyhow!("invalid auth header name '{}'", self.stream.auth_header));
        }
        self.stream.auth_header = header.to_string();

        match self.source {
            SourceKind::Stream => {
                let url = self.stream.url.trim();
                if !(url.starts_with("http://")
                    || url.starts_with("https://")
                    || url.starts_with("stub://"))
                {
                    return Err(anyhow!(
                        "stream url must use http://, https:// or stub:// (got '{}')",
                        url
                    ));
                }
                self.stream.url = url.to_string();
            }
            SourceKind::Device => {
                if self.device_path.trim().is_empty() {
                    return Err(anyhow!("device path must not be empty"));
                }
            }
        }
        Ok(())
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: self.stream.url.clone(),
            auth: self.stream.api_key.as_ref().map(|key| StreamAuth {
                header: self.stream.auth_header.clone(),
                value: key.clone(),
            }),
            connect_timeout: self.stream.connect_timeout,
            read_timeout: self.stream.read_timeout,
            width: self.capture.width,
            height: self.capture.height,
            ..StreamConfig::default()
        }
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.detection.input_width, self.detection.input_height)
    }

    /// Build the frame source this configuration describes.
    pub fn build_source(&self) -> Result<Box<dyn FrameSource>> {
        match self.source {
            SourceKind::Stream => Ok(Box::new(StreamSource::new(self.stream_config())?)),
            SourceKind::Device if self.device_path.starts_with("stub://") => {
                let platform = SyntheticPlatform::new(SyntheticDeviceConfig {
                    path: self.device_path.clone(),
                    ..SyntheticDeviceConfig::default()
                });
                Ok(Box::new(DeviceSource::new(Box::new(platform), self.capture)))
            }
            SourceKind::Device => {
                #[cfg(feature = "ingest-v4l2")]
                {
                    use crate::device::{V4l2Platform, V4l2PlatformConfig};

                    let platform = V4l2Platform::new(V4l2PlatformConfig {
                        device: self.device_path.clone(),
                        ..V4l2PlatformConfig::default()
                    });
                    Ok(Box::new(DeviceSource::new(Box::new(platform), self.capture)))
                }
                #[cfg(not(feature = "ingest-v4l2"))]
                {
                    Err(anyhow!(
                        "device {} requires the ingest-v4l2 feature",
                        self.device_path
                    ))
                }
            }
        }
    }
}

fn default_interval_ms(kind: SourceKind) -> u64 {
    match kind {
        SourceKind::Stream => DEFAULT_STREAM_INTERVAL_MS,
        SourceKind::Device => DEFAULT_DEVICE_INTERVAL_MS,
    }
}

fn parse_source_kind(value: &str) -> Result<SourceKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "stream" | "http" => Ok(SourceKind::Stream),
        "device" | "usb" => Ok(SourceKind::Device),
        other => Err(anyhow!("unknown source kind '{}' (expected stream or device)", other)),
    }
}

fn parse_frame_format(value: &str) -> Result<FrameFormat> {
    match value.trim().to_ascii_lowercase().as_str() {
        "mjpeg" | "mjpg" => Ok(FrameFormat::Mjpeg),
        "rgb24" | "rgb3" => Ok(FrameFormat::Rgb24),
        other => Err(anyhow!("unknown capture format '{}' (expected mjpeg or rgb24)", other)),
    }
}

fn parse_orientation(value: &str) -> Result<DisplayOrientation> {
    match value.trim().to_ascii_lowercase().as_str() {
        "portrait" => Ok(DisplayOrientation::Portrait),
        "landscape" => Ok(DisplayOrientation::Landscape),
        other => Err(anyhow!(
            "unknown orientation '{}' (expected portrait or landscape)",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<CamwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
