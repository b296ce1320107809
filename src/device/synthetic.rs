//! Synthetic device platform for `stub://` device paths.
//!
//! Attaches its single device as soon as it is watched, answers permission requests
//! from configuration, and publishes generated RGB frames at a fixed rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::{CaptureParams, DeviceEvent, DeviceHandle, DeviceInfo, DevicePlatform};
use crate::frame::{valid_dimensions, FramePublisher};
use crate::ingest::synthetic_pixels;

#[derive(Clone, Debug)]
pub struct SyntheticDeviceConfig {
    /// Device path, e.g. "stub://usb0".
    pub path: String,
    pub grant_permission: bool,
    pub frame_interval: Duration,
    /// Report a disconnect after this many frames.
    pub disconnect_after: Option<u64>,
}

impl Default for SyntheticDeviceConfig {
    fn default() -> Self {
        Self {
            path: "stub://usb0".to_string(),
            grant_permission: true,
            frame_interval: Duration::from_millis(50),
            disconnect_after: None,
        }
    }
}

pub struct SyntheticPlatform {
    config: SyntheticDeviceConfig,
    events: Option<Sender<DeviceEvent>>,
}

impl SyntheticPlatform {
    pub fn new(config: SyntheticDeviceConfig) -> Self {
        Self {
            config,
            events: None,
        }
    }

    fn device(&self) -> DeviceInfo {
        DeviceInfo::new(&self.config.path, "Synthetic UVC camera")
    }

    fn send(&self, event: DeviceEvent) -> Result<()> {
        self.events
            .as_ref()
            .context("synthetic platform is not watched")?
            .send(event)
            .map_err(|_| anyhow!("device event channel closed"))
    }
}

impl DevicePlatform for SyntheticPlatform {
    fn describe(&self) -> String {
        self.config.path.clone()
    }

    fn watch(&mut self, events: Sender<DeviceEvent>) -> Result<()> {
        self.events = Some(events);
        log::info!("SyntheticPlatform: watching {}", self.config.path);
        self.send(DeviceEvent::Attached(self.device()))
    }

    fn request_permission(&mut self, device: &DeviceInfo) -> Result<()> {
        let answer = if self.config.grant_permission {
            DeviceEvent::PermissionGranted(device.id.clone())
        } else {
            DeviceEvent::PermissionDenied(device.id.clone())
        };
        self.send(answer)
    }

    fn open(&mut self, device: &DeviceInfo) -> Result<Box<dyn DeviceHandle>> {
        let events = self
            .events
            .clone()
            .context("synthetic platform is not watched")?;
        Ok(Box::new(SyntheticHandle {
            device: device.clone(),
            config: self.config.clone(),
            events,
            params: None,
            capture: None,
        }))
    }

    fn release(&mut self, device: &DeviceInfo) -> Result<()> {
        log::info!("SyntheticPlatform: released {}", device.id);
        Ok(())
    }

    fn unwatch(&mut self) {
        self.events = None;
    }
}

struct SyntheticHandle {
    device: DeviceInfo,
    config: SyntheticDeviceConfig,
    events: Sender<DeviceEvent>,
    params: Option<CaptureParams>,
    capture: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl DeviceHandle for SyntheticHandle {
    fn configure(&mut self, params: &CaptureParams) -> Result<()> {
        if !valid_dimensions(params.width, params.height) {
            anyhow::bail!("invalid capture size {}x{}", params.width, params.height);
        }
        self.params = Some(*params);
        Ok(())
    }

    fn start(&mut self, mut publisher: FramePublisher) -> Result<()> {
        let params = self.params.context("device not configured")?;
        if self.capture.is_some() {
            anyhow::bail!("capture already running");
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let interval = self.config.frame_interval;
        let disconnect_after = self.config.disconnect_after;
        let events = self.events.clone();
        let id = self.device.id.clone();

        let handle = std::thread::Builder::new()
            .name("synthetic-capture".to_string())
            .spawn(move || {
                let mut frame_count = 0u64;
                while !thread_shutdown.load(Ordering::SeqCst) {
                    frame_count += 1;
                    let pixels = synthetic_pixels(params.width, params.height, frame_count);
                    publisher.publish_pixels(pixels, params.width, params.height);

                    if disconnect_after.is_some_and(|limit| frame_count >= limit) {
                        let _ = events.send(DeviceEvent::Disconnected(id.clone()));
                        break;
                    }
                    std::thread::sleep(interval);
                }
            })
            .context("spawn synthetic capture thread")?;

        self.capture = Some((shutdown, handle));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some((shutdown, handle)) = self.capture.take() {
            shutdown.store(true, Ordering::SeqCst);
            handle
                .join()
                .map_err(|_| anyhow!("synthetic capture thread panicked"))?;
        }
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        self.params = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBuffer, MAX_FRAME_DIMENSION};
    use std::sync::mpsc;

    #[test]
    fn watch_attaches_and_permission_follows_config() -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let mut platform = SyntheticPlatform::new(SyntheticDeviceConfig {
            grant_permission: false,
            ..SyntheticDeviceConfig::default()
        });
        platform.watch(tx)?;
        let DeviceEvent::Attached(device) = rx.recv()? else {
            panic!("expected attach");
        };
        platform.request_permission(&device)?;
        assert_eq!(rx.recv()?, DeviceEvent::PermissionDenied(device.id));
        Ok(())
    }

    #[test]
    fn handle_publishes_until_stopped() -> Result<()> {
        let (tx, _rx) = mpsc::channel();
        let mut platform = SyntheticPlatform::new(SyntheticDeviceConfig {
            frame_interval: Duration::from_millis(5),
            ..SyntheticDeviceConfig::default()
        });
        platform.watch(tx)?;
        let device = platform.device();
        let mut handle = platform.open(&device)?;
        handle.configure(&CaptureParams {
            width: 16,
            height: 8,
            ..CaptureParams::default()
        })?;

        let buffer = Arc::new(FrameBuffer::new());
        handle.start(FramePublisher::new(buffer.clone()))?;
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while buffer.published_count() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        handle.stop()?;
        handle.destroy()?;

        let published = buffer.published_count();
        assert!(published >= 2);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(buffer.published_count(), published);
        let frame = buffer.snapshot().expect("frame");
        assert_eq!((frame.width, frame.height), (16, 8));
        assert_eq!(frame.byte_len(), 16 * 8 * 3);
        Ok(())
    }

    #[test]
    fn configure_rejects_oversized_capture() -> Result<()> {
        let (tx, _rx) = mpsc::channel();
        let mut platform = SyntheticPlatform::new(SyntheticDeviceConfig::default());
        platform.watch(tx)?;
        let device = platform.device();
        let mut handle = platform.open(&device)?;
        let oversized = CaptureParams {
            width: MAX_FRAME_DIMENSION + 1,
            height: 480,
            ..CaptureParams::default()
        };
        assert!(handle.configure(&oversized).is_err());
        let buffer = Arc::new(FrameBuffer::new());
        assert!(handle.start(FramePublisher::new(buffer)).is_err());
        Ok(())
    }

    #[test]
    fn start_requires_configure() -> Result<()> {
        let (tx, _rx) = mpsc::channel();
        let mut platform = SyntheticPlatform::new(SyntheticDeviceConfig::default());
        platform.watch(tx)?;
        let device = platform.device();
        let mut handle = platform.open(&device)?;
        let buffer = Arc::new(FrameBuffer::new());
        assert!(handle.start(FramePublisher::new(buffer)).is_err());
        Ok(())
    }
}
