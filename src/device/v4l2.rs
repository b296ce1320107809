//! V4L2 device platform for USB (UVC) cameras.
//!
//! - Attach/detach: a monitor thread polls the device node.
//! - Permission: read/write access to the device node.
//! - Capture: memory-mapped streaming on a dedicated thread. MJPEG buffers are decoded
//!   with the demuxer's payload decoder; RGB3 buffers are published as-is.
//!
//! The V4L2 platform MUST NOT:
//! - Store captured frames to disk
//! - Keep the device open after `destroy`

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::{CaptureParams, DeviceEvent, DeviceHandle, DeviceInfo, DevicePlatform, FrameFormat};
use crate::frame::{rgb_len, valid_dimensions, FramePublisher};
use crate::ingest::mjpeg;

#[derive(Clone, Debug)]
pub struct V4l2PlatformConfig {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// How often the monitor checks the device node.
    pub poll_interval: Duration,
    /// Capture wake-up interval; bounds how long `stop` waits.
    pub capture_timeout: Duration,
}

impl Default for V4l2PlatformConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            poll_interval: Duration::from_millis(500),
            capture_timeout: Duration::from_millis(500),
        }
    }
}

pub struct V4l2Platform {
    config: V4l2PlatformConfig,
    events: Option<Sender<DeviceEvent>>,
    monitor: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl V4l2Platform {
    pub fn new(config: V4l2PlatformConfig) -> Self {
        Self {
            config,
            events: None,
            monitor: None,
        }
    }

    fn device_info(path: &str) -> DeviceInfo {
        DeviceInfo::new(path, "V4L2 capture device")
    }

    fn send(&self, event: DeviceEvent) -> Result<()> {
        self.events
            .as_ref()
            .context("v4l2 platform is not watched")?
            .send(event)
            .map_err(|_| anyhow!("device event channel closed"))
    }
}

impl DevicePlatform for V4l2Platform {
    fn describe(&self) -> String {
        self.config.device.clone()
    }

    fn watch(&mut self, events: Sender<DeviceEvent>) -> Result<()> {
        self.events = Some(events.clone());

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let path = self.config.device.clone();
        let poll_interval = self.config.poll_interval;

        let handle = std::thread::Builder::new()
            .name("v4l2-monitor".to_string())
            .spawn(move || {
                let mut present = false;
                while !thread_shutdown.load(Ordering::SeqCst) {
                    let exists = Path::new(&path).exists();
                    if exists != present {
                        present = exists;
                        let event = if exists {
                            DeviceEvent::Attached(V4l2Platform::device_info(&path))
                        } else {
                            DeviceEvent::Disconnected(path.clone())
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    std::thread::sleep(poll_interval);
                }
            })
            .context("spawn v4l2 monitor thread")?;

        self.monitor = Some((shutdown, handle));
        log::info!("V4l2Platform: watching {}", self.config.device);
        Ok(())
    }

    fn request_permission(&mut self, device: &DeviceInfo) -> Result<()> {
        let access = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&device.id);
        let answer = match access {
            Ok(_) => DeviceEvent::PermissionGranted(device.id.clone()),
            Err(err) => {
                log::warn!("V4l2Platform: no access to {}: {}", device.id, err);
                DeviceEvent::PermissionDenied(device.id.clone())
            }
        };
        self.send(answer)
    }

    fn open(&mut self, device: &DeviceInfo) -> Result<Box<dyn DeviceHandle>> {
        let events = self.events.clone().context("v4l2 platform is not watched")?;
        let handle = v4l::Device::with_path(&device.id)
            .with_context(|| format!("open v4l2 device {}", device.id))?;
        Ok(Box::new(V4l2Handle {
            id: device.id.clone(),
            device: Some(handle),
            events,
            capture_timeout: self.config.capture_timeout,
            active: None,
            capture: None,
        }))
    }

    fn release(&mut self, device: &DeviceInfo) -> Result<()> {
        log::info!("V4l2Platform: released {}", device.id);
        Ok(())
    }

    fn unwatch(&mut self) {
        if let Some((shutdown, handle)) = self.monitor.take() {
            shutdown.store(true, Ordering::SeqCst);
            if handle.join().is_err() {
                log::warn!("V4l2Platform: monitor thread panicked");
            }
        }
        self.events = None;
    }
}

impl Drop for V4l2Platform {
    fn drop(&mut self) {
        self.unwatch();
    }
}

/// Negotiated capture format.
#[derive(Clone, Copy, Debug)]
struct ActiveFormat {
    width: u32,
    height: u32,
    format: FrameFormat,
}

struct V4l2Handle {
    id: String,
    device: Option<v4l::Device>,
    events: Sender<DeviceEvent>,
    capture_timeout: Duration,
    active: Option<ActiveFormat>,
    capture: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

fn fourcc(format: FrameFormat) -> v4l::FourCC {
    match format {
        FrameFormat::Mjpeg => v4l::FourCC::new(b"MJPG"),
        FrameFormat::Rgb24 => v4l::FourCC::new(b"RGB3"),
    }
}

impl DeviceHandle for V4l2Handle {
    fn configure(&mut self, params: &CaptureParams) -> Result<()> {
        use v4l::video::Capture;

        if !valid_dimensions(params.width, params.height) {
            anyhow::bail!("invalid capture size {}x{}", params.width, params.height);
        }
        let device = self.device.as_mut().context("v4l2 device already started")?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = params.width;
        format.height = params.height;
        format.fourcc = fourcc(params.format);

        let format = device.set_format(&format).context("set v4l2 format")?;
        if format.fourcc != fourcc(params.format) {
            anyhow::bail!(
                "device does not support {:?} (offered {})",
                params.format,
                format.fourcc
            );
        }
        if format.width != params.width || format.height != params.height {
            log::warn!(
                "V4l2Platform: {} negotiated {}x{} instead of {}x{}",
                self.id,
                format.width,
                format.height,
                params.width,
                params.height
            );
        }

        self.active = Some(ActiveFormat {
            width: format.width,
            height: format.height,
            format: params.format,
        });
        Ok(())
    }

    fn start(&mut self, mut publisher: FramePublisher) -> Result<()> {
        let active = self.active.context("v4l2 device not configured")?;
        let device = self.device.take().context("v4l2 capture already started")?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let events = self.events.clone();
        let id = self.id.clone();
        let timeout = self.capture_timeout;
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();

        let handle = std::thread::Builder::new()
            .name("v4l2-capture".to_string())
            .spawn(move || {
                use v4l::buffer::Type;
                use v4l::io::traits::CaptureStream;

                let mut stream =
                    match v4l::prelude::MmapStream::with_buffers(&device, Type::VideoCapture, 4) {
                        Ok(stream) => stream,
                        Err(err) => {
                            let _ = ready_tx.send(Err(err.to_string()));
                            return;
                        }
                    };
                stream.set_timeout(timeout);
                let _ = ready_tx.send(Ok(()));

                while !thread_shutdown.load(Ordering::SeqCst) {
                    let (buf, meta) = match CaptureStream::next(&mut stream) {
                        Ok(frame) => frame,
                        Err(err)
                            if matches!(
                                err.kind(),
                                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                            ) =>
                        {
                            continue
                        }
                        Err(err) => {
                            let _ = events.send(DeviceEvent::CaptureFailed(id, err.to_string()));
                            return;
                        }
                    };
                    let used = (meta.bytesused as usize).min(buf.len());
                    let bytes = &buf[..used];

                    match active.format {
                        FrameFormat::Mjpeg => match mjpeg::decode_payload(bytes) {
                            Ok((pixels, width, height)) => {
                                publisher.publish_pixels(pixels, width, height);
                            }
                            Err(err) => log::warn!("V4l2Platform: skipping frame: {}", err),
                        },
                        FrameFormat::Rgb24 => {
                            let Some(expected) = rgb_len(active.width, active.height) else {
                                continue;
                            };
                            if bytes.len() < expected {
                                log::warn!(
                                    "V4l2Platform: short RGB buffer ({} < {} bytes)",
                                    bytes.len(),
                                    expected
                                );
                                continue;
                            }
                            publisher.publish_pixels(
                                bytes[..expected].to_vec(),
                                active.width,
                                active.height,
                            );
                        }
                    }
                }
            })
            .context("spawn v4l2 capture thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.capture = Some((shutdown, handle));
                log::info!(
                    "V4l2Platform: capturing from {} ({}x{} {:?})",
                    self.id,
                    active.width,
                    active.height,
                    active.format
                );
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(anyhow!("create v4l2 buffer stream: {}", reason))
            }
            Err(_) => {
                let _ = handle.join();
                Err(anyhow!("v4l2 capture thread exited during start"))
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        if let Some((shutdown, handle)) = self.capture.take() {
            shutdown.store(true, Ordering::SeqCst);
            handle
                .join()
                .map_err(|_| anyhow!("v4l2 capture thread panicked"))?;
        }
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        self.device = None;
        self.active = None;
        Ok(())
    }
}
