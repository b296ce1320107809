//! USB capture device lifecycle.
//!
//! `DeviceConnectionManager` is the only owner of a device handle. It consumes
//! `DeviceEvent`s from a single channel and walks:
//!
//! ```text
//! Detached -> Attached -> PermissionRequested -> Connected -> Streaming
//!     ^                                                          |
//!     +------------- disconnect / stop / error ------------------+
//! ```
//!
//! Leaving a holding state runs the release sequence (handle stop, handle destroy,
//! platform release) exactly once, in that order. Release steps are best-effort: a
//! failing step is logged and the next one still runs.

pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::Result;

use crate::error::DeviceError;
use crate::frame::FramePublisher;
use crate::ingest::{EndReason, FrameSource, SourceContext, SourceEvent};

pub use synthetic::{SyntheticDeviceConfig, SyntheticPlatform};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Platform, V4l2PlatformConfig};

const HISTORY_LEN: usize = 32;

/// Pixel format requested from the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Mjpeg,
    Rgb24,
}

/// Capture parameters applied when a device is connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureParams {
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            format: FrameFormat::Mjpeg,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable identifier (device node path for V4L2).
    pub id: String,
    pub name: String,
}

impl DeviceInfo {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

/// Platform notifications and control requests, consumed only by the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    Attached(DeviceInfo),
    PermissionGranted(String),
    PermissionDenied(String),
    Disconnected(String),
    CaptureFailed(String, String),
    Stop,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Detached,
    Attached(DeviceInfo),
    PermissionRequested(DeviceInfo),
    Connected(DeviceInfo),
    Streaming(DeviceInfo),
}

impl DeviceState {
    pub fn device(&self) -> Option<&DeviceInfo> {
        match self {
            DeviceState::Detached => None,
            DeviceState::Attached(device)
            | DeviceState::PermissionRequested(device)
            | DeviceState::Connected(device)
            | DeviceState::Streaming(device) => Some(device),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceState::Detached => "Detached",
            DeviceState::Attached(_) => "Attached",
            DeviceState::PermissionRequested(_) => "PermissionRequested",
            DeviceState::Connected(_) => "Connected",
            DeviceState::Streaming(_) => "Streaming",
        }
    }
}

/// Host-side device services: discovery, permission and registration.
///
/// Asynchronous answers (attach, permission, detach, capture failure) are delivered
/// through the sender handed to `watch`.
pub trait DevicePlatform: Send {
    fn describe(&self) -> String;

    /// Start reporting device attach/detach. Called once before any other method.
    fn watch(&mut self, events: Sender<DeviceEvent>) -> Result<()>;

    /// Ask for access; the answer arrives as `PermissionGranted` or `PermissionDenied`.
    fn request_permission(&mut self, device: &DeviceInfo) -> Result<()>;

    fn open(&mut self, device: &DeviceInfo) -> Result<Box<dyn DeviceHandle>>;

    /// Drop the permission/monitor registration held for `device`.
    fn release(&mut self, device: &DeviceInfo) -> Result<()>;

    /// Stop reporting attach/detach.
    fn unwatch(&mut self) {}
}

/// An open device. Owned exclusively by the manager.
pub trait DeviceHandle: Send {
    fn configure(&mut self, params: &CaptureParams) -> Result<()>;

    /// Begin capture; frames go to `publisher` from the platform's capture thread.
    fn start(&mut self, publisher: FramePublisher) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn destroy(&mut self) -> Result<()>;
}

/// What the event loop should do after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Exit,
}

// ----------------------------------------------------------------------------
// DeviceConnectionManager
// ----------------------------------------------------------------------------

pub struct DeviceConnectionManager {
    platform: Box<dyn DevicePlatform>,
    params: CaptureParams,
    state: DeviceState,
    handle: Option<Box<dyn DeviceHandle>>,
    events_tx: Sender<DeviceEvent>,
    events_rx: Receiver<DeviceEvent>,
    history: VecDeque<&'static str>,
}

impl DeviceConnectionManager {
    pub fn new(platform: Box<dyn DevicePlatform>, params: CaptureParams) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let mut history = VecDeque::with_capacity(HISTORY_LEN);
        history.push_back(DeviceState::Detached.name());
        Self {
            platform,
            params,
            state: DeviceState::Detached,
            handle: None,
            events_tx,
            events_rx,
            history,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Sender for the manager's event channel.
    pub fn sender(&self) -> Sender<DeviceEvent> {
        self.events_tx.clone()
    }

    /// Names of recently entered states, oldest first.
    pub fn history(&self) -> Vec<&'static str> {
        self.history.iter().copied().collect()
    }

    /// Watch the platform and process events until `Stop`.
    pub fn run(&mut self, ctx: &SourceContext) {
        let stop_tx = self.sender();
        ctx.cancel.on_cancel(move || {
            let _ = stop_tx.send(DeviceEvent::Stop);
        });

        if let Err(err) = self.platform.watch(self.sender()) {
            let source = self.platform.describe();
            let err = DeviceError::Watch {
                device: source.clone(),
                reason: format!("{:#}", err),
            };
            log::warn!("DeviceConnectionManager: {}", err);
            self.platform.unwatch();
            ctx.emit(SourceEvent::Ended {
                source,
                reason: EndReason::Device(err),
            });
            return;
        }

        loop {
            let event = match self.events_rx.recv() {
                Ok(event) => event,
                // The manager holds a sender, so the channel cannot close while it lives.
                Err(_) => break,
            };
            if self.handle_event(event, ctx) == Step::Exit {
                break;
            }
        }
        self.platform.unwatch();
    }

    /// Apply one event to the state machine.
    pub fn handle_event(&mut self, event: DeviceEvent, ctx: &SourceContext) -> Step {
        log::debug!(
            "DeviceConnectionManager: {:?} in state {}",
            event,
            self.state.name()
        );
        match event {
            DeviceEvent::Attached(device) => self.on_attached(device, ctx),
            DeviceEvent::PermissionGranted(id) => self.on_permission_granted(&id, ctx),
            DeviceEvent::PermissionDenied(id) => self.on_permission_denied(&id),
            DeviceEvent::Disconnected(id) => self.on_disconnected(&id, ctx),
            DeviceEvent::CaptureFailed(id, reason) => self.on_capture_failed(&id, reason, ctx),
            DeviceEvent::Stop => {
                self.end_session(EndReason::Stopped, ctx);
                return Step::Exit;
            }
        }
        Step::Continue
    }

    fn on_attached(&mut self, device: DeviceInfo, ctx: &SourceContext) {
        if let Some(held) = self.state.device() {
            if held.id == device.id {
                log::warn!(
                    "DeviceConnectionManager: duplicate attach for {} ignored",
                    device.id
                );
            } else {
                log::warn!(
                    "DeviceConnectionManager: rejecting {}; {} is held",
                    device.id,
                    held.id
                );
                ctx.emit(SourceEvent::Rejected {
                    source: device.id,
                    reason: format!("device {} is already held", held.id),
                });
            }
            return;
        }

        log::info!(
            "DeviceConnectionManager: {} attached ({})",
            device.id,
            device.name
        );
        self.transition(DeviceState::Attached(device.clone()));
        match self.platform.request_permission(&device) {
            Ok(()) => self.transition(DeviceState::PermissionRequested(device)),
            Err(err) => self.fail(
                DeviceError::Permission {
                    device: device.id,
                    reason: format!("{:#}", err),
                },
                ctx,
            ),
        }
    }

    fn on_permission_granted(&mut self, id: &str, ctx: &SourceContext) {
        let device = match &self.state {
            DeviceState::PermissionRequested(device) if device.id == id => device.clone(),
            _ => {
                self.ignore("permission grant", id);
                return;
            }
        };

        let handle = match self.platform.open(&device) {
            Ok(handle) => self.handle.insert(handle),
            Err(err) => {
                return self.fail(
                    DeviceError::Open {
                        device: device.id,
                        reason: format!("{:#}", err),
                    },
                    ctx,
                )
            }
        };
        if let Err(err) = handle.configure(&self.params) {
            return self.fail(
                DeviceError::Configure {
                    device: device.id,
                    reason: format!("{:#}", err),
                },
                ctx,
            );
        }
        self.transition(DeviceState::Connected(device.clone()));

        let started = match self.handle.as_mut() {
            Some(handle) => handle.start(ctx.publisher()),
            None => Err(anyhow::anyhow!("device handle missing")),
        };
        if let Err(err) = started {
            return self.fail(
                DeviceError::Start {
                    device: device.id,
                    reason: format!("{:#}", err),
                },
                ctx,
            );
        }
        log::info!(
            "DeviceConnectionManager: streaming from {} ({}x{} {:?})",
            device.id,
            self.params.width,
            self.params.height,
            self.params.format
        );
        self.transition(DeviceState::Streaming(device.clone()));
        ctx.emit(SourceEvent::Streaming { source: device.id });
    }

    fn on_permission_denied(&mut self, id: &str) {
        match &self.state {
            DeviceState::Attached(device) | DeviceState::PermissionRequested(device)
                if device.id == id =>
            {
                log::warn!("DeviceConnectionManager: permission denied for {}", id);
                // Nothing has been acquired yet.
                self.transition(DeviceState::Detached);
            }
            _ => self.ignore("permission denial", id),
        }
    }

    fn on_disconnected(&mut self, id: &str, ctx: &SourceContext) {
        if !self.holds(id) {
            self.ignore("disconnect", id);
            return;
        }
        log::info!("DeviceConnectionManager: {} disconnected", id);
        self.end_session(EndReason::Disconnected, ctx);
    }

    fn on_capture_failed(&mut self, id: &str, reason: String, ctx: &SourceContext) {
        if !matches!(&self.state, DeviceState::Streaming(device) if device.id == id) {
            self.ignore("capture failure", id);
            return;
        }
        self.fail(
            DeviceError::Capture {
                device: id.to_string(),
                reason,
            },
            ctx,
        );
    }

    fn fail(&mut self, err: DeviceError, ctx: &SourceContext) {
        log::warn!("DeviceConnectionManager: {}", err);
        let source = self.release().map(|device| device.id).unwrap_or_default();
        ctx.emit(SourceEvent::Ended {
            source,
            reason: EndReason::Device(err),
        });
    }

    /// Release whatever is held; report the end of a session if one was open.
    fn end_session(&mut self, reason: EndReason, ctx: &SourceContext) {
        let had_session = matches!(
            self.state,
            DeviceState::Connected(_) | DeviceState::Streaming(_)
        );
        if let Some(device) = self.release() {
            if had_session {
                ctx.emit(SourceEvent::Ended {
                    source: device.id,
                    reason,
                });
            }
        }
    }

    /// Stop capture, release the handle, release the registration, reset to `Detached`.
    fn release(&mut self) -> Option<DeviceInfo> {
        let device = self.state.device().cloned()?;

        if let Some(mut handle) = self.handle.take() {
            if let Err(err) = handle.stop() {
                log::warn!(
                    "DeviceConnectionManager: stopping {} failed: {:#}",
                    device.id,
                    err
                );
            }
            if let Err(err) = handle.destroy() {
                log::warn!(
                    "DeviceConnectionManager: destroying {} failed: {:#}",
                    device.id,
                    err
                );
            }
        }
        if let Err(err) = self.platform.release(&device) {
            log::warn!(
                "DeviceConnectionManager: releasing {} failed: {:#}",
                device.id,
                err
            );
        }

        self.transition(DeviceState::Detached);
        log::info!("DeviceConnectionManager: released {}", device.id);
        Some(device)
    }

    fn holds(&self, id: &str) -> bool {
        self.state.device().is_some_and(|device| device.id == id)
    }

    fn ignore(&self, what: &str, id: &str) {
        log::warn!(
            "DeviceConnectionManager: ignoring {} for {} in state {}",
            what,
            id,
            self.state.name()
        );
    }

    fn transition(&mut self, next: DeviceState) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(next.name());
        self.state = next;
    }
}

impl Drop for DeviceConnectionManager {
    fn drop(&mut self) {
        if self.state != DeviceState::Detached {
            self.release();
        }
    }
}

// ----------------------------------------------------------------------------
// DeviceSource
// ----------------------------------------------------------------------------

/// Device-based frame source. One stream session per attach/connect cycle.
pub struct DeviceSource {
    name: String,
    platform: Option<Box<dyn DevicePlatform>>,
    params: CaptureParams,
}

impl DeviceSource {
    pub fn new(platform: Box<dyn DevicePlatform>, params: CaptureParams) -> Self {
        Self {
            name: platform.describe(),
            platform: Some(platform),
            params,
        }
    }
}

impl FrameSource for DeviceSource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn run(&mut self, ctx: &SourceContext) {
        let Some(platform) = self.platform.take() else {
            log::warn!("DeviceSource: {} already ran", self.name);
            return;
        };
        let mut manager = DeviceConnectionManager::new(platform, self.params);
        manager.run(ctx);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::frame::FrameBuffer;
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        log: Vec<String>,
    }

    #[derive(Clone, Copy, Default)]
    struct Failures {
        watch: bool,
        permission: bool,
        open: bool,
        configure: bool,
        start: bool,
        stop: bool,
        release: bool,
    }

    struct MockPlatform {
        calls: Arc<Mutex<Calls>>,
        failures: Failures,
    }

    struct MockHandle {
        calls: Arc<Mutex<Calls>>,
        failures: Failures,
    }

    fn record(calls: &Arc<Mutex<Calls>>, entry: &str) {
        calls.lock().unwrap().log.push(entry.to_string());
    }

    impl DevicePlatform for MockPlatform {
        fn describe(&self) -> String {
            "mock".into()
        }

        fn watch(&mut self, _events: Sender<DeviceEvent>) -> Result<()> {
            record(&self.calls, "watch");
            if self.failures.watch {
                return Err(anyhow!("no hotplug service"));
            }
            Ok(())
        }

        fn unwatch(&mut self) {
            record(&self.calls, "unwatch");
        }

        fn request_permission(&mut self, _device: &DeviceInfo) -> Result<()> {
            record(&self.calls, "request_permission");
            if self.failures.permission {
                return Err(anyhow!("no permission service"));
            }
            Ok(())
        }

        fn open(&mut self, _device: &DeviceInfo) -> Result<Box<dyn DeviceHandle>> {
            record(&self.calls, "open");
            if self.failures.open {
                return Err(anyhow!("busy"));
            }
            Ok(Box::new(MockHandle {
                calls: self.calls.clone(),
                failures: self.failures,
            }))
        }

        fn release(&mut self, _device: &DeviceInfo) -> Result<()> {
            record(&self.calls, "release");
            if self.failures.release {
                return Err(anyhow!("release failed"));
            }
            Ok(())
        }
    }

    impl DeviceHandle for MockHandle {
        fn configure(&mut self, _params: &CaptureParams) -> Result<()> {
            record(&self.calls, "configure");
            if self.failures.configure {
                return Err(anyhow!("unsupported format"));
            }
            Ok(())
        }

        fn start(&mut self, _publisher: FramePublisher) -> Result<()> {
            record(&self.calls, "start");
            if self.failures.start {
                return Err(anyhow!("no bandwidth"));
            }
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            record(&self.calls, "stop");
            if self.failures.stop {
                return Err(anyhow!("stop failed"));
            }
            Ok(())
        }

        fn destroy(&mut self) -> Result<()> {
            record(&self.calls, "destroy");
            Ok(())
        }
    }

    struct Harness {
        manager: DeviceConnectionManager,
        calls: Arc<Mutex<Calls>>,
        ctx: SourceContext,
        source_events: mpsc::Receiver<SourceEvent>,
    }

    impl Harness {
        fn new(failures: Failures) -> Self {
            let calls = Arc::new(Mutex::new(Calls::default()));
            let platform = MockPlatform {
                calls: calls.clone(),
                failures,
            };
            let (tx, rx) = mpsc::channel();
            let ctx = SourceContext::new(Arc::new(FrameBuffer::new()), tx, CancelToken::new());
            Self {
                manager: DeviceConnectionManager::new(Box::new(platform), CaptureParams::default()),
                calls,
                ctx,
                source_events: rx,
            }
        }

        fn send(&mut self, event: DeviceEvent) -> Step {
            self.manager.handle_event(event, &self.ctx)
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().log.clone()
        }

        fn count(&self, name: &str) -> usize {
            self.calls().iter().filter(|call| *call == name).count()
        }

        fn events(&self) -> Vec<SourceEvent> {
            self.source_events.try_iter().collect()
        }

        fn stream(&mut self) {
            self.send(DeviceEvent::Attached(camera()));
            self.send(DeviceEvent::PermissionGranted(camera().id));
            assert!(matches!(self.manager.state(), DeviceState::Streaming(_)));
        }
    }

    fn camera() -> DeviceInfo {
        DeviceInfo::new("/dev/video0", "UVC Camera")
    }

    #[test]
    fn watch_failure_ends_with_device_error() {
        let mut h = Harness::new(Failures {
            watch: true,
            ..Failures::default()
        });
        h.manager.run(&h.ctx);

        assert_eq!(h.calls(), vec!["watch", "unwatch"]);
        assert_eq!(
            h.events(),
            vec![SourceEvent::Ended {
                source: "mock".into(),
                reason: EndReason::Device(DeviceError::Watch {
                    device: "mock".into(),
                    reason: "no hotplug service".into()
                })
            }]
        );
        assert_eq!(h.manager.state(), &DeviceState::Detached);
    }

    #[test]
    fn reaches_streaming_only_through_connected() {
        let mut h = Harness::new(Failures::default());
        h.stream();
        assert_eq!(
            h.manager.history(),
            vec![
                "Detached",
                "Attached",
                "PermissionRequested",
                "Connected",
                "Streaming"
            ]
        );
        assert_eq!(
            h.calls(),
            vec!["request_permission", "open", "configure", "start"]
        );
        assert_eq!(
            h.events(),
            vec![SourceEvent::Streaming {
                source: "/dev/video0".into()
            }]
        );
    }

    #[test]
    fn disconnect_releases_in_order_exactly_once() {
        let mut h = Harness::new(Failures::default());
        h.stream();
        h.events();

        h.send(DeviceEvent::Disconnected(camera().id));
        h.send(DeviceEvent::Disconnected(camera().id));

        assert_eq!(*h.manager.state(), DeviceState::Detached);
        let calls = h.calls();
        assert_eq!(&calls[4..], ["stop", "destroy", "release"]);
        assert_eq!(
            h.events(),
            vec![SourceEvent::Ended {
                source: "/dev/video0".into(),
                reason: EndReason::Disconnected
            }]
        );
    }

    #[test]
    fn permission_denial_releases_nothing() {
        let mut h = Harness::new(Failures::default());
        h.send(DeviceEvent::Attached(camera()));
        h.send(DeviceEvent::PermissionDenied(camera().id));

        assert_eq!(*h.manager.state(), DeviceState::Detached);
        assert_eq!(h.calls(), vec!["request_permission"]);
        assert!(h.events().is_empty());
    }

    #[test]
    fn open_failure_releases_registration_once() {
        let mut h = Harness::new(Failures {
            open: true,
            ..Failures::default()
        });
        h.send(DeviceEvent::Attached(camera()));
        h.send(DeviceEvent::PermissionGranted(camera().id));

        assert_eq!(*h.manager.state(), DeviceState::Detached);
        assert_eq!(h.calls(), vec!["request_permission", "open", "release"]);
        let events = h.events();
        assert!(matches!(
            &events[..],
            [SourceEvent::Ended {
                reason: EndReason::Device(DeviceError::Open { .. }),
                ..
            }]
        ));
    }

    #[test]
    fn configure_and_start_failures_release_handle() {
        for failures in [
            Failures {
                configure: true,
                ..Failures::default()
            },
            Failures {
                start: true,
                ..Failures::default()
            },
        ] {
            let mut h = Harness::new(failures);
            h.send(DeviceEvent::Attached(camera()));
            h.send(DeviceEvent::PermissionGranted(camera().id));

            assert_eq!(*h.manager.state(), DeviceState::Detached);
            assert_eq!(h.count("stop"), 1);
            assert_eq!(h.count("destroy"), 1);
            assert_eq!(h.count("release"), 1);
            assert!(!h.manager.history().contains(&"Streaming"));
        }
    }

    #[test]
    fn permission_request_failure_releases_registration() {
        let mut h = Harness::new(Failures {
            permission: true,
            ..Failures::default()
        });
        h.send(DeviceEvent::Attached(camera()));
        assert_eq!(*h.manager.state(), DeviceState::Detached);
        assert_eq!(h.calls(), vec!["request_permission", "release"]);
    }

    #[test]
    fn release_continues_past_failing_steps() {
        let mut h = Harness::new(Failures {
            stop: true,
            release: true,
            ..Failures::default()
        });
        h.stream();
        h.send(DeviceEvent::CaptureFailed(camera().id, "usb reset".into()));

        assert_eq!(*h.manager.state(), DeviceState::Detached);
        assert_eq!(h.count("stop"), 1);
        assert_eq!(h.count("destroy"), 1);
        assert_eq!(h.count("release"), 1);
    }

    #[test]
    fn second_device_is_rejected_while_one_is_held() {
        let mut h = Harness::new(Failures::default());
        h.stream();
        h.events();

        h.send(DeviceEvent::Attached(DeviceInfo::new("/dev/video1", "Other")));
        assert!(matches!(h.manager.state(), DeviceState::Streaming(d) if d.id == "/dev/video0"));
        assert_eq!(h.count("open"), 1);
        assert!(matches!(
            &h.events()[..],
            [SourceEvent::Rejected { source, .. }] if source == "/dev/video1"
        ));
    }

    #[test]
    fn invalid_events_are_ignored() {
        let mut h = Harness::new(Failures::default());
        h.send(DeviceEvent::PermissionGranted(camera().id));
        h.send(DeviceEvent::Disconnected(camera().id));
        h.send(DeviceEvent::CaptureFailed(camera().id, "late".into()));
        assert_eq!(*h.manager.state(), DeviceState::Detached);
        assert!(h.calls().is_empty());

        h.send(DeviceEvent::Attached(camera()));
        h.send(DeviceEvent::PermissionGranted("/dev/video9".into()));
        assert!(matches!(
            h.manager.state(),
            DeviceState::PermissionRequested(_)
        ));
    }

    #[test]
    fn stop_exits_and_releases() {
        let mut h = Harness::new(Failures::default());
        h.stream();
        h.events();
        assert_eq!(h.send(DeviceEvent::Stop), Step::Exit);
        assert_eq!(h.count("release"), 1);
        assert_eq!(
            h.events(),
            vec![SourceEvent::Ended {
                source: "/dev/video0".into(),
                reason: EndReason::Stopped
            }]
        );
    }

    #[test]
    fn drop_releases_held_device() {
        let h = Harness::new(Failures::default());
        let calls = h.calls.clone();
        let mut h = h;
        h.stream();
        drop(h);
        let log = calls.lock().unwrap().log.clone();
        assert_eq!(&log[4..], ["stop", "destroy", "release"]);
    }

    #[test]
    fn reattach_after_detach_starts_new_session() {
        let mut h = Harness::new(Failures::default());
        h.stream();
        h.send(DeviceEvent::Disconnected(camera().id));
        h.stream();
        assert_eq!(h.count("open"), 2);
        assert_eq!(h.count("release"), 1);
    }
}
