//! Session wiring.
//!
//! A `Session` runs one `FrameSource` on its own thread and a supervisor that reacts to
//! the source's events:
//! - `Streaming`: start the detection scheduler
//! - `Ended`: stop the scheduler and clear the frame buffer
//!
//! Every event is forwarded to the caller afterwards. `Session::stop` cancels the
//! source, joins both threads and stops the scheduler, so nothing is submitted for
//! detection once it returns.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cancel::CancelToken;
use crate::detect::{DetectionListener, Detector};
use crate::frame::FrameBuffer;
use crate::ingest::{FrameSource, SourceContext, SourceEvent};
use crate::scheduler::{DetectionScheduler, OrientationSource, SchedulerStats};

pub struct SessionOptions {
    pub detector: Arc<dyn Detector>,
    pub listener: Arc<dyn DetectionListener>,
    pub orientation: Arc<dyn OrientationSource>,
    pub detection_interval: Duration,
}

pub struct Session {
    source: String,
    buffer: Arc<FrameBuffer>,
    scheduler: Arc<DetectionScheduler>,
    cancel: CancelToken,
    source_thread: Option<JoinHandle<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl Session {
    /// Start `source` and supervise it. Source events are forwarded to `events`.
    pub fn start(
        mut source: Box<dyn FrameSource>,
        options: SessionOptions,
        events: Sender<SourceEvent>,
    ) -> Result<Self> {
        let name = source.describe();
        let buffer = Arc::new(FrameBuffer::new());
        let scheduler = Arc::new(DetectionScheduler::new(
            buffer.clone(),
            options.detector,
            options.listener,
            options.orientation,
        ));
        let cancel = CancelToken::new();
        let (source_tx, source_rx) = mpsc::channel();

        let supervisor = {
            let buffer = buffer.clone();
            let scheduler = scheduler.clone();
            let interval = options.detection_interval;
            std::thread::Builder::new()
                .name("session-supervisor".to_string())
                .spawn(move || supervise(source_rx, &scheduler, &buffer, interval, events))
                .context("spawn session supervisor")?
        };

        let ctx = SourceContext::new(buffer.clone(), source_tx, cancel.clone());
        let source_thread = std::thread::Builder::new()
            .name("frame-source".to_string())
            .spawn(move || {
                source.run(&ctx);
                log::debug!("Session: source {} returned", source.describe());
            });
        let source_thread = match source_thread {
            Ok(handle) => handle,
            Err(err) => {
                // The supervisor exits once the context (and its sender) is gone.
                let _ = supervisor.join();
                return Err(err).context("spawn frame source");
            }
        };

        log::info!(
            "Session: started {} ({} ms detection interval)",
            name,
            options.detection_interval.as_millis()
        );
        Ok(Self {
            source: name,
            buffer,
            scheduler,
            cancel,
            source_thread: Some(source_thread),
            supervisor: Some(supervisor),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// True once the source has returned on its own or after `stop`.
    pub fn is_finished(&self) -> bool {
        self.source_thread
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Cancel the source, stop detection, and release everything the session holds.
    pub fn stop(&mut self) {
        if self.cancel.cancel() {
            log::info!("Session: stopping {}", self.source);
        }
        if let Some(handle) = self.source_thread.take() {
            if handle.join().is_err() {
                log::warn!("Session: source thread for {} panicked", self.source);
            }
        }
        if let Some(handle) = self.supervisor.take() {
            if handle.join().is_err() {
                log::warn!("Session: supervisor for {} panicked", self.source);
            }
        }
        self.scheduler.stop();
        self.buffer.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn supervise(
    events_rx: Receiver<SourceEvent>,
    scheduler: &DetectionScheduler,
    buffer: &FrameBuffer,
    interval: Duration,
    forward: Sender<SourceEvent>,
) {
    for event in events_rx {
        match &event {
            SourceEvent::Streaming { source } => {
                log::info!("Session: {} streaming", source);
                if let Err(err) = scheduler.start(interval) {
                    log::warn!("Session: cannot start detection: {:#}", err);
                }
            }
            SourceEvent::Ended { source, reason } => {
                log::info!("Session: {} ended ({})", source, reason);
                scheduler.stop();
                buffer.clear();
            }
            SourceEvent::Rejected { source, reason } => {
                log::warn!("Session: rejected {}: {}", source, reason);
            }
        }
        let _ = forward.send(event);
    }
    scheduler.stop();
}
