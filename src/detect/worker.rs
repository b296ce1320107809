use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};

use super::backend::DetectorBackend;
use super::request::DetectionRequest;
use super::result::DetectionResult;
use super::{DetectionListener, Detector, DEFAULT_INPUT_SIZE};
use crate::error::detection_codes;

/// Counters for one `BackendDetector`.
#[derive(Default)]
pub struct DetectorStats {
    pub accepted: AtomicU64,
    pub busy: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

struct Job {
    request: DetectionRequest,
    listener: Arc<dyn DetectionListener>,
}

/// Runs a `DetectorBackend` on a dedicated worker thread.
///
/// Holds at most one queued request next to the one being processed; submissions
/// beyond that are answered with `detection_codes::BUSY` instead of blocking.
pub struct BackendDetector {
    name: &'static str,
    input_size: (u32, u32),
    jobs: Mutex<Option<SyncSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<DetectorStats>,
}

impl BackendDetector {
    pub fn spawn(backend: Arc<Mutex<dyn DetectorBackend>>) -> Result<Self> {
        Self::with_input_size(backend, DEFAULT_INPUT_SIZE)
    }

    pub fn with_input_size(
        backend: Arc<Mutex<dyn DetectorBackend>>,
        input_size: (u32, u32),
    ) -> Result<Self> {
        let name = {
            let mut guard = backend
                .lock()
                .map_err(|_| anyhow!("backend lock poisoned"))?;
            guard.warm_up().context("warm up detector backend")?;
            guard.name()
        };

        let (tx, rx) = mpsc::sync_channel::<Job>(1);
        let stats = Arc::new(DetectorStats::default());
        let worker_stats = stats.clone();

        let worker = std::thread::Builder::new()
            .name(format!("detector-{}", name))
            .spawn(move || {
                for job in rx {
                    let request = job.request;
                    let (width, height) = request.image.dimensions();
                    let outcome = match backend.lock() {
                        Ok(mut guard) => guard.detect(request.image.as_raw(), width, height),
                        Err(_) => Err(anyhow!("backend lock poisoned")),
                    };
                    match outcome {
                        Ok(detections) => {
                            worker_stats.completed.fetch_add(1, Ordering::Relaxed);
                            job.listener.on_result(DetectionResult {
                                detections,
                                image_width: request.frame.width,
                                image_height: request.frame.height,
                                rotation: request.rotation,
                                sequence: request.frame.sequence,
                            });
                        }
                        Err(err) => {
                            worker_stats.failed.fetch_add(1, Ordering::Relaxed);
                            log::warn!(
                                "BackendDetector: {} failed on frame {}: {:#}",
                                name,
                                request.frame.sequence,
                                err
                            );
                            job.listener.on_error(
                                &format!("{:#}", err),
                                detection_codes::BACKEND_FAILED,
                            );
                        }
                    }
                }
            })
            .context("spawn detector worker")?;

        log::info!(
            "BackendDetector: {} ready ({}x{} input)",
            name,
            input_size.0,
            input_size.1
        );
        Ok(Self {
            name,
            input_size,
            jobs: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            stats,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> &DetectorStats {
        &self.stats
    }

    /// Stop accepting requests, finish queued ones, and join the worker.
    pub fn shutdown(&self) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::warn!("BackendDetector: {} worker panicked", self.name);
            }
        }
    }
}

impl Detector for BackendDetector {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn submit(&self, request: DetectionRequest, listener: Arc<dyn DetectionListener>) {
        let sender = match self.jobs.lock() {
            Ok(jobs) => jobs.clone(),
            Err(_) => None,
        };
        let Some(sender) = sender else {
            listener.on_error("detector is shut down", detection_codes::UNAVAILABLE);
            return;
        };

        match sender.try_send(Job { request, listener }) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(job)) => {
                self.stats.busy.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "BackendDetector: busy, dropping frame {}",
                    job.request.sequence()
                );
                job.listener
                    .on_error("detector busy", detection_codes::BUSY);
            }
            Err(TrySendError::Disconnected(job)) => {
                job.listener
                    .on_error("detector worker exited", detection_codes::UNAVAILABLE);
            }
        }
    }
}

impl Drop for BackendDetector {
    fn drop(&mut self) {
        self.shutdown();
    }
}
