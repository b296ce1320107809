//! camwatchd - watch a camera feed and log detections.
//!
//! Connects to the configured source (network MJPEG stream or USB device), runs the
//! selected detector backend on the latest frame at the configured interval, and logs
//! the first detection of every result until Ctrl-C.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use camwatch::detect::DetectionOutcome;
use camwatch::scheduler::SharedOrientation;
use camwatch::{
    BackendDetector, BackendRegistry, CamwatchConfig, ChannelListener, DetectionResult,
    DisplayOrientation, EndReason, Session, SessionOptions, SourceEvent, SourceKind,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Ingest a live camera feed and run periodic object detection"
)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "CAMWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Treat the display as landscape (rotation hint 90 degrees).
    #[arg(long)]
    landscape: bool,

    /// Detector backend to use (see --list-backends).
    #[arg(long)]
    backend: Option<String>,

    /// Print the available detector backends and exit.
    #[arg(long)]
    list_backends: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let registry = BackendRegistry::with_builtin();
    if args.list_backends {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let config = CamwatchConfig::load_from(args.config.as_deref())?;
    log::info!("camwatchd: {:?}", config);

    let backend_name = args
        .backend
        .as_deref()
        .or(config.detection.backend.as_deref());
    let backend = registry.resolve(backend_name)?;
    let detector = Arc::new(BackendDetector::with_input_size(backend, config.input_size())?);
    let orientation = if args.landscape {
        DisplayOrientation::Landscape
    } else {
        config.orientation
    };

    let (detections_tx, detections_rx) = mpsc::channel();
    let (events_tx, events_rx) = mpsc::channel();
    let mut session = Session::start(
        config.build_source()?,
        SessionOptions {
            detector: detector.clone(),
            listener: Arc::new(ChannelListener::new(detections_tx)),
            orientation: Arc::new(SharedOrientation::new(orientation)),
            detection_interval: config.detection.interval,
        },
        events_tx,
    )?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    log::info!("camwatchd: running (Ctrl-C to stop)");
    loop {
        if shutdown_rx.try_recv().is_ok() {
            log::info!("camwatchd: shutdown requested");
            break;
        }

        let mut stream_over = false;
        for event in events_rx.try_iter() {
            match event {
                SourceEvent::Streaming { source } => log::info!("camwatchd: {} streaming", source),
                SourceEvent::Ended { source, reason } => {
                    log::info!("camwatchd: {} ended: {}", source, reason);
                    stream_over |=
                        config.source == SourceKind::Stream || reason == EndReason::Stopped;
                }
                SourceEvent::Rejected { source, reason } => {
                    log::warn!("camwatchd: rejected {}: {}", source, reason)
                }
            }
        }
        if stream_over || session.is_finished() {
            break;
        }

        match detections_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(DetectionOutcome::Result(result)) => report(&result),
            Ok(DetectionOutcome::Error(err)) => log::debug!("camwatchd: {}", err),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    session.stop();
    detector.shutdown();
    let stats = session.scheduler_stats();
    log::info!(
        "camwatchd: stopped after {} ticks, {} submissions",
        stats.ticks,
        stats.submissions
    );
    Ok(())
}

/// Log the first detection only, the one an overlay would draw.
fn report(result: &DetectionResult) {
    match result.first() {
        Some(detection) => {
            let (left, top, right, bottom) = detection
                .bbox
                .scaled(result.image_width, result.image_height);
            log::info!(
                "camwatchd: frame {} (rot {}): {} {:.2} at [{}, {}, {}, {}]",
                result.sequence,
                result.rotation.degrees(),
                detection.label,
                detection.confidence,
                left,
                top,
                right,
                bottom
            );
        }
        None => log::debug!("camwatchd: frame {}: no detections", result.sequence),
    }
}
