//! The `scan` command: a console stand-in for a scanning screen.

use std::{
    io::{self, Write},
    sync::{Arc, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use codescan::{
    CaptureFacility, CapturePosition, CodeType, EngineConfig, EngineHooks, ScanConfig,
    ScanEngine, ScanResult, ScanSource, ScannerController, ScannerDelegate, ScriptedFacility,
    SessionError,
};
use crossbeam_channel::{Receiver, Sender, never, select, unbounded};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::replay::{self, ReplayFeeder};

/// Upper bound on waiting for analysis to catch up with a finished replay.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// What a finished scan saw.
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub found: Vec<ScanResult>,
    pub failures: usize,
}

enum Outcome {
    Scanned(ScanResult),
    Failed,
    Cancelled,
    Unsupported(String),
}

struct ConsoleDelegate {
    outcomes: Sender<Outcome>,
}

impl ScannerDelegate for ConsoleDelegate {
    fn did_scan(&self, result: &ScanResult) {
        let _ = self.outcomes.send(Outcome::Scanned(result.clone()));
    }

    fn did_fail(&self) {
        let _ = self.outcomes.send(Outcome::Failed);
    }

    fn did_cancel(&self) {
        let _ = self.outcomes.send(Outcome::Cancelled);
    }
}

pub fn run(config: ScanConfig) -> Result<()> {
    scan(config, &mut io::stdout()).map(|_| ())
}

/// Run a scan, writing one JSON line per result to `out`.
pub fn scan<W: Write>(config: ScanConfig, out: &mut W) -> Result<ScanSummary> {
    let span = tracing::info_span!(
        "codescan.scan",
        position = %config.engine.capture_position,
        continuous = !config.engine.stop_on_first_match,
    );
    let _span_guard = span.enter();

    match config.source {
        ScanSource::Replay { path, interval } => {
            let batches = replay::load(&path)?;
            info!(batches = batches.len(), path = %path.display(), "replaying detections");
            let facility = ScriptedFacility::new(CodeType::ALL)
                .with_device(CapturePosition::Back)
                .with_device(CapturePosition::Front);
            let feeder = ReplayFeeder::spawn(facility.clone(), batches, interval)?;
            drive(config.engine, Arc::new(facility), Some(feeder.finished().clone()), out)
        }
        ScanSource::Device { width, height, fps } => {
            let facility = camera_facility(Some((width, height, fps)))?;
            drive(config.engine, facility, None, out)
        }
    }
}

#[cfg(feature = "with-opencv")]
pub fn camera_facility(settings: Option<(i32, i32, f64)>) -> Result<Arc<dyn CaptureFacility>> {
    use codescan_capture::{CameraSettings, OpenCvFacility};

    let settings = match settings {
        Some((width, height, fps)) => CameraSettings {
            target_size: (width, height),
            fps,
        },
        None => CameraSettings::default(),
    };
    Ok(Arc::new(OpenCvFacility::new(settings)))
}

#[cfg(not(feature = "with-opencv"))]
pub fn camera_facility(_settings: Option<(i32, i32, f64)>) -> Result<Arc<dyn CaptureFacility>> {
    bail!("camera capture needs the `with-opencv` feature; use --replay or --simulate instead")
}

/// A receiver for Ctrl+C presses. The handler is installed once per process; every caller
/// shares its channel. Presses from before the call are discarded.
fn interrupts() -> Receiver<()> {
    static INTERRUPTS: OnceLock<Option<Receiver<()>>> = OnceLock::new();

    let installed = INTERRUPTS.get_or_init(|| {
        let (tx, rx) = unbounded();
        match ctrlc::set_handler(move || {
            let _ = tx.send(());
        }) {
            Ok(()) => Some(rx),
            Err(err) => {
                warn!("Failed to install Ctrl+C handler: {err}");
                None
            }
        }
    });
    match installed {
        Some(rx) => {
            while rx.try_recv().is_ok() {}
            rx.clone()
        }
        None => never(),
    }
}

/// Wait until analysis has seen `delivered` batches and their notifications went out.
fn settle(engine: &ScanEngine, delivered: usize) {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    while engine.batches_analyzed() < delivered {
        if Instant::now() >= deadline {
            let analyzed = engine.batches_analyzed();
            warn!(delivered, analyzed, "analysis still behind replay");
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    engine.flush();
}

fn drive<W: Write>(
    config: EngineConfig,
    facility: Arc<dyn CaptureFacility>,
    replay_done: Option<Receiver<usize>>,
    out: &mut W,
) -> Result<ScanSummary> {
    let stop_on_first_match = config.stop_on_first_match;
    let (tx, outcomes) = unbounded();
    let errors = tx.clone();
    let hooks = EngineHooks::default().on_session_error(move |err| {
        if let SessionError::UnsupportedPosition(_) = err {
            let _ = errors.send(Outcome::Unsupported(err.to_string()));
        }
    });
    let engine = ScanEngine::with_hooks(config, facility, hooks)?;
    let controller = ScannerController::with_engine(engine);
    let delegate: Arc<dyn ScannerDelegate> = Arc::new(ConsoleDelegate { outcomes: tx });
    controller.set_delegate(&delegate);

    let interrupt = interrupts();
    let mut replay_pending = replay_done.is_some();
    let replay_done = replay_done.unwrap_or_else(never);
    let idle = never::<usize>();
    let mut summary = ScanSummary::default();

    controller.will_appear();
    info!("scanning; press Ctrl+C to stop");
    loop {
        select! {
            recv(outcomes) -> outcome => match outcome? {
                Outcome::Scanned(result) => {
                    writeln!(
                        out,
                        "{}",
                        json!({ "value": result.value, "type": result.metadata_type })
                    )?;
                    out.flush()?;
                    summary.found.push(result);
                    if stop_on_first_match {
                        break;
                    }
                }
                Outcome::Failed => {
                    summary.failures += 1;
                    debug!(failures = summary.failures, "decode failure");
                }
                Outcome::Cancelled => break,
                Outcome::Unsupported(message) => {
                    controller.will_disappear();
                    bail!(message);
                }
            },
            recv(interrupt) -> _ => controller.cancel(),
            recv(if replay_pending { &replay_done } else { &idle }) -> delivered => {
                replay_pending = false;
                let delivered = delivered.unwrap_or(0);
                settle(controller.engine(), delivered);
                debug!(delivered, "replay exhausted");
                controller.cancel();
            }
        }
    }
    controller.will_disappear();

    info!(found = summary.found.len(), failures = summary.failures, "scan finished");
    Ok(summary)
}
