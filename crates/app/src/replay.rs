//! Recorded detection streams.
//!
//! A replay file holds one JSON `DetectionBatch` per line, for example
//! `{"objects":[{"object":"machine_readable","type":"qr","value":"HELLO"}]}`.
//! Blank lines and lines starting with `#` are skipped.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use codescan::{DetectionBatch, ScriptedFacility, telemetry};
use crossbeam_channel::{Receiver, bounded};
use tracing::{debug, info};

pub fn load(path: &Path) -> Result<Vec<DetectionBatch>> {
    let file =
        File::open(path).with_context(|| format!("failed to open replay file {}", path.display()))?;
    parse(BufReader::new(file)).with_context(|| format!("invalid replay file {}", path.display()))
}

pub fn parse(reader: impl BufRead) -> Result<Vec<DetectionBatch>> {
    let mut batches = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let batch: DetectionBatch = serde_json::from_str(trimmed)
            .with_context(|| format!("line {}: not a detection batch", idx + 1))?;
        batches.push(batch);
    }
    Ok(batches)
}

/// Feeds batches into a scripted facility while its stream runs.
pub struct ReplayFeeder {
    cancel: Arc<AtomicBool>,
    finished: Receiver<usize>,
}

impl ReplayFeeder {
    /// Wait for the stream to start, then push one batch every `interval`. The returned
    /// receiver yields how many batches were delivered once the feeder is done.
    pub fn spawn(
        facility: ScriptedFacility,
        batches: Vec<DetectionBatch>,
        interval: Duration,
    ) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, finished) = bounded(1);
        let thread_cancel = cancel.clone();
        telemetry::spawn_thread("codescan-replay", move || {
            while !facility.is_streaming() {
                if thread_cancel.load(Ordering::SeqCst) {
                    let _ = done_tx.send(0);
                    return;
                }
                thread::sleep(Duration::from_millis(10));
            }

            let total = batches.len();
            let mut delivered = 0;
            for batch in batches {
                thread::sleep(interval);
                if thread_cancel.load(Ordering::SeqCst) || !facility.push(batch) {
                    debug!("stream closed; replay stops early");
                    break;
                }
                delivered += 1;
            }
            // Leave analysis time to finish the last batch before reporting.
            thread::sleep(interval);
            info!(delivered, total, "replay finished");
            let _ = done_tx.send(delivered);
        })
        .context("failed to spawn replay thread")?;

        Ok(Self { cancel, finished })
    }

    pub fn finished(&self) -> &Receiver<usize> {
        &self.finished
    }
}

impl Drop for ReplayFeeder {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use codescan::{CapturePosition, CodeType, DetectedObject};

    use super::*;

    const SAMPLE: &str = r#"
# two frames
{"objects":[{"object":"machine_readable","type":"qr","value":"HELLO"},{"object":"machine_readable","type":"ean13"}]}

{"objects":[{"object":"other","kind":"face"}],"timestamp_ms":42}
"#;

    #[test]
    fn parses_batches_and_skips_comments() {
        let batches = parse(Cursor::new(SAMPLE)).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(
            batches[0].objects,
            vec![
                DetectedObject::code(CodeType::Qr, "HELLO"),
                DetectedObject::undecoded(CodeType::Ean13),
            ]
        );
        assert_eq!(batches[1].objects, vec![DetectedObject::other("face")]);
        assert_eq!(batches[1].timestamp_ms, 42);
    }

    #[test]
    fn reports_the_offending_line() {
        let err = parse(Cursor::new("{\"objects\":[]}\nnot json\n")).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn feeder_stops_when_cancelled_before_streaming() {
        let facility = ScriptedFacility::new([CodeType::Qr]).with_device(CapturePosition::Back);
        let feeder =
            ReplayFeeder::spawn(facility, Vec::new(), Duration::from_millis(1)).unwrap();
        let finished = feeder.finished().clone();
        drop(feeder);
        assert_eq!(finished.recv_timeout(Duration::from_secs(2)).unwrap(), 0);
    }
}
