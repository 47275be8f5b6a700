use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use codescan_capture::{CodeType, DetectionBatch};
use crossbeam_channel::{Sender, unbounded};
use tracing::error;

use crate::{config::AcceptedTypeSet, telemetry};

#[derive(Default)]
struct OutputTypes {
    available: Vec<CodeType>,
    requested: Vec<CodeType>,
}

/// The analysis output of a session.
///
/// Detection batches from a running stream are handed to the delegate on a dedicated
/// worker thread, never on the thread that configured the session. The symbologies asked
/// of the facility are fixed when the session commits: the wanted types that the attached
/// input can actually report.
pub struct AnalysisOutput {
    wanted: AcceptedTypeSet,
    types: Mutex<OutputTypes>,
    sink: Mutex<Option<Sender<DetectionBatch>>>,
    analyzed: Arc<AtomicUsize>,
}

impl AnalysisOutput {
    pub fn new(wanted: impl IntoIterator<Item = CodeType>) -> Self {
        Self {
            wanted: AcceptedTypeSet::new(wanted),
            types: Mutex::new(OutputTypes::default()),
            sink: Mutex::new(None),
            analyzed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Route batches to `handler`, run serially on a new worker named `label`.
    /// Replaces any previous delegate.
    pub fn set_delegate<F>(&self, label: &'static str, mut handler: F) -> io::Result<()>
    where
        F: FnMut(DetectionBatch) + Send + 'static,
    {
        let (tx, rx) = unbounded::<DetectionBatch>();
        let analyzed = self.analyzed.clone();
        telemetry::spawn_thread(label, move || {
            for batch in rx {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(batch))).is_err() {
                    error!(queue = label, "analysis delegate panicked");
                }
                analyzed.fetch_add(1, Ordering::SeqCst);
            }
        })?;
        if let Ok(mut sink) = self.sink.lock() {
            *sink = Some(tx);
        }
        Ok(())
    }

    /// Types the attached input reports; empty while no input is attached.
    pub fn available_types(&self) -> Vec<CodeType> {
        match self.types.lock() {
            Ok(types) => types.available.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Types requested from the facility as of the last commit.
    pub fn requested_types(&self) -> Vec<CodeType> {
        match self.types.lock() {
            Ok(types) => types.requested.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Batches the delegate has finished with, panicked ones included.
    pub fn batches_analyzed(&self) -> usize {
        self.analyzed.load(Ordering::SeqCst)
    }

    pub(crate) fn connect(&self, available: Vec<CodeType>) {
        let requested = self.wanted.intersect(&available);
        if let Ok(mut types) = self.types.lock() {
            *types = OutputTypes {
                available,
                requested,
            };
        }
    }

    pub(crate) fn disconnect(&self) {
        if let Ok(mut types) = self.types.lock() {
            *types = OutputTypes::default();
        }
    }

    pub(crate) fn sink(&self) -> Option<Sender<DetectionBatch>> {
        match self.sink.lock() {
            Ok(sink) => sink.clone(),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use codescan_capture::DetectedObject;

    use super::*;

    #[test]
    fn requested_types_are_wanted_and_available() {
        let output = AnalysisOutput::new([CodeType::Pdf417, CodeType::Qr, CodeType::Ean8]);
        assert!(output.requested_types().is_empty());

        output.connect(vec![CodeType::Qr, CodeType::Code128, CodeType::Ean8]);
        assert_eq!(output.requested_types(), vec![CodeType::Qr, CodeType::Ean8]);
        assert_eq!(
            output.available_types(),
            vec![CodeType::Qr, CodeType::Code128, CodeType::Ean8]
        );

        output.disconnect();
        assert!(output.available_types().is_empty());
        assert!(output.requested_types().is_empty());
    }

    #[test]
    fn delegate_runs_off_the_sending_thread() {
        let output = AnalysisOutput::new([CodeType::Qr]);
        assert!(output.sink().is_none());

        let (seen_tx, seen_rx) = unbounded();
        output
            .set_delegate("test-analysis", move |batch| {
                let name = std::thread::current().name().map(str::to_string);
                let _ = seen_tx.send((batch, name));
            })
            .unwrap();

        let batch = DetectionBatch::new(vec![DetectedObject::code(CodeType::Qr, "A")]);
        output.sink().unwrap().send(batch.clone()).unwrap();
        let (received, thread) = seen_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received, batch);
        assert_eq!(thread.as_deref(), Some("test-analysis"));
    }

    #[test]
    fn analyzed_count_includes_panicking_batches() {
        let output = AnalysisOutput::new([CodeType::Qr]);
        output
            .set_delegate("test-analysis-count", |batch| {
                if batch.is_empty() {
                    panic!("empty batch");
                }
            })
            .unwrap();

        let sink = output.sink().unwrap();
        sink.send(DetectionBatch::new(Vec::new())).unwrap();
        sink.send(DetectionBatch::new(vec![DetectedObject::code(CodeType::Qr, "A")]))
            .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while output.batches_analyzed() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(output.batches_analyzed(), 2);
    }
}
