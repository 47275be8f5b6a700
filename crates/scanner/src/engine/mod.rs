//! The scanning engine: owns a session, filters its detection batches and notifies the
//! consumer.

mod filter;
mod hooks;

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use codescan_capture::{
    CaptureDeviceBinding, CaptureFacility, CapturePosition, CodeType, DetectionBatch,
    FrameSink, InputSource,
};
use tracing::{debug, info};

use crate::{
    config::{AcceptedTypeSet, EngineConfig},
    error::{EngineError, ProbeError, SessionError},
    preview::PreviewLayer,
    probe,
    queue::DeliveryContext,
    result::ScanResult,
    session::{AnalysisOutput, SessionPipeline, SessionState},
};

use filter::{Verdict, evaluate_batch};
use hooks::{Hooks, Notifier};

pub use hooks::{DecodeFailureHook, EngineHooks, FoundHook, SessionErrorHook};

struct EngineShared {
    accepted: AcceptedTypeSet,
    position: CapturePosition,
    stop_on_first_match: AtomicBool,
    binding: CaptureDeviceBinding,
    pipeline: SessionPipeline,
    output: Arc<AnalysisOutput>,
    preview: Arc<PreviewLayer>,
    notifier: Notifier,
}

impl EngineShared {
    fn configure(&self) {
        let binding = self.binding.clone();
        let position = self.position;
        let notifier = self.notifier.clone();
        self.pipeline.reconfigure_with(
            move || resolve_input(&binding, position, &notifier),
            self.output.clone(),
        );
    }

    fn process_batch(&self, batch: DetectionBatch) {
        let span = tracing::debug_span!(
            "scanner.batch",
            objects = batch.len(),
            timestamp_ms = batch.timestamp_ms
        );
        let _guard = span.enter();
        metrics::counter!("scanner_batches_total").increment(1);

        let stop = self.stop_on_first_match.load(Ordering::SeqCst);
        evaluate_batch(
            &batch.objects,
            &self.accepted,
            stop,
            &self.pipeline,
            |verdict| match verdict {
                Verdict::Found(result) => {
                    metrics::counter!(
                        "scanner_codes_found_total",
                        "type" => result.metadata_type.clone()
                    )
                    .increment(1);
                    info!(code_type = %result.metadata_type, "code found");
                    self.notifier.found(result);
                }
                Verdict::DecodeFailure => {
                    metrics::counter!("scanner_decode_failures_total").increment(1);
                    debug!("detected object could not be decoded");
                    self.notifier.decode_failure();
                }
            },
        );
    }
}

/// Runs on the session-control context.
fn resolve_input(
    binding: &CaptureDeviceBinding,
    position: CapturePosition,
    notifier: &Notifier,
) -> Option<InputSource> {
    match position {
        CapturePosition::Front => {
            notifier.session_error(SessionError::UnsupportedPosition(position));
            None
        }
        CapturePosition::Back => {
            let device = binding.resolve(position)?;
            match binding.to_input(&device) {
                Ok(input) => Some(input),
                Err(err) => {
                    notifier.session_error(err.into());
                    None
                }
            }
        }
    }
}

/// A live code scanner.
///
/// Construction configures the session on its control context; nothing is captured until
/// [`start`](Self::start). Results and decode failures reach the hooks on a single delivery
/// thread, never concurrently with each other. Clones share the same engine; the session
/// is stopped and the device released when the last clone drops.
#[derive(Clone)]
pub struct ScanEngine {
    shared: Arc<EngineShared>,
}

/// A non-owning reference to a [`ScanEngine`].
#[derive(Clone)]
pub struct WeakScanEngine {
    shared: Weak<EngineShared>,
}

impl WeakScanEngine {
    pub fn upgrade(&self) -> Option<ScanEngine> {
        self.shared.upgrade().map(|shared| ScanEngine { shared })
    }
}

impl ScanEngine {
    pub fn new(config: EngineConfig, facility: Arc<dyn CaptureFacility>) -> Result<Self, EngineError> {
        Self::with_hooks(config, facility, EngineHooks::default())
    }

    /// Like [`new`](Self::new), with `hooks` in place before the session is configured.
    pub fn with_hooks(
        config: EngineConfig,
        facility: Arc<dyn CaptureFacility>,
        hooks: EngineHooks,
    ) -> Result<Self, EngineError> {
        let pipeline = SessionPipeline::new()?;
        let notifier = Notifier::new(Arc::new(Hooks::from(hooks)), DeliveryContext::new()?);
        let preview = Arc::new(PreviewLayer::new());
        let output = Arc::new(AnalysisOutput::new(config.accepted_types.iter()));

        let errors = notifier.clone();
        pipeline.set_error_handler(move |err| errors.session_error(err));
        pipeline.set_preview(Some(preview.clone() as Arc<dyn FrameSink>));

        info!(
            types = ?config.accepted_types.as_slice(),
            position = %config.capture_position,
            stop_on_first_match = config.stop_on_first_match,
            "scan engine created"
        );
        let shared = Arc::new(EngineShared {
            accepted: config.accepted_types,
            position: config.capture_position,
            stop_on_first_match: AtomicBool::new(config.stop_on_first_match),
            binding: CaptureDeviceBinding::new(facility),
            pipeline,
            output,
            preview,
            notifier,
        });

        let weak = Arc::downgrade(&shared);
        shared.output.set_delegate("codescan-analysis", move |batch| {
            if let Some(engine) = weak.upgrade() {
                engine.process_batch(batch);
            }
        })?;
        shared.configure();

        Ok(Self { shared })
    }

    /// Accept `types` from the back camera, stopping at the first match.
    pub fn with_types(
        types: impl IntoIterator<Item = CodeType>,
        facility: Arc<dyn CaptureFacility>,
    ) -> Result<Self, EngineError> {
        Self::new(EngineConfig::new(types), facility)
    }

    /// An engine with [`EngineConfig::default`].
    pub fn with_defaults(facility: Arc<dyn CaptureFacility>) -> Result<Self, EngineError> {
        Self::new(EngineConfig::default(), facility)
    }

    /// Whether `facility` can detect every type in `types`, without touching any live
    /// session. `None` or an empty list checks QR.
    pub fn supports(
        facility: &Arc<dyn CaptureFacility>,
        types: Option<&[CodeType]>,
    ) -> Result<bool, ProbeError> {
        probe::supports(facility, types)
    }

    pub fn accepted_types(&self) -> &AcceptedTypeSet {
        &self.shared.accepted
    }

    pub fn capture_position(&self) -> CapturePosition {
        self.shared.position
    }

    /// Types the engine asked the facility for; settled once configuration commits.
    pub fn requested_types(&self) -> Vec<CodeType> {
        self.shared.output.requested_types()
    }

    /// Batches the analysis context has finished with since the engine was built.
    pub fn batches_analyzed(&self) -> usize {
        self.shared.output.batches_analyzed()
    }

    pub fn stop_on_first_match(&self) -> bool {
        self.shared.stop_on_first_match.load(Ordering::SeqCst)
    }

    /// Takes effect from the next batch analyzed.
    pub fn set_stop_on_first_match(&self, stop: bool) {
        self.shared.stop_on_first_match.store(stop, Ordering::SeqCst);
    }

    pub fn start(&self) {
        self.shared.pipeline.start();
    }

    pub fn stop(&self) {
        self.shared.pipeline.stop();
    }

    pub fn is_running(&self) -> bool {
        self.shared.pipeline.is_running()
    }

    pub fn session_state(&self) -> SessionState {
        self.shared.pipeline.state()
    }

    /// Resolve the device again and rebuild the session. A running session keeps running.
    pub fn reconfigure(&self) {
        self.shared.configure();
    }

    /// Replaces the previous found handler.
    pub fn set_on_found<F>(&self, hook: F)
    where
        F: Fn(ScanResult) + Send + Sync + 'static,
    {
        self.shared.notifier.hooks().set_found(Some(Arc::new(hook)));
    }

    /// Replaces the previous decode-failure handler.
    pub fn set_on_decode_failure<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared
            .notifier
            .hooks()
            .set_decode_failure(Some(Arc::new(hook)));
    }

    /// Replaces the previous session-error handler.
    pub fn set_on_session_error<F>(&self, hook: F)
    where
        F: Fn(SessionError) + Send + Sync + 'static,
    {
        self.shared
            .notifier
            .hooks()
            .set_session_error(Some(Arc::new(hook)));
    }

    /// The handle a presentation layer attaches its surface to.
    pub fn preview(&self) -> Arc<PreviewLayer> {
        self.shared.preview.clone()
    }

    /// Block until queued session work has run and queued notifications were delivered.
    /// Batches still in analysis are not waited for.
    pub fn flush(&self) {
        self.shared.pipeline.sync();
        self.shared.notifier.delivery().flush();
    }

    /// Run `job` on the delivery context after every notification queued so far.
    pub(crate) fn deliver<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.notifier.delivery().deliver(job);
    }

    /// Whether the caller is on the thread hooks are delivered on.
    pub fn is_delivery_context(&self) -> bool {
        self.shared.notifier.delivery().is_current()
    }

    pub fn downgrade(&self) -> WeakScanEngine {
        WeakScanEngine {
            shared: Arc::downgrade(&self.shared),
        }
    }
}
