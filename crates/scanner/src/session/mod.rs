//! The capture session and the control context that owns it.
//!
//! Every mutation of the session graph (reconfigure, start, stop) is submitted to a single
//! FIFO worker and runs there in submission order. Callers never wait for that work;
//! `is_running` is a snapshot that becomes consistent once the queued work has run.

mod graph;
mod output;

use std::{
    fmt, io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use codescan_capture::{CaptureError, FrameSink, InputSource};
use tracing::{debug, error, info, warn};

use crate::{error::SessionError, queue::SerialQueue};

use graph::GraphFailureHandler;

pub use graph::SessionGraph;
pub use output::AnalysisOutput;

/// Lifecycle of a capture session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unconfigured,
    Configuring,
    Idle,
    Running,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Unconfigured => "unconfigured",
            SessionState::Configuring => "configuring",
            SessionState::Idle => "idle",
            SessionState::Running => "running",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ErrorHandler = Arc<dyn Fn(SessionError) + Send + Sync>;

struct PipelineShared {
    graph: Mutex<SessionGraph>,
    // Readable while the control context holds the graph lock.
    state: Mutex<SessionState>,
    running: AtomicBool,
    on_error: Mutex<Option<ErrorHandler>>,
}

impl PipelineShared {
    fn report(&self, err: SessionError) {
        let handler = match self.on_error.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        match handler {
            Some(handler) => handler(err),
            None => error!("session error with no handler installed: {err}"),
        }
    }

    fn publish(&self, graph: &SessionGraph) {
        if let Ok(mut state) = self.state.lock() {
            *state = graph.state();
        }
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        metrics::gauge!("scanner_session_running").set(if running { 1.0 } else { 0.0 });
    }

    fn apply_configuration<F>(&self, resolve: F, output: Arc<AnalysisOutput>)
    where
        F: FnOnce() -> Option<InputSource>,
    {
        let Ok(mut graph) = self.graph.lock() else {
            error!("session graph lock poisoned; reconfigure skipped");
            return;
        };
        let was_running = graph.begin_configuration();
        graph.remove_all();
        // The old stream and input are gone; the device can be opened again.
        if let Some(input) = resolve() {
            graph.add_input(input);
        }
        graph.add_output(output);
        graph.commit_configuration();
        debug!(
            has_input = graph.input().is_some(),
            was_running, "session configuration committed"
        );

        // A halt that landed while this task was queued keeps the session stopped.
        if was_running && self.running.load(Ordering::SeqCst) {
            if let Err(err) = graph.start_running() {
                self.set_running(false);
                self.publish(&graph);
                drop(graph);
                self.report(err.into());
                return;
            }
        }
        self.publish(&graph);
    }

    fn start(&self) {
        let Ok(mut graph) = self.graph.lock() else {
            error!("session graph lock poisoned; start skipped");
            return;
        };
        // Batches from the new stream must already see the session running.
        if graph.state() == SessionState::Idle {
            self.set_running(true);
        }
        let started = graph.start_running();
        self.publish(&graph);
        match started {
            Ok(true) => info!("session started"),
            Ok(false) => {}
            Err(err) => {
                self.set_running(false);
                drop(graph);
                self.report(err.into());
            }
        }
    }

    /// A stream ended on its own. Failures from streams already replaced are ignored.
    fn stream_failed(&self, generation: u64, err: CaptureError) {
        let Ok(mut graph) = self.graph.lock() else {
            error!("session graph lock poisoned; stream failure dropped");
            return;
        };
        if graph.generation() != generation || !graph.is_running() {
            debug!(generation, "failure from a retired stream ignored");
            return;
        }
        warn!(generation, "capture stream died; session stopped");
        graph.stop_running();
        self.set_running(false);
        self.publish(&graph);
        drop(graph);
        self.report(err.into());
    }

    fn stop(&self) {
        let Ok(mut graph) = self.graph.lock() else {
            error!("session graph lock poisoned; stop skipped");
            return;
        };
        self.set_running(false);
        if graph.stop_running() {
            info!("session stopped");
        }
        self.publish(&graph);
    }
}

/// A capture session driven from its own control context.
pub struct SessionPipeline {
    shared: Arc<PipelineShared>,
    control: SerialQueue,
}

impl SessionPipeline {
    pub fn new() -> io::Result<Self> {
        let shared = Arc::new(PipelineShared {
            graph: Mutex::new(SessionGraph::new()),
            state: Mutex::new(SessionState::Unconfigured),
            running: AtomicBool::new(false),
            on_error: Mutex::new(None),
        });
        let control = SerialQueue::new("codescan-session")?;

        // Runs on the capture thread; the session reacts on its control context.
        let queue = control.handle();
        let weak = Arc::downgrade(&shared);
        let on_failure: GraphFailureHandler = Arc::new(move |generation: u64, err: CaptureError| {
            let weak = weak.clone();
            queue.dispatch(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.stream_failed(generation, err);
                }
            });
        });
        if let Ok(mut graph) = shared.graph.lock() {
            graph.set_stream_failure_handler(Some(on_failure));
        }

        Ok(Self { shared, control })
    }

    /// Handler for failures raised on the control context. Replaces the previous one.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(SessionError) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.shared.on_error.lock() {
            *slot = Some(Arc::new(handler));
        }
    }

    pub fn set_preview(&self, preview: Option<Arc<dyn FrameSink>>) {
        let shared = self.shared.clone();
        self.control.dispatch(move || {
            if let Ok(mut graph) = shared.graph.lock() {
                graph.set_preview(preview);
            }
        });
    }

    /// Replace the input and output and commit. A running session keeps running.
    pub fn reconfigure(&self, input: Option<InputSource>, output: Arc<AnalysisOutput>) {
        self.reconfigure_with(move || input, output);
    }

    /// Like [`reconfigure`](Self::reconfigure), resolving the input on the control context
    /// once the previous input has been detached.
    pub fn reconfigure_with<F>(&self, resolve: F, output: Arc<AnalysisOutput>)
    where
        F: FnOnce() -> Option<InputSource> + Send + 'static,
    {
        let shared = self.shared.clone();
        self.control
            .dispatch(move || shared.apply_configuration(resolve, output));
    }

    pub fn start(&self) {
        let shared = self.shared.clone();
        self.control.dispatch(move || shared.start());
    }

    pub fn stop(&self) {
        let shared = self.shared.clone();
        self.control.dispatch(move || shared.stop());
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the graph state as of the last control task that finished.
    pub fn state(&self) -> SessionState {
        match self.shared.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Mark the session stopped right now and queue the teardown of its stream.
    ///
    /// Only the caller that flips the running flag gets `true`, so concurrent matches
    /// cannot both win.
    pub(crate) fn halt(&self) -> bool {
        if self
            .shared
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        metrics::gauge!("scanner_session_running").set(0.0);
        self.stop();
        true
    }

    /// Block until every task submitted so far has run.
    pub fn sync(&self) {
        let _ = self.control.sync(|| ());
    }
}

impl Drop for SessionPipeline {
    fn drop(&mut self) {
        let shared = self.shared.clone();
        self.control.dispatch(move || shared.stop());
    }
}
