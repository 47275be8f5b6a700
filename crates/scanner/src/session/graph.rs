use std::sync::Arc;

use codescan_capture::{
    CaptureError, FrameSink, InputSource, StreamFailureHandler, StreamHandle, StreamSinks,
};
use tracing::debug;

use crate::session::{AnalysisOutput, SessionState};

/// The capture graph itself: at most one input, at most one analysis output, and the
/// stream that runs while the session is `Running`.
///
/// The graph does no synchronisation of its own; [`SessionPipeline`](super::SessionPipeline)
/// serialises every mutation through its control queue. The capability probe uses a
/// throwaway graph directly.
pub struct SessionGraph {
    state: SessionState,
    input: Option<InputSource>,
    output: Option<Arc<AnalysisOutput>>,
    preview: Option<Arc<dyn FrameSink>>,
    on_stream_failure: Option<GraphFailureHandler>,
    stream: Option<StreamHandle>,
    generation: u64,
}

/// Told which stream generation died and why.
pub(crate) type GraphFailureHandler = Arc<dyn Fn(u64, CaptureError) + Send + Sync>;

impl SessionGraph {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unconfigured,
            input: None,
            output: None,
            preview: None,
            on_stream_failure: None,
            stream: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn input(&self) -> Option<&InputSource> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&Arc<AnalysisOutput>> {
        self.output.as_ref()
    }

    /// Enter `Configuring`, stopping the stream first. Returns whether it was running.
    pub fn begin_configuration(&mut self) -> bool {
        let was_running = self.stop_running();
        self.state = SessionState::Configuring;
        was_running
    }

    /// Detach the input and the output.
    pub fn remove_all(&mut self) {
        self.input = None;
        if let Some(output) = self.output.take() {
            output.disconnect();
        }
    }

    /// Attach `input`; refused while another input is attached.
    pub fn add_input(&mut self, input: InputSource) -> bool {
        if self.input.is_some() {
            return false;
        }
        debug!(device = %input.device().id, "session input attached");
        self.input = Some(input);
        true
    }

    /// Attach `output`; refused while another output is attached.
    pub fn add_output(&mut self, output: Arc<AnalysisOutput>) -> bool {
        if self.output.is_some() {
            return false;
        }
        self.output = Some(output);
        true
    }

    pub fn set_preview(&mut self, preview: Option<Arc<dyn FrameSink>>) {
        self.preview = preview;
    }

    pub(crate) fn set_stream_failure_handler(&mut self, handler: Option<GraphFailureHandler>) {
        self.on_stream_failure = handler;
    }

    /// Identifies the stream started most recently.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Settle the output's requested types against the attached input and become `Idle`.
    pub fn commit_configuration(&mut self) {
        if let Some(output) = self.output.as_ref() {
            let available = self
                .input
                .as_ref()
                .map(InputSource::available_types)
                .unwrap_or_default();
            output.connect(available);
        }
        self.state = SessionState::Idle;
    }

    /// `Idle → Running`. Returns `Ok(false)` when nothing changed: already running, or not
    /// yet configured.
    pub fn start_running(&mut self) -> Result<bool, CaptureError> {
        match self.state {
            SessionState::Running => return Ok(false),
            SessionState::Unconfigured | SessionState::Configuring => {
                debug!(state = ?self.state, "start ignored until configuration commits");
                return Ok(false);
            }
            SessionState::Idle => {}
        }

        match (self.input.as_ref(), self.output.as_ref()) {
            (Some(input), Some(output)) => {
                if let Some(batches) = output.sink() {
                    self.generation += 1;
                    let generation = self.generation;
                    let on_failure = self.on_stream_failure.clone().map(|handler| {
                        Arc::new(move |err: CaptureError| handler(generation, err)) as StreamFailureHandler
                    });
                    let sinks = StreamSinks {
                        batches,
                        preview: self.preview.clone(),
                        on_failure,
                    };
                    self.stream = Some(input.stream(&output.requested_types(), sinks)?);
                }
            }
            _ => debug!("session running without a live input"),
        }
        self.state = SessionState::Running;
        Ok(true)
    }

    /// `Running → Idle`. Returns `false` when it was not running.
    pub fn stop_running(&mut self) -> bool {
        if self.state != SessionState::Running {
            return false;
        }
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        self.state = SessionState::Idle;
        true
    }
}

impl Default for SessionGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use codescan_capture::{CaptureFacility, CapturePosition, CodeType, ScriptedFacility};

    use super::*;

    fn facility_with_input() -> (ScriptedFacility, InputSource) {
        let facility = ScriptedFacility::new([CodeType::Qr, CodeType::Code128])
            .with_device(CapturePosition::Back);
        let device = facility.device(CapturePosition::Back).unwrap();
        let input = facility.open(&device).unwrap();
        (facility, input)
    }

    #[test]
    fn start_requires_committed_configuration() {
        let mut graph = SessionGraph::new();
        assert!(!graph.start_running().unwrap());
        assert_eq!(graph.state(), SessionState::Unconfigured);

        graph.begin_configuration();
        assert!(!graph.start_running().unwrap());
        graph.commit_configuration();
        assert_eq!(graph.state(), SessionState::Idle);
        assert!(graph.start_running().unwrap());
        assert!(graph.is_running());
    }

    #[test]
    fn only_one_input_and_output_attach() {
        let (facility, input) = facility_with_input();
        let mut graph = SessionGraph::new();
        assert!(graph.add_input(input.clone()));
        assert!(!graph.add_input(input));
        assert!(graph.add_output(Arc::new(AnalysisOutput::new([CodeType::Qr]))));
        assert!(!graph.add_output(Arc::new(AnalysisOutput::new([CodeType::Qr]))));

        graph.remove_all();
        assert!(graph.input().is_none());
        assert!(graph.output().is_none());
        assert_eq!(facility.inputs_opened(), 1);
    }

    #[test]
    fn running_graph_streams_requested_types() {
        let (facility, input) = facility_with_input();
        let output = Arc::new(AnalysisOutput::new([CodeType::Pdf417, CodeType::Code128]));
        output.set_delegate("test-graph-analysis", |_| {}).unwrap();

        let mut graph = SessionGraph::new();
        graph.begin_configuration();
        graph.add_input(input);
        graph.add_output(output.clone());
        graph.commit_configuration();
        assert_eq!(output.requested_types(), vec![CodeType::Code128]);

        assert!(graph.start_running().unwrap());
        assert!(!graph.start_running().unwrap());
        assert!(facility.is_streaming());
        assert_eq!(facility.streams_started(), 1);
        assert_eq!(facility.last_requested(), Some(vec![CodeType::Code128]));

        assert!(graph.stop_running());
        assert!(!graph.stop_running());
        assert!(!facility.is_streaming());
    }

    #[test]
    fn reconfiguring_stops_the_stream() {
        let (facility, input) = facility_with_input();
        let output = Arc::new(AnalysisOutput::new([CodeType::Qr]));
        output.set_delegate("test-graph-reconfigure", |_| {}).unwrap();

        let mut graph = SessionGraph::new();
        graph.begin_configuration();
        graph.add_input(input);
        graph.add_output(output);
        graph.commit_configuration();
        graph.start_running().unwrap();

        assert!(graph.begin_configuration());
        assert_eq!(graph.state(), SessionState::Configuring);
        assert!(!facility.is_streaming());
    }

    #[test]
    fn failed_stream_leaves_graph_idle() {
        let (facility, input) = facility_with_input();
        let output = Arc::new(AnalysisOutput::new([CodeType::Qr]));
        output.set_delegate("test-graph-fail", |_| {}).unwrap();
        facility.fail_streams(true);

        let mut graph = SessionGraph::new();
        graph.begin_configuration();
        graph.add_input(input);
        graph.add_output(output);
        graph.commit_configuration();

        assert!(graph.start_running().is_err());
        assert_eq!(graph.state(), SessionState::Idle);
    }

    #[test]
    fn stream_failures_carry_their_generation() {
        let (facility, input) = facility_with_input();
        let output = Arc::new(AnalysisOutput::new([CodeType::Qr]));
        output.set_delegate("test-graph-generation", |_| {}).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();

        let mut graph = SessionGraph::new();
        let on_failure: GraphFailureHandler = Arc::new(move |generation: u64, err: CaptureError| {
            let _ = tx.send((generation, err.to_string()));
        });
        graph.set_stream_failure_handler(Some(on_failure));
        graph.begin_configuration();
        graph.add_input(input);
        graph.add_output(output);
        graph.commit_configuration();

        graph.start_running().unwrap();
        graph.stop_running();
        graph.start_running().unwrap();
        assert_eq!(graph.generation(), 2);

        assert!(facility.interrupt("cable pulled"));
        assert_eq!(rx.try_recv().unwrap(), (2, "cable pulled".to_string()));
    }
}
