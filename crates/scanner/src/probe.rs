//! One-shot capability query.

use std::sync::Arc;

use codescan_capture::{CaptureDeviceBinding, CaptureFacility, CodeType};
use tracing::debug;

use crate::{
    error::ProbeError,
    session::{AnalysisOutput, SessionGraph},
};

/// Answers whether the platform can detect a set of code types.
///
/// Every query builds its own binding, input and output and drops them before returning.
/// The session is never started, so no frames are captured.
#[derive(Clone)]
pub struct CapabilityProbe {
    facility: Arc<dyn CaptureFacility>,
}

impl CapabilityProbe {
    pub fn new(facility: Arc<dyn CaptureFacility>) -> Self {
        Self { facility }
    }

    pub fn supports(&self, types: Option<&[CodeType]>) -> Result<bool, ProbeError> {
        supports(&self.facility, types)
    }
}

/// `true` when every requested type is among the types the default device reports.
/// `None` and an empty list both check [`CodeType::Qr`].
pub fn supports(
    facility: &Arc<dyn CaptureFacility>,
    types: Option<&[CodeType]>,
) -> Result<bool, ProbeError> {
    let requested = match types {
        Some(types) if !types.is_empty() => types.to_vec(),
        _ => vec![CodeType::Qr],
    };

    let binding = CaptureDeviceBinding::new(facility.clone());
    let device = binding.resolve_default().ok_or(ProbeError::NoDevice)?;
    let input = binding.to_input(&device)?;

    let output = Arc::new(AnalysisOutput::new(requested.iter().copied()));
    let mut graph = SessionGraph::new();
    graph.begin_configuration();
    graph.add_input(input);
    graph.add_output(output.clone());
    graph.commit_configuration();

    let available = output.available_types();
    let supported = requested.iter().all(|ty| available.contains(ty));
    debug!(device = %device.id, ?requested, ?available, supported, "capability probe");
    Ok(supported)
}
