use codescan_capture::DetectedObject;

use crate::{config::AcceptedTypeSet, result::ScanResult, session::SessionPipeline};

/// The session's running flag as seen from the analysis context.
pub(crate) trait RunGate {
    fn is_running(&self) -> bool;

    /// Stop the session now. Returns `true` only for the caller that stopped it.
    fn halt(&self) -> bool;
}

impl RunGate for SessionPipeline {
    fn is_running(&self) -> bool {
        SessionPipeline::is_running(self)
    }

    fn halt(&self) -> bool {
        SessionPipeline::halt(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    Found(ScanResult),
    DecodeFailure,
}

/// Classify one batch, in order, and emit what the consumer must hear about.
///
/// Unreadable objects always yield a decode failure. A readable object of an accepted type
/// is a match only while the gate reads running; under `stop_on_first_match` the gate is
/// halted before the result is built, so a later object in this or any following batch
/// cannot match again.
pub(crate) fn evaluate_batch<G, E>(
    objects: &[DetectedObject],
    accepted: &AcceptedTypeSet,
    stop_on_first_match: bool,
    gate: &G,
    mut emit: E,
) where
    G: RunGate + ?Sized,
    E: FnMut(Verdict),
{
    for object in objects {
        let Some((code_type, value)) = object.decoded() else {
            emit(Verdict::DecodeFailure);
            continue;
        };
        if !accepted.contains(code_type) {
            continue;
        }
        if stop_on_first_match {
            if !gate.halt() {
                continue;
            }
        } else if !gate.is_running() {
            continue;
        }
        emit(Verdict::Found(ScanResult::from_code(value, code_type)));
    }
}
