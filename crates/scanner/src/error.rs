use std::io;

use codescan_capture::{BindingError, CaptureError, CapturePosition};
use thiserror::Error;

/// Failures raised on the session-control context. They never cross back to the caller;
/// the engine logs them and hands them to its session-error hook.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error("capture stream failed")]
    Capture(#[from] CaptureError),
    #[error("capture position `{0}` is not supported; the session has no input")]
    UnsupportedPosition(CapturePosition),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn scanner worker thread")]
    Worker(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no video capture device is present")]
    NoDevice,
    #[error(transparent)]
    Binding(#[from] BindingError),
}
