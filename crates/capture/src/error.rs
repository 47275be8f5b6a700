use std::io;

use thiserror::Error;

/// A resolved device could not be turned into a session input.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("capture device {device:?} is unavailable: {reason}")]
    Unavailable { device: String, reason: String },
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("failed to spawn capture thread")]
    Spawn(#[source] io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseTypeError {
    #[error("unknown code type {0:?}")]
    Code(String),
    #[error("unknown capture position {0:?} (expected `back` or `front`)")]
    Position(String),
}
