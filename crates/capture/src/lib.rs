//! Capture devices, session inputs and the detection batches they produce.
//!
//! A [`CaptureFacility`] stands in for the platform camera stack: it discovers devices
//! by [`CapturePosition`], opens them as [`InputSource`]s and, once streaming, emits one
//! [`DetectionBatch`] per analyzed frame. Decoding itself is the facility's business.

mod binding;
#[cfg(feature = "with-opencv")]
mod camera;
mod error;
mod facility;
pub mod scripted;
mod types;

pub use binding::CaptureDeviceBinding;
#[cfg(feature = "with-opencv")]
pub use camera::{CameraSettings, OpenCvFacility};
pub use error::{BindingError, CaptureError, ParseTypeError};
pub use facility::{
    CaptureFacility, FrameSink, FrameSource, InputSource, StreamFailureHandler, StreamHandle,
    StreamSinks,
};
pub use scripted::ScriptedFacility;
pub use types::{
    CapturePosition, CodeType, DetectedObject, DetectionBatch, DeviceHandle, Frame, FrameFormat,
};
