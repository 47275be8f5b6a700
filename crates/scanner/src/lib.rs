//! Live code scanning.
//!
//! A [`ScanEngine`] owns a capture session built from a [`CaptureFacility`], filters the
//! detection batches the facility analyzes against its accepted code types, and reports
//! [`ScanResult`]s and decode failures to single-slot hooks on a dedicated delivery thread.
//! [`supports`] answers capability questions without a live engine.

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod preview;
pub mod probe;
pub mod queue;
pub mod result;
pub mod session;
pub mod telemetry;

pub use codescan_capture::{
    BindingError, CaptureDeviceBinding, CaptureError, CaptureFacility, CapturePosition,
    CodeType, DetectedObject, DetectionBatch, DeviceHandle, Frame, FrameFormat, InputSource,
    ScriptedFacility,
};

pub use config::{AcceptedTypeSet, EngineConfig, ScanConfig, ScanSource, TelemetryOptions};
pub use controller::{CompletionBlock, ScannerController, ScannerDelegate};
pub use engine::{EngineHooks, ScanEngine, WeakScanEngine};
pub use error::{EngineError, ProbeError, SessionError};
pub use preview::{PreviewLayer, PreviewSurface, Rect, VideoGravity};
pub use probe::{CapabilityProbe, supports};
pub use result::ScanResult;
pub use session::{AnalysisOutput, SessionGraph, SessionPipeline, SessionState};
