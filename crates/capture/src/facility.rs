//! Traits implemented by capture backends and the handles they hand out.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crossbeam_channel::Sender;

use crate::{
    error::{BindingError, CaptureError},
    types::{CapturePosition, CodeType, DetectionBatch, DeviceHandle, Frame},
};

/// Receives live frames for on-screen preview.
pub trait FrameSink: Send + Sync {
    fn present(&self, frame: &Frame);
}

/// Called from a stream that ended on its own because capture failed.
pub type StreamFailureHandler = Arc<dyn Fn(CaptureError) + Send + Sync>;

/// Destinations a running stream feeds.
#[derive(Clone)]
pub struct StreamSinks {
    pub batches: Sender<DetectionBatch>,
    pub preview: Option<Arc<dyn FrameSink>>,
    pub on_failure: Option<StreamFailureHandler>,
}

impl StreamSinks {
    /// Report that the stream died. Not called for streams stopped through their handle.
    pub fn fail(&self, err: CaptureError) {
        match self.on_failure.as_ref() {
            Some(handler) => handler(err),
            None => tracing::error!("capture stream failed: {err}"),
        }
    }
}

/// An opened device able to analyze frames.
pub trait FrameSource: Send + Sync {
    fn device(&self) -> &DeviceHandle;

    /// Symbologies the analyzer attached to this source can report.
    fn available_types(&self) -> Vec<CodeType>;

    /// Begin capturing, restricted to `requested` symbologies.
    fn stream(&self, requested: &[CodeType], sinks: StreamSinks)
    -> Result<StreamHandle, CaptureError>;
}

/// The platform capture facility: device discovery and device opening.
pub trait CaptureFacility: Send + Sync {
    fn device(&self, position: CapturePosition) -> Option<DeviceHandle>;

    /// Any usable video device, preferring the back camera.
    fn default_device(&self) -> Option<DeviceHandle> {
        self.device(CapturePosition::Back)
            .or_else(|| self.device(CapturePosition::Front))
    }

    fn open(&self, device: &DeviceHandle) -> Result<InputSource, BindingError>;
}

/// A device wrapped as a usable session input.
#[derive(Clone)]
pub struct InputSource {
    source: Arc<dyn FrameSource>,
}

impl InputSource {
    pub fn new(source: Arc<dyn FrameSource>) -> Self {
        Self { source }
    }

    pub fn device(&self) -> &DeviceHandle {
        self.source.device()
    }

    pub fn available_types(&self) -> Vec<CodeType> {
        self.source.available_types()
    }

    pub fn stream(
        &self,
        requested: &[CodeType],
        sinks: StreamSinks,
    ) -> Result<StreamHandle, CaptureError> {
        self.source.stream(requested, sinks)
    }
}

impl fmt::Debug for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSource")
            .field("device", self.device())
            .finish()
    }
}

/// Owns a running capture stream. Stopping (or dropping) ends it.
pub struct StreamHandle {
    running: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    on_stop: Option<Box<dyn FnOnce() + Send>>,
}

impl StreamHandle {
    /// Run `body` on a named capture thread. The body must return once the flag it is
    /// handed reads `false`.
    pub fn spawn<F>(name: &str, body: F) -> Result<Self, CaptureError>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_running))
            .map_err(CaptureError::Spawn)?;
        Ok(Self {
            running,
            worker: Some(worker),
            on_stop: None,
        })
    }

    /// A stream driven from outside; `on_stop` runs once when the handle stops.
    pub fn external<F>(on_stop: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            worker: None,
            on_stop: Some(Box::new(on_stop)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(on_stop) = self.on_stop.take() {
            on_stop();
        }
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
