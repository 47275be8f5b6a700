//! In-memory capture facility fed by hand.
//!
//! Devices, their availability and the symbologies the analyzer reports are declared up
//! front. While a stream is running, [`ScriptedFacility::push`] hands a batch to the session
//! exactly as a real analyzer would after inspecting a frame. Batches are delivered verbatim;
//! filtering against accepted types is left to the consumer.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use anyhow::anyhow;
use tracing::debug;

use crate::{
    error::{BindingError, CaptureError},
    facility::{CaptureFacility, FrameSource, InputSource, StreamHandle, StreamSinks},
    types::{CapturePosition, CodeType, DetectionBatch, DeviceHandle, Frame},
};

#[derive(Clone)]
pub struct ScriptedFacility {
    inner: Arc<ScriptedInner>,
}

struct ScriptedInner {
    available: Vec<CodeType>,
    devices: Mutex<Vec<ScriptedDevice>>,
    active: Mutex<Option<ActiveStream>>,
    last_requested: Mutex<Option<Vec<CodeType>>>,
    fail_streams: AtomicBool,
    next_stream: AtomicU64,
    streams_started: AtomicUsize,
    inputs_opened: AtomicUsize,
}

struct ScriptedDevice {
    handle: DeviceHandle,
    openable: bool,
}

struct ActiveStream {
    id: u64,
    sinks: StreamSinks,
}

impl ScriptedFacility {
    /// A facility with no devices whose analyzer reports `available`.
    pub fn new(available: impl IntoIterator<Item = CodeType>) -> Self {
        Self {
            inner: Arc::new(ScriptedInner {
                available: available.into_iter().collect(),
                devices: Mutex::new(Vec::new()),
                active: Mutex::new(None),
                last_requested: Mutex::new(None),
                fail_streams: AtomicBool::new(false),
                next_stream: AtomicU64::new(1),
                streams_started: AtomicUsize::new(0),
                inputs_opened: AtomicUsize::new(0),
            }),
        }
    }

    pub fn with_device(self, position: CapturePosition) -> Self {
        self.add_device(position, true);
        self
    }

    /// Adds a device that exists but refuses to open.
    pub fn with_unavailable_device(self, position: CapturePosition) -> Self {
        self.add_device(position, false);
        self
    }

    fn add_device(&self, position: CapturePosition, openable: bool) {
        let handle = DeviceHandle::new(
            format!("scripted-{position}"),
            format!("Scripted {position} camera"),
            position,
        );
        if let Ok(mut devices) = self.inner.devices.lock() {
            devices.retain(|d| d.handle.position != position);
            devices.push(ScriptedDevice { handle, openable });
        }
    }

    /// Make subsequent stream starts fail as if the device vanished.
    pub fn fail_streams(&self, fail: bool) {
        self.inner.fail_streams.store(fail, Ordering::SeqCst);
    }

    /// Deliver `batch` to the running stream. Returns `false` when nothing is streaming.
    pub fn push(&self, batch: DetectionBatch) -> bool {
        let sender = match self.inner.active.lock() {
            Ok(guard) => guard.as_ref().map(|s| s.sinks.batches.clone()),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(batch).is_ok(),
            None => false,
        }
    }

    /// Present `frame` to the running stream's preview sink, if any.
    pub fn push_frame(&self, frame: &Frame) -> bool {
        let preview = match self.inner.active.lock() {
            Ok(guard) => guard.as_ref().and_then(|s| s.sinks.preview.clone()),
            Err(_) => None,
        };
        match preview {
            Some(sink) => {
                sink.present(frame);
                true
            }
            None => false,
        }
    }

    /// End the running stream as if the device went away mid-capture. Returns `false`
    /// when nothing is streaming.
    pub fn interrupt(&self, reason: &str) -> bool {
        let stream = match self.inner.active.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match stream {
            Some(stream) => {
                debug!(stream = stream.id, reason, "scripted stream interrupted");
                stream.sinks.fail(CaptureError::Other(anyhow!("{reason}")));
                true
            }
            None => false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.inner.active.lock(), Ok(guard) if guard.is_some())
    }

    /// Types requested by the most recently started stream.
    pub fn last_requested(&self) -> Option<Vec<CodeType>> {
        match self.inner.last_requested.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }

    pub fn streams_started(&self) -> usize {
        self.inner.streams_started.load(Ordering::SeqCst)
    }

    pub fn inputs_opened(&self) -> usize {
        self.inner.inputs_opened.load(Ordering::SeqCst)
    }
}

impl CaptureFacility for ScriptedFacility {
    fn device(&self, position: CapturePosition) -> Option<DeviceHandle> {
        let devices = self.inner.devices.lock().ok()?;
        devices
            .iter()
            .find(|d| d.handle.position == position)
            .map(|d| d.handle.clone())
    }

    fn open(&self, device: &DeviceHandle) -> Result<InputSource, BindingError> {
        let openable = match self.inner.devices.lock() {
            Ok(devices) => devices
                .iter()
                .find(|d| d.handle == *device)
                .map(|d| d.openable),
            Err(_) => None,
        };
        match openable {
            Some(true) => {
                self.inner.inputs_opened.fetch_add(1, Ordering::SeqCst);
                Ok(InputSource::new(Arc::new(ScriptedSource {
                    device: device.clone(),
                    inner: self.inner.clone(),
                })))
            }
            Some(false) => Err(BindingError::Unavailable {
                device: device.id.clone(),
                reason: "device is in use".to_string(),
            }),
            None => Err(BindingError::Unavailable {
                device: device.id.clone(),
                reason: "device disconnected".to_string(),
            }),
        }
    }
}

struct ScriptedSource {
    device: DeviceHandle,
    inner: Arc<ScriptedInner>,
}

impl FrameSource for ScriptedSource {
    fn device(&self) -> &DeviceHandle {
        &self.device
    }

    fn available_types(&self) -> Vec<CodeType> {
        self.inner.available.clone()
    }

    fn stream(
        &self,
        requested: &[CodeType],
        sinks: StreamSinks,
    ) -> Result<StreamHandle, CaptureError> {
        if self.inner.fail_streams.load(Ordering::SeqCst) {
            return Err(CaptureError::Open {
                uri: self.device.id.clone(),
            });
        }

        let id = self.inner.next_stream.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.inner.last_requested.lock() {
            *last = Some(requested.to_vec());
        }
        if let Ok(mut active) = self.inner.active.lock() {
            *active = Some(ActiveStream { id, sinks });
        }
        self.inner.streams_started.fetch_add(1, Ordering::SeqCst);
        debug!(device = %self.device.id, stream = id, "scripted stream started");

        let inner = self.inner.clone();
        Ok(StreamHandle::external(move || {
            if let Ok(mut active) = inner.active.lock() {
                if active.as_ref().is_some_and(|s| s.id == id) {
                    *active = None;
                }
            }
            debug!(stream = id, "scripted stream stopped");
        }))
    }
}
