use std::sync::Arc;

use tracing::debug;

use crate::{
    error::BindingError,
    facility::{CaptureFacility, InputSource},
    types::{CapturePosition, DeviceHandle},
};

/// Resolves capture devices by position and wraps them as session inputs.
#[derive(Clone)]
pub struct CaptureDeviceBinding {
    facility: Arc<dyn CaptureFacility>,
}

impl CaptureDeviceBinding {
    pub fn new(facility: Arc<dyn CaptureFacility>) -> Self {
        Self { facility }
    }

    /// The device at `position`, or `None` when the hardware has none there.
    pub fn resolve(&self, position: CapturePosition) -> Option<DeviceHandle> {
        let device = self.facility.device(position);
        if device.is_none() {
            debug!(%position, "no capture device at requested position");
        }
        device
    }

    /// Any video device at all.
    pub fn resolve_default(&self) -> Option<DeviceHandle> {
        self.facility.default_device()
    }

    pub fn to_input(&self, device: &DeviceHandle) -> Result<InputSource, BindingError> {
        self.facility.open(device)
    }

    /// Whether a device exists at `position`.
    pub fn is_available(&self, position: CapturePosition) -> bool {
        self.facility.device(position).is_some()
    }
}
