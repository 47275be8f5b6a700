//! OpenCV-backed capture facility.
//!
//! Devices are V4L-style indices: the back camera is `#0`, the front camera `#1`. Frames
//! are analyzed with OpenCV's QR detector, so `qr` is the only reported symbology.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::anyhow;
use chrono::Utc;
use opencv::{
    core::{MatTraitConstManual, Vector},
    objdetect::QRCodeDetector,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{debug, warn};

use crate::{
    error::{BindingError, CaptureError},
    facility::{CaptureFacility, FrameSource, InputSource, StreamHandle, StreamSinks},
    types::{
        CapturePosition, CodeType, DetectedObject, DetectionBatch, DeviceHandle, Frame,
        FrameFormat,
    },
};

/// Capture settings applied to every opened device.
#[derive(Clone, Copy, Debug)]
pub struct CameraSettings {
    pub target_size: (i32, i32),
    pub fps: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            target_size: (1280, 720),
            fps: 30.0,
        }
    }
}

pub struct OpenCvFacility {
    settings: CameraSettings,
}

impl OpenCvFacility {
    pub fn new(settings: CameraSettings) -> Self {
        Self { settings }
    }
}

fn device_index(position: CapturePosition) -> i32 {
    match position {
        CapturePosition::Back => 0,
        CapturePosition::Front => 1,
    }
}

/// Parse a `/dev/videoX` style id and return the zero-based index if present.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    let stripped = uri.strip_prefix("/dev/video")?;
    if stripped.chars().all(|c| c.is_ascii_digit()) {
        return stripped.parse::<i32>().ok();
    }
    None
}

impl CaptureFacility for OpenCvFacility {
    fn device(&self, position: CapturePosition) -> Option<DeviceHandle> {
        let index = device_index(position);
        let id = format!("/dev/video{index}");
        if cfg!(target_os = "linux") && !std::path::Path::new(&id).exists() {
            return None;
        }
        Some(DeviceHandle::new(id, format!("Camera #{index}"), position))
    }

    fn open(&self, device: &DeviceHandle) -> Result<InputSource, BindingError> {
        let unavailable = |reason: String| BindingError::Unavailable {
            device: device.id.clone(),
            reason,
        };
        let index = parse_device_index(&device.id)
            .ok_or_else(|| unavailable("not a video device index".to_string()))?;
        let mut cap = open_video_capture(index).map_err(|err| unavailable(err.to_string()))?;
        configure_camera(&mut cap, &device.id, self.settings);

        Ok(InputSource::new(Arc::new(OpenCvSource {
            device: device.clone(),
            capture: Arc::new(Mutex::new(cap)),
        })))
    }
}

struct OpenCvSource {
    device: DeviceHandle,
    capture: Arc<Mutex<VideoCapture>>,
}

impl FrameSource for OpenCvSource {
    fn device(&self) -> &DeviceHandle {
        &self.device
    }

    fn available_types(&self) -> Vec<CodeType> {
        vec![CodeType::Qr]
    }

    fn stream(
        &self,
        requested: &[CodeType],
        sinks: StreamSinks,
    ) -> Result<StreamHandle, CaptureError> {
        let capture = self.capture.clone();
        let detect = requested.contains(&CodeType::Qr);
        let device = self.device.id.clone();
        StreamHandle::spawn("codescan-capture", move |running| {
            if let Err(err) = capture_loop(&capture, detect, &sinks, &running) {
                warn!(device = %device, "capture loop ended: {err}");
                // A handle that already asked us to stop does not need the failure.
                if running.load(Ordering::SeqCst) {
                    sinks.fail(err);
                }
            }
        })
    }
}

/// Main capture loop executed on the stream thread.
fn capture_loop(
    capture: &Mutex<VideoCapture>,
    detect: bool,
    sinks: &StreamSinks,
    running: &AtomicBool,
) -> Result<(), CaptureError> {
    let mut cap = capture
        .lock()
        .map_err(|_| CaptureError::Other(anyhow!("capture device lock poisoned")))?;
    let detector = QRCodeDetector::default().map_err(|e| CaptureError::Other(e.into()))?;

    let mut frame = Mat::default();
    while running.load(Ordering::SeqCst) {
        cap.read(&mut frame)
            .map_err(|e| CaptureError::Other(e.into()))?;

        let size = frame.size().map_err(|e| CaptureError::Other(e.into()))?;
        if size.width <= 0 {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }
        let timestamp_ms = Utc::now().timestamp_millis();

        if let Some(preview) = sinks.preview.as_ref() {
            let data = frame
                .data_bytes()
                .map_err(|e| CaptureError::Other(e.into()))?
                .to_vec();
            preview.present(&Frame {
                data,
                width: size.width,
                height: size.height,
                timestamp_ms,
                format: FrameFormat::Bgr8,
            });
        }

        if !detect {
            continue;
        }

        let mut decoded = Vector::<String>::new();
        let mut points = Mat::default();
        let mut straight = Vector::<Mat>::new();
        let found = detector
            .detect_and_decode_multi(&frame, &mut decoded, &mut points, &mut straight)
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !found || decoded.is_empty() {
            continue;
        }

        let objects = decoded
            .iter()
            .map(|text| {
                if text.is_empty() {
                    DetectedObject::undecoded(CodeType::Qr)
                } else {
                    DetectedObject::code(CodeType::Qr, text)
                }
            })
            .collect();
        debug!(codes = decoded.len(), "frame analyzed");
        if sinks
            .batches
            .send(DetectionBatch {
                objects,
                timestamp_ms,
            })
            .is_err()
        {
            break;
        }
    }

    Ok(())
}

/// Attempt to open a camera by index, trying V4L before the generic backend.
fn open_video_capture(index: i32) -> Result<VideoCapture, CaptureError> {
    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::new(index, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open device #{index} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: format!("/dev/video{index}"),
    })
}

/// Ask the driver for MJPG, then YUYV, plus the target size and rate. Settings the
/// driver refuses are logged and left at the device default.
fn configure_camera(cap: &mut VideoCapture, device: &str, settings: CameraSettings) {
    let pixel_format = [['M', 'J', 'P', 'G'], ['Y', 'U', 'Y', 'V']]
        .into_iter()
        .find(|&[a, b, c, d]| {
            videoio::VideoWriter::fourcc(a, b, c, d)
                .is_ok_and(|code| matches!(cap.set(videoio::CAP_PROP_FOURCC, code as f64), Ok(true)))
        });
    match pixel_format {
        Some(code) => debug!(device, fourcc = %String::from_iter(code), "pixel format set"),
        None => warn!(device, "driver kept its default pixel format"),
    }

    let (width, height) = settings.target_size;
    for (property, name, value) in [
        (videoio::CAP_PROP_FRAME_WIDTH, "width", width as f64),
        (videoio::CAP_PROP_FRAME_HEIGHT, "height", height as f64),
        (videoio::CAP_PROP_FPS, "fps", settings.fps),
    ] {
        if !matches!(cap.set(property, value), Ok(true)) {
            warn!(device, property = name, value, "capture setting refused by driver");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_indices() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("/dev/video2"), Some(2));
        assert_eq!(parse_device_index("/dev/videoX"), None);
        assert_eq!(parse_device_index("rtsp://camera"), None);
    }
}
