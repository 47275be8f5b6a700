//! Live preview handle exposed to the presentation layer.
//!
//! The engine owns one [`PreviewLayer`] and feeds it frames from the running stream. The
//! presentation layer attaches its own surface and keeps the layer's bounds in step with
//! its layout. The layer only holds a weak reference to the surface.

use std::sync::{Arc, Mutex, Weak};

use codescan_capture::{Frame, FrameSink};

/// A rectangle in surface coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// How a frame is fitted into the layer bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VideoGravity {
    /// Preserve aspect ratio and fill the bounds, cropping overflow.
    #[default]
    ResizeAspectFill,
    /// Preserve aspect ratio and fit inside the bounds.
    ResizeAspect,
    /// Stretch to the bounds.
    Resize,
}

/// Something a presentation layer can draw frames into.
pub trait PreviewSurface: Send + Sync {
    /// Draw `frame` at `placement`, which may extend past the visible bounds.
    fn render(&self, frame: &Frame, placement: Rect);
}

struct LayerState {
    bounds: Rect,
    gravity: VideoGravity,
    surface: Option<Weak<dyn PreviewSurface>>,
}

pub struct PreviewLayer {
    state: Mutex<LayerState>,
}

impl PreviewLayer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LayerState {
                bounds: Rect::default(),
                gravity: VideoGravity::default(),
                surface: None,
            }),
        }
    }

    /// Start drawing into `surface`. Replaces any attached surface.
    pub fn attach(&self, surface: &Arc<dyn PreviewSurface>) {
        if let Ok(mut state) = self.state.lock() {
            state.surface = Some(Arc::downgrade(surface));
        }
    }

    pub fn detach(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.surface = None;
        }
    }

    pub fn set_bounds(&self, bounds: Rect) {
        if let Ok(mut state) = self.state.lock() {
            state.bounds = bounds;
        }
    }

    pub fn bounds(&self) -> Rect {
        self.state.lock().map(|s| s.bounds).unwrap_or_default()
    }

    pub fn set_gravity(&self, gravity: VideoGravity) {
        if let Ok(mut state) = self.state.lock() {
            state.gravity = gravity;
        }
    }

    pub fn gravity(&self) -> VideoGravity {
        self.state.lock().map(|s| s.gravity).unwrap_or_default()
    }

    /// Where a `frame_width` x `frame_height` frame lands inside the current bounds.
    pub fn placement(&self, frame_width: i32, frame_height: i32) -> Rect {
        let (bounds, gravity) = match self.state.lock() {
            Ok(state) => (state.bounds, state.gravity),
            Err(_) => return Rect::default(),
        };
        place(bounds, gravity, frame_width, frame_height)
    }
}

impl Default for PreviewLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for PreviewLayer {
    fn present(&self, frame: &Frame) {
        let (surface, bounds, gravity) = match self.state.lock() {
            Ok(state) => (
                state.surface.as_ref().and_then(Weak::upgrade),
                state.bounds,
                state.gravity,
            ),
            Err(_) => return,
        };
        // Render outside the lock so a surface may call back into the layer.
        if let Some(surface) = surface {
            if !bounds.is_empty() {
                surface.render(frame, place(bounds, gravity, frame.width, frame.height));
            }
        }
    }
}

fn place(bounds: Rect, gravity: VideoGravity, frame_width: i32, frame_height: i32) -> Rect {
    if bounds.is_empty() || frame_width <= 0 || frame_height <= 0 {
        return bounds;
    }
    let sx = bounds.width / f64::from(frame_width);
    let sy = bounds.height / f64::from(frame_height);
    let scale = match gravity {
        VideoGravity::Resize => return bounds,
        VideoGravity::ResizeAspect => sx.min(sy),
        VideoGravity::ResizeAspectFill => sx.max(sy),
    };
    let width = f64::from(frame_width) * scale;
    let height = f64::from(frame_height) * scale;
    Rect {
        x: bounds.x + (bounds.width - width) / 2.0,
        y: bounds.y + (bounds.height - height) / 2.0,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use codescan_capture::FrameFormat;

    use super::*;

    struct Recorder {
        placements: Mutex<Vec<Rect>>,
    }

    impl PreviewSurface for Recorder {
        fn render(&self, _frame: &Frame, placement: Rect) {
            self.placements.lock().unwrap().push(placement);
        }
    }

    fn frame(width: i32, height: i32) -> Frame {
        Frame {
            data: vec![0; (width * height * 3) as usize],
            width,
            height,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        }
    }

    #[test]
    fn aspect_fill_crops_the_long_side() {
        let layer = PreviewLayer::new();
        layer.set_bounds(Rect::new(0.0, 0.0, 100.0, 100.0));
        let placed = layer.placement(200, 100);
        assert_eq!(placed, Rect::new(-50.0, 0.0, 200.0, 100.0));
    }

    #[test]
    fn aspect_fit_letterboxes() {
        let layer = PreviewLayer::new();
        layer.set_bounds(Rect::new(0.0, 0.0, 100.0, 100.0));
        layer.set_gravity(VideoGravity::ResizeAspect);
        assert_eq!(layer.placement(200, 100), Rect::new(0.0, 25.0, 100.0, 50.0));

        layer.set_gravity(VideoGravity::Resize);
        assert_eq!(layer.placement(200, 100), Rect::new(0.0, 0.0, 100.0, 100.0));
    }

    #[test]
    fn frames_reach_only_a_live_surface() {
        let layer = PreviewLayer::new();
        layer.set_bounds(Rect::new(0.0, 0.0, 64.0, 48.0));
        let recorder = Arc::new(Recorder {
            placements: Mutex::new(Vec::new()),
        });
        let surface: Arc<dyn PreviewSurface> = recorder.clone();
        layer.attach(&surface);

        layer.present(&frame(4, 3));
        assert_eq!(
            *recorder.placements.lock().unwrap(),
            vec![Rect::new(0.0, 0.0, 64.0, 48.0)]
        );

        drop(surface);
        drop(recorder);
        // The layer never kept the surface alive.
        layer.present(&frame(4, 3));
    }

    #[test]
    fn empty_bounds_skip_rendering() {
        let layer = PreviewLayer::new();
        let recorder = Arc::new(Recorder {
            placements: Mutex::new(Vec::new()),
        });
        let surface: Arc<dyn PreviewSurface> = recorder.clone();
        layer.attach(&surface);
        layer.present(&frame(4, 3));
        assert!(recorder.placements.lock().unwrap().is_empty());
    }
}
