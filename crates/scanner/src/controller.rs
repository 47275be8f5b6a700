//! Headless scanner controller.
//!
//! Stands where a scanning screen would: it forwards view lifecycle events to its engine
//! and relays engine notifications to a delegate and a completion closure. Every
//! delegate and completion call runs on the engine's delivery context.

use std::sync::{Arc, Mutex, Weak};

use codescan_capture::CaptureFacility;
use tracing::debug;

use crate::{
    engine::ScanEngine, error::EngineError, preview::Rect, result::ScanResult,
};

/// Receives the outcome of a scanning screen.
pub trait ScannerDelegate: Send + Sync {
    fn did_scan(&self, result: &ScanResult);

    /// A detected code could not be decoded.
    fn did_fail(&self);

    /// The user dismissed the scanner.
    fn did_cancel(&self);
}

/// Called with the result on success and `None` on decode failure or cancel.
pub type CompletionBlock = Arc<dyn Fn(Option<ScanResult>) + Send + Sync>;

#[derive(Default)]
struct Observers {
    delegate: Mutex<Option<Weak<dyn ScannerDelegate>>>,
    completion: Mutex<Option<CompletionBlock>>,
}

impl Observers {
    fn delegate(&self) -> Option<Arc<dyn ScannerDelegate>> {
        match self.delegate.lock() {
            Ok(slot) => slot.as_ref().and_then(Weak::upgrade),
            Err(_) => None,
        }
    }

    fn complete(&self, result: Option<ScanResult>) {
        let completion = match self.completion.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(completion) = completion {
            completion(result);
        }
    }

    fn found(&self, result: ScanResult) {
        self.complete(Some(result.clone()));
        if let Some(delegate) = self.delegate() {
            delegate.did_scan(&result);
        }
    }

    fn failed(&self) {
        self.complete(None);
        if let Some(delegate) = self.delegate() {
            delegate.did_fail();
        }
    }

    fn cancelled(&self) {
        self.complete(None);
        if let Some(delegate) = self.delegate() {
            delegate.did_cancel();
        }
    }
}

pub struct ScannerController {
    engine: ScanEngine,
    observers: Arc<Observers>,
}

impl ScannerController {
    /// A controller around an engine built with the default configuration.
    pub fn new(facility: Arc<dyn CaptureFacility>) -> Result<Self, EngineError> {
        Ok(Self::with_engine(ScanEngine::with_defaults(facility)?))
    }

    /// Takes over `engine`'s found and decode-failure hooks.
    pub fn with_engine(engine: ScanEngine) -> Self {
        let observers = Arc::new(Observers::default());
        let on_found = observers.clone();
        engine.set_on_found(move |result| on_found.found(result));
        let on_failure = observers.clone();
        engine.set_on_decode_failure(move || on_failure.failed());
        Self { engine, observers }
    }

    pub fn engine(&self) -> &ScanEngine {
        &self.engine
    }

    /// Held weakly; the controller never keeps the delegate alive.
    pub fn set_delegate(&self, delegate: &Arc<dyn ScannerDelegate>) {
        if let Ok(mut slot) = self.observers.delegate.lock() {
            *slot = Some(Arc::downgrade(delegate));
        }
    }

    pub fn clear_delegate(&self) {
        if let Ok(mut slot) = self.observers.delegate.lock() {
            *slot = None;
        }
    }

    pub fn set_completion<F>(&self, completion: F)
    where
        F: Fn(Option<ScanResult>) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.observers.completion.lock() {
            *slot = Some(Arc::new(completion));
        }
    }

    pub fn will_appear(&self) {
        self.engine.start();
    }

    pub fn will_disappear(&self) {
        self.engine.stop();
    }

    /// Keep the preview filling the view.
    pub fn layout(&self, bounds: Rect) {
        self.engine.preview().set_bounds(bounds);
    }

    /// Stop scanning, then report the cancellation.
    pub fn cancel(&self) {
        debug!("scanner cancelled");
        self.engine.stop();
        let observers = self.observers.clone();
        self.engine.deliver(move || observers.cancelled());
    }
}

impl Drop for ScannerController {
    fn drop(&mut self) {
        self.engine.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use codescan_capture::{CapturePosition, CodeType, DetectedObject, DetectionBatch, ScriptedFacility};
    use crossbeam_channel::{Sender, unbounded};

    use super::*;
    use crate::config::EngineConfig;

    #[derive(Debug, PartialEq)]
    enum Event {
        Scan(String),
        Fail,
        Cancel,
        Completion(Option<String>),
    }

    struct Recorder(Sender<Event>);

    impl ScannerDelegate for Recorder {
        fn did_scan(&self, result: &ScanResult) {
            let _ = self.0.send(Event::Scan(result.value.clone()));
        }

        fn did_fail(&self) {
            let _ = self.0.send(Event::Fail);
        }

        fn did_cancel(&self) {
            let _ = self.0.send(Event::Cancel);
        }
    }

    fn controller() -> (ScriptedFacility, ScannerController) {
        let facility = ScriptedFacility::new([CodeType::Qr]).with_device(CapturePosition::Back);
        let engine = ScanEngine::new(EngineConfig::new([CodeType::Qr]), Arc::new(facility.clone()))
            .unwrap();
        (facility, ScannerController::with_engine(engine))
    }

    fn next(rx: &crossbeam_channel::Receiver<Event>) -> Event {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn found_code_reaches_completion_then_delegate() {
        let (facility, controller) = controller();
        let (tx, rx) = unbounded();
        let delegate: Arc<dyn ScannerDelegate> = Arc::new(Recorder(tx.clone()));
        controller.set_delegate(&delegate);
        controller.set_completion(move |result| {
            let _ = tx.send(Event::Completion(result.map(|r| r.value)));
        });

        controller.will_appear();
        controller.engine().flush();
        assert!(facility.push(DetectionBatch::new(vec![DetectedObject::code(
            CodeType::Qr,
            "HELLO"
        )])));

        assert_eq!(next(&rx), Event::Completion(Some("HELLO".into())));
        assert_eq!(next(&rx), Event::Scan("HELLO".into()));
    }

    #[test]
    fn decode_failure_completes_with_none() {
        let (facility, controller) = controller();
        let (tx, rx) = unbounded();
        let delegate: Arc<dyn ScannerDelegate> = Arc::new(Recorder(tx.clone()));
        controller.set_delegate(&delegate);
        controller.set_completion(move |result| {
            let _ = tx.send(Event::Completion(result.map(|r| r.value)));
        });

        controller.will_appear();
        controller.engine().flush();
        facility.push(DetectionBatch::new(vec![DetectedObject::undecoded(CodeType::Qr)]));

        assert_eq!(next(&rx), Event::Completion(None));
        assert_eq!(next(&rx), Event::Fail);
        assert!(controller.engine().is_running());
    }

    #[test]
    fn cancel_stops_then_notifies() {
        let (facility, controller) = controller();
        let (tx, rx) = unbounded();
        let delegate: Arc<dyn ScannerDelegate> = Arc::new(Recorder(tx));
        controller.set_delegate(&delegate);

        controller.will_appear();
        controller.engine().flush();
        assert!(facility.is_streaming());

        controller.cancel();
        assert_eq!(next(&rx), Event::Cancel);
        controller.engine().flush();
        assert!(!controller.engine().is_running());
        assert!(!facility.is_streaming());
    }

    #[test]
    fn delegate_is_held_weakly() {
        let (_facility, controller) = controller();
        let (tx, rx) = unbounded();
        let delegate: Arc<dyn ScannerDelegate> = Arc::new(Recorder(tx));
        controller.set_delegate(&delegate);
        drop(delegate);

        controller.cancel();
        controller.engine().flush();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn layout_sizes_the_preview() {
        let (_facility, controller) = controller();
        controller.layout(Rect::new(0.0, 0.0, 320.0, 480.0));
        assert_eq!(
            controller.engine().preview().bounds(),
            Rect::new(0.0, 0.0, 320.0, 480.0)
        );
    }

    #[test]
    fn disappearing_and_dropping_stop_the_session() {
        let (facility, controller) = controller();
        controller.will_appear();
        controller.engine().flush();
        controller.will_disappear();
        controller.engine().flush();
        assert!(!facility.is_streaming());

        controller.will_appear();
        controller.engine().flush();
        assert!(facility.is_streaming());
        drop(controller);
        assert!(!facility.is_streaming());
    }
}
