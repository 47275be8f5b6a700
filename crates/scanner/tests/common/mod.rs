#![allow(dead_code)]

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use codescan::{
    CapturePosition, CodeType, DetectedObject, DetectionBatch, EngineConfig, EngineHooks,
    ScanEngine, ScanResult, ScriptedFacility,
};
use crossbeam_channel::{Receiver, unbounded};

pub const TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq)]
pub enum Event {
    Found(ScanResult),
    DecodeFailure,
    SessionError(String),
}

/// Poll `condition` until it holds or `TIMEOUT` elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn back_camera(available: &[CodeType]) -> ScriptedFacility {
    ScriptedFacility::new(available.iter().copied()).with_device(CapturePosition::Back)
}

/// An engine over `facility` whose hooks all feed the returned receiver.
pub fn engine_with_events(
    config: EngineConfig,
    facility: &ScriptedFacility,
) -> (ScanEngine, Receiver<Event>) {
    let (tx, rx) = unbounded();
    let found = tx.clone();
    let failure = tx.clone();
    let hooks = EngineHooks::default()
        .on_found(move |result| {
            let _ = found.send(Event::Found(result));
        })
        .on_decode_failure(move || {
            let _ = failure.send(Event::DecodeFailure);
        })
        .on_session_error(move |err| {
            let _ = tx.send(Event::SessionError(err.to_string()));
        });
    let engine = ScanEngine::with_hooks(config, Arc::new(facility.clone()), hooks).unwrap();
    (engine, rx)
}

/// Start `engine` and wait until its stream is live.
pub fn start_streaming(engine: &ScanEngine, facility: &ScriptedFacility) {
    engine.start();
    engine.flush();
    assert!(engine.is_running());
    assert!(facility.is_streaming());
}

pub fn batch(objects: Vec<DetectedObject>) -> DetectionBatch {
    DetectionBatch::new(objects)
}

/// Collect events until a decode failure arrives, which a test uses as a sentinel.
pub fn events_until_failure(rx: &Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        match rx.recv_timeout(TIMEOUT) {
            Ok(Event::DecodeFailure) => return events,
            Ok(event) => events.push(event),
            Err(err) => panic!("sentinel never arrived: {err}; saw {events:?}"),
        }
    }
}
