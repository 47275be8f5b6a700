//! Consumer hooks and their hand-off to the delivery context.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::{error::SessionError, queue::DeliveryContext, result::ScanResult};

pub type FoundHook = Arc<dyn Fn(ScanResult) + Send + Sync>;
pub type DecodeFailureHook = Arc<dyn Fn() + Send + Sync>;
pub type SessionErrorHook = Arc<dyn Fn(SessionError) + Send + Sync>;

/// Hooks installed before the engine configures its session, so nothing reported during
/// configuration is missed.
#[derive(Clone, Default)]
pub struct EngineHooks {
    pub on_found: Option<FoundHook>,
    pub on_decode_failure: Option<DecodeFailureHook>,
    pub on_session_error: Option<SessionErrorHook>,
}

impl EngineHooks {
    pub fn on_found<F>(mut self, hook: F) -> Self
    where
        F: Fn(ScanResult) + Send + Sync + 'static,
    {
        self.on_found = Some(Arc::new(hook));
        self
    }

    pub fn on_decode_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_decode_failure = Some(Arc::new(hook));
        self
    }

    pub fn on_session_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(SessionError) + Send + Sync + 'static,
    {
        self.on_session_error = Some(Arc::new(hook));
        self
    }
}

/// Single-slot handlers. Setting one discards the previous handler; the slot is read when
/// the notification runs on the delivery context, not when it is queued.
#[derive(Default)]
pub(crate) struct Hooks {
    found: Mutex<Option<FoundHook>>,
    decode_failure: Mutex<Option<DecodeFailureHook>>,
    session_error: Mutex<Option<SessionErrorHook>>,
}

fn load<T: Clone>(slot: &Mutex<Option<T>>) -> Option<T> {
    match slot.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => None,
    }
}

fn store<T>(slot: &Mutex<Option<T>>, value: Option<T>) {
    if let Ok(mut guard) = slot.lock() {
        *guard = value;
    }
}

impl From<EngineHooks> for Hooks {
    fn from(hooks: EngineHooks) -> Self {
        Self {
            found: Mutex::new(hooks.on_found),
            decode_failure: Mutex::new(hooks.on_decode_failure),
            session_error: Mutex::new(hooks.on_session_error),
        }
    }
}

impl Hooks {
    pub(crate) fn set_found(&self, hook: Option<FoundHook>) {
        store(&self.found, hook);
    }

    pub(crate) fn set_decode_failure(&self, hook: Option<DecodeFailureHook>) {
        store(&self.decode_failure, hook);
    }

    pub(crate) fn set_session_error(&self, hook: Option<SessionErrorHook>) {
        store(&self.session_error, hook);
    }
}

/// Queues notifications onto the delivery context.
#[derive(Clone)]
pub(crate) struct Notifier {
    hooks: Arc<Hooks>,
    delivery: DeliveryContext,
}

impl Notifier {
    pub(crate) fn new(hooks: Arc<Hooks>, delivery: DeliveryContext) -> Self {
        Self { hooks, delivery }
    }

    pub(crate) fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub(crate) fn delivery(&self) -> &DeliveryContext {
        &self.delivery
    }

    pub(crate) fn found(&self, result: ScanResult) {
        let hooks = self.hooks.clone();
        self.delivery.deliver(move || {
            if let Some(hook) = load(&hooks.found) {
                hook(result);
            }
        });
    }

    pub(crate) fn decode_failure(&self) {
        let hooks = self.hooks.clone();
        self.delivery.deliver(move || {
            if let Some(hook) = load(&hooks.decode_failure) {
                hook();
            }
        });
    }

    pub(crate) fn session_error(&self, err: SessionError) {
        warn!("scanner session degraded: {err}");
        let hooks = self.hooks.clone();
        self.delivery.deliver(move || {
            if let Some(hook) = load(&hooks.session_error) {
                hook(err);
            }
        });
    }
}
