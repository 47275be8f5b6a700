//! Single-worker FIFO task queues.
//!
//! Each queue owns one named thread that runs submitted jobs strictly in submission
//! order. Submission never blocks. The session-control, analysis and delivery contexts
//! are all built on this.

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
    thread,
};

use crossbeam_channel::{Sender, bounded, unbounded};
use tracing::error;

use crate::telemetry;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct SerialQueue {
    tx: Option<Arc<Sender<Job>>>,
    worker: Option<thread::JoinHandle<()>>,
}

/// Submits to a [`SerialQueue`] without keeping it alive. Dropping the last handle never
/// waits on the worker, so it is safe to hold from threads the queue's jobs join.
#[derive(Clone)]
pub(crate) struct QueueHandle {
    tx: Weak<Sender<Job>>,
}

impl QueueHandle {
    /// Enqueue `job`; returns `false` once the queue has shut down.
    pub(crate) fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.tx.upgrade() {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        }
    }
}

impl SerialQueue {
    pub fn new(label: &'static str) -> io::Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let worker = telemetry::spawn_thread(label, move || {
            for job in rx {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!(queue = label, "queued task panicked");
                }
            }
        })?;
        Ok(Self {
            tx: Some(Arc::new(tx)),
            worker: Some(worker),
        })
    }

    /// Enqueue `job`; returns `false` once the queue has shut down.
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.tx.as_ref() {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    pub(crate) fn handle(&self) -> QueueHandle {
        QueueHandle {
            tx: self.tx.as_ref().map(Arc::downgrade).unwrap_or_default(),
        }
    }

    /// Run `job` on the queue and wait for its result. Runs inline when called from the
    /// queue's own thread.
    pub fn sync<F, T>(&self, job: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return Some(job());
        }
        let (done_tx, done_rx) = bounded(1);
        if !self.dispatch(move || {
            let _ = done_tx.send(job());
        }) {
            return None;
        }
        done_rx.recv().ok()
    }

    /// Whether the caller is running on this queue's worker thread.
    pub fn is_current(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| w.thread().id() == thread::current().id())
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

/// The single context consumer callbacks run on. Cheap to clone.
#[derive(Clone)]
pub struct DeliveryContext {
    queue: Arc<SerialQueue>,
}

impl DeliveryContext {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            queue: Arc::new(SerialQueue::new("codescan-delivery")?),
        })
    }

    pub fn deliver<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.dispatch(job)
    }

    /// Block until everything delivered so far has run.
    pub fn flush(&self) {
        let _ = self.queue.sync(|| ());
    }

    pub fn is_current(&self) -> bool {
        self.queue.is_current()
    }
}
