//! Background cleanup worker
//!
//! Runs [`State::cleanup`] on a fixed interval in a background thread. Any
//! number of workers may run against the same model; the queue tolerates
//! concurrent passes.
//!
//! # Design Notes
//!
//! - Failed passes are logged and retried on the next tick; the worker never
//!   exits on error
//! - Graceful shutdown via atomic flag, checked at least every 100ms

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::state::State;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Background cleanup task
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use fleetstate_engine::{CleanupWorker, State};
/// use fleetstate_storage::MemoryStore;
///
/// let st = State::new(Arc::new(MemoryStore::new()));
/// let worker = CleanupWorker::from_config(st);
/// let handle = worker.start();
///
/// // ... destroy things ...
///
/// worker.shutdown();
/// handle.join().unwrap();
/// ```
pub struct CleanupWorker {
    st: State,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl CleanupWorker {
    /// Create a worker running a pass every `interval`
    ///
    /// Intervals shorter than one millisecond are raised to one millisecond.
    pub fn new(st: State, interval: Duration) -> Self {
        Self {
            st,
            interval: interval.max(MIN_INTERVAL),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a worker using the state's configured interval
    pub fn from_config(st: State) -> Self {
        let interval = st.config().cleanup_interval();
        Self::new(st, interval)
    }

    /// Start the background thread
    ///
    /// The thread runs until `shutdown()` is called.
    pub fn start(&self) -> JoinHandle<()> {
        let st = self.st.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        info!(target: "fleet::cleanup", model = %st.model_uuid(), ?interval, "cleanup worker started");
        thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                // Sleep first, in slices, so shutdown is noticed promptly
                let slice = Duration::from_millis(100).min(interval);
                let mut elapsed = Duration::ZERO;
                while elapsed < interval {
                    if shutdown.load(Ordering::Relaxed) {
                        debug!(target: "fleet::cleanup", "cleanup worker stopping");
                        return;
                    }
                    thread::sleep(slice);
                    elapsed += slice;
                }

                if let Err(e) = st.cleanup() {
                    error!(target: "fleet::cleanup", error = %e, "cleanup pass failed");
                }
            }
        })
    }

    /// Signal shutdown
    ///
    /// The background thread exits before its next pass.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown has been signaled
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}
