// SPDX-License-Identifier: GPL-3.0-only

//! Thread lifecycle management for driver pump loops
//!
//! Both generation backends run loops on dedicated threads: Generation 1
//! pumps a blocking driver into the frame sink, the virtual device paces
//! synthetic callbacks. This gives those loops one consistent start/stop
//! lifecycle with a stop signal and a joinable handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Action returned by the loop body to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Run another iteration
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a pump loop running in a separate thread
pub struct LoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl LoopController {
    /// Start a loop thread. The body is called repeatedly until it returns
    /// [`LoopAction::Stop`] or [`LoopController::stop`] is called.
    pub fn start<F>(name: &str, mut body: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_in_thread = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        debug!(name = %name, "Starting pump loop");

        let thread_handle = thread::spawn(move || {
            loop {
                if stop_in_thread.load(Ordering::SeqCst) {
                    break;
                }
                match body() {
                    LoopAction::Continue => {}
                    LoopAction::Stop => break,
                }
            }
            debug!(name = %thread_name, "Pump loop exiting");
        });

        Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop signal clone for use inside long-running loop bodies
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    /// Set the stop signal without waiting for the thread
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread without sending a stop signal. Useful when the
    /// loop stops itself via [`LoopAction::Stop`].
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take()
            && handle.join().is_err()
        {
            warn!(name = %self.name, "Pump loop thread panicked");
        }
    }
}

impl Drop for LoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn test_loop_stops_itself() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_in_loop = Arc::clone(&counter);

        let mut controller = LoopController::start("test-loop", move || {
            if counter_in_loop.fetch_add(1, Ordering::SeqCst) >= 4 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        });

        controller.join();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_stop_signal_interrupts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_in_loop = Arc::clone(&counter);

        let mut controller = LoopController::start("test-loop", move || {
            counter_in_loop.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            LoopAction::Continue
        });

        thread::sleep(Duration::from_millis(25));
        controller.stop();
        assert!(counter.load(Ordering::SeqCst) > 0);
        assert!(!controller.is_running());
    }
}
