//! Background thread that periodically runs a task until stopped.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

struct Signal {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

/// Runs a task every `interval` on a named thread.
///
/// Dropping the worker stops and joins the thread. A stop request wakes the
/// thread immediately instead of waiting for the interval to pass.
pub struct PurgeWorker {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl PurgeWorker {
    /// Spawn the worker thread.
    pub fn spawn<F>(name: &str, interval: Duration, task: F) -> io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let signal = Arc::new(Signal {
            stopped: Mutex::new(false),
            wakeup: Condvar::new(),
        });

        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut stopped = thread_signal.stopped.lock();
            while !*stopped {
                let timed_out = thread_signal.wakeup.wait_for(&mut stopped, interval).timed_out();
                if *stopped {
                    break;
                }
                if timed_out {
                    // Run the task without holding the signal lock.
                    MutexGuard::unlocked(&mut stopped, || task());
                }
            }
        })?;

        debug!(worker = name, ?interval, "started background worker");
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        *self.signal.stopped.lock() = true;
        self.signal.wakeup.notify_all();
        if handle.join().is_err() {
            debug!("background worker panicked");
        }
    }
}

impl Drop for PurgeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_worker_runs_periodically() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut worker = PurgeWorker::spawn("test-worker", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        let start = Instant::now();
        while runs.load(Ordering::Relaxed) < 3 && start.elapsed() < Duration::from_secs(10) {
            thread::sleep(Duration::from_millis(5));
        }
        worker.stop();

        assert!(runs.load(Ordering::Relaxed) >= 3);
        assert!(worker.handle.is_none());
    }

    #[test]
    fn test_stop_does_not_wait_for_interval() {
        let mut worker = PurgeWorker::spawn("test-worker", Duration::from_secs(3600), || {}).unwrap();
        let start = Instant::now();
        worker.stop();
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
