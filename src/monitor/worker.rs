//! Thread primitives shared by the monitor: a broadcast shutdown signal,
//! periodic workers, and bounded joins.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Set-once stop flag that wakes every waiter.
///
/// Waiters block on a channel nobody sends on; `trigger` drops the only
/// sender, which disconnects the channel for all receivers at once.
#[derive(Clone)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`. Returns `true` if shutdown was triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        match self.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_triggered(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

/// A named task run on its own thread at a fixed cadence.
///
/// The next run is scheduled from the start of the previous one. A task may
/// return a different period for the following run.
pub struct PeriodicWorker {
    name: String,
    stop: ShutdownSignal,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicWorker {
    pub fn spawn<F>(name: impl Into<String>, period: Duration, mut task: F) -> std::io::Result<Self>
    where
        F: FnMut() -> Option<Duration> + Send + 'static,
    {
        let name = name.into();
        let stop = ShutdownSignal::new();
        let thread_stop = stop.clone();
        let thread_name = name.clone();

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                tracing::debug!("Worker '{}' started", thread_name);
                while !thread_stop.is_triggered() {
                    let started = Instant::now();
                    let next = task().unwrap_or(period);
                    let remaining = (started + next).saturating_duration_since(Instant::now());
                    if thread_stop.wait_timeout(remaining) {
                        break;
                    }
                }
                tracing::debug!("Worker '{}' stopped", thread_name);
            })?;

        Ok(Self {
            name,
            stop,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop(&self) {
        self.stop.trigger();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_triggered()
    }

    /// The thread exited, either stopped or after a panic.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Died without being asked to stop.
    pub fn is_dead(&self) -> bool {
        self.is_finished() && !self.is_stopped()
    }

    /// Stop and wait up to `timeout` for the thread to exit.
    pub fn join(mut self, timeout: Duration) -> bool {
        self.stop();
        match self.handle.take() {
            Some(handle) => join_with_timeout(handle, &self.name, timeout),
            None => true,
        }
    }
}

/// Join `handle` if it exits within `timeout`; otherwise log and detach it.
pub fn join_with_timeout(handle: JoinHandle<()>, name: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!("Thread '{}' did not stop within {:?}, detaching", name, timeout);
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        tracing::error!("Thread '{}' panicked", name);
    }
    true
}
