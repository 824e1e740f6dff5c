//! Background line sources.
//!
//! A source owns one thread that produces text lines and hands each one to a
//! caller-supplied handler. Sources are started once, stopped cooperatively
//! and joined with a bound: a thread that does not finish in time is
//! abandoned instead of blocking the caller.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Receives every line produced by a source, on the source thread.
pub type LineHandler = Box<dyn FnMut(&str) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Sample file not found: {}", path.display())]
    SampleFileMissing { path: PathBuf },

    #[error("Serial connection failed: {0}")]
    SerialOpen(#[from] serialport::Error),

    #[error("Newline sequence must not be empty")]
    EmptyNewline,

    #[error("Source already started")]
    AlreadyStarted,

    #[error("Failed to spawn source thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Common lifecycle of the serial and file sources.
pub trait LineSource: Send {
    fn start(&mut self) -> Result<(), SourceError>;

    /// Ask the thread to finish; returns immediately.
    fn stop(&mut self);

    /// Wait up to `timeout` for the thread. `false` means it was abandoned.
    fn join(&mut self, timeout: Duration) -> bool;

    fn is_running(&self) -> bool;

    /// Human readable description for status messages.
    fn describe(&self) -> String;
}

/// Run flag shared between a source and its thread.
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Sleep for `duration` or until the flag is cleared. Returns the flag.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while self.is_set() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
        self.is_set()
    }
}

/// Thread bookkeeping shared by all sources.
#[derive(Debug, Default)]
pub(crate) struct Worker {
    flag: Option<RunFlag>,
    handle: Option<JoinHandle<()>>,
    done: Option<Receiver<()>>,
}

impl Worker {
    pub(crate) fn spawn<F>(&mut self, name: &str, body: F) -> Result<(), SourceError>
    where
        F: FnOnce(RunFlag) + Send + 'static,
    {
        if self.handle.is_some() {
            return Err(SourceError::AlreadyStarted);
        }
        let flag = RunFlag::new();
        let thread_flag = flag.clone();
        let (done_tx, done_rx) = bounded(1);
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            body(thread_flag);
            let _ = done_tx.send(());
        })?;
        log::debug!("Started source thread {name}");
        self.flag = Some(flag);
        self.handle = Some(handle);
        self.done = Some(done_rx);
        Ok(())
    }

    pub(crate) fn stop(&self) {
        if let Some(flag) = &self.flag {
            flag.clear();
        }
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }

    pub(crate) fn join(&mut self, timeout: Duration) -> bool {
        let Some(done) = self.done.take() else {
            return true;
        };
        match done.recv_timeout(timeout) {
            // Disconnected means the body panicked before signalling.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        log::error!("Source thread panicked");
                    }
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Source thread did not stop within {timeout:?}, abandoning it");
                self.handle.take();
                false
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
