//! Line source reading from the charger's serial port.

use crate::source::{LineHandler, LineSource, RunFlag, SourceError, Worker};
use serialport::SerialPort;
use std::io::{ErrorKind, Read};
use std::time::Duration;

/// Read timeout of the port; bounds how long `stop` takes to be noticed.
pub const READ_TIMEOUT: Duration = Duration::from_millis(200);

const CHUNK_SIZE: usize = 1024;

/// Pending bytes kept while waiting for a newline; beyond that the partial line is dropped.
pub const MAX_PENDING: usize = 64 * 1024;

/// Accumulates raw bytes and cuts them into lines at a newline sequence.
#[derive(Debug, Clone)]
pub struct LineSplitter {
    newline: Vec<u8>,
    buffer: Vec<u8>,
    /// Offset up to which `buffer` is known to hold no newline.
    scanned: usize,
}

impl LineSplitter {
    pub fn new(newline: &[u8]) -> Result<Self, SourceError> {
        if newline.is_empty() {
            return Err(SourceError::EmptyNewline);
        }
        Ok(Self {
            newline: newline.to_vec(),
            buffer: Vec::new(),
            scanned: 0,
        })
    }

    /// Append `chunk` and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer[self.scanned..]
            .windows(self.newline.len())
            .position(|window| window == self.newline.as_slice())
            .map(|pos| pos + self.scanned)
        {
            let rest = self.buffer.split_off(pos + self.newline.len());
            self.buffer.truncate(pos);
            lines.push(decode_dropping_invalid(&self.buffer));
            self.buffer = rest;
            self.scanned = 0;
        }
        if self.buffer.len() > MAX_PENDING {
            log::warn!(
                "Dropping {} bytes received without a line terminator",
                self.buffer.len()
            );
            self.buffer.clear();
        }
        // a newline split across chunks starts at most len - 1 bytes back
        self.scanned = self.buffer.len().saturating_sub(self.newline.len() - 1);
        lines
    }

    /// Bytes received after the last newline.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

/// UTF-8 decode that drops invalid sequences instead of replacing them.
fn decode_dropping_invalid(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// Read from `port` until the flag is cleared or the port fails.
fn pump<R: Read + ?Sized>(port: &mut R, splitter: &mut LineSplitter, flag: &RunFlag, handler: &mut LineHandler) {
    let mut chunk = [0u8; CHUNK_SIZE];
    while flag.is_set() {
        match port.read(&mut chunk) {
            Ok(0) => {}
            Ok(n) => {
                for line in splitter.push(&chunk[..n]) {
                    handler(&line);
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock) => {}
            Err(e) => {
                log::error!("Serial read failed: {e}");
                break;
            }
        }
    }
}

pub struct SerialSource {
    port_name: String,
    baudrate: u32,
    port: Option<Box<dyn SerialPort>>,
    splitter: LineSplitter,
    handler: Option<LineHandler>,
    worker: Worker,
}

impl std::fmt::Debug for SerialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSource")
            .field("port_name", &self.port_name)
            .field("baudrate", &self.baudrate)
            .field("splitter", &self.splitter)
            .finish_non_exhaustive()
    }
}

impl SerialSource {
    /// Open `port_name` right away so a missing device fails here, not on the thread.
    pub fn open(port_name: &str, baudrate: u32, newline: &[u8], handler: LineHandler) -> Result<Self, SourceError> {
        let splitter = LineSplitter::new(newline)?;
        log::debug!("Opening serial port {port_name} at {baudrate} baud");
        let port = serialport::new(port_name, baudrate)
            .timeout(READ_TIMEOUT)
            .open()?;
        Ok(Self {
            port_name: port_name.to_string(),
            baudrate,
            port: Some(port),
            splitter,
            handler: Some(handler),
            worker: Worker::default(),
        })
    }
}

impl LineSource for SerialSource {
    fn start(&mut self) -> Result<(), SourceError> {
        let (Some(mut port), Some(mut handler)) = (self.port.take(), self.handler.take()) else {
            return Err(SourceError::AlreadyStarted);
        };
        let mut splitter = self.splitter.clone();
        let name = self.port_name.clone();
        self.worker.spawn("wtc3-serial", move |flag| {
            pump(port.as_mut(), &mut splitter, &flag, &mut handler);
            // dropping the port closes it
            drop(port);
            log::debug!("Serial reader on {name} finished");
        })
    }

    fn stop(&mut self) {
        self.worker.stop();
        // never started: release the port now
        self.port.take();
    }

    fn join(&mut self, timeout: Duration) -> bool {
        self.worker.join(timeout)
    }

    fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    fn describe(&self) -> String {
        format!(
            "Serial connection active ({} @ {})",
            self.port_name, self.baudrate
        )
    }
}
