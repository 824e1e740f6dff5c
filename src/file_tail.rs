//! Replays a recorded stream from a file, line by line.
//!
//! Used in place of the serial port for demos and tests. Lines are emitted
//! with a fixed delay to mimic the pace of a live charger and the file can be
//! replayed in a loop until the source is stopped.

use crate::source::{LineHandler, LineSource, RunFlag, SourceError, Worker};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LINE_DELAY: Duration = Duration::from_millis(50);

pub struct FileTailSource {
    path: PathBuf,
    looping: bool,
    delay: Duration,
    handler: Option<LineHandler>,
    worker: Worker,
}

impl std::fmt::Debug for FileTailSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTailSource")
            .field("path", &self.path)
            .field("looping", &self.looping)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl FileTailSource {
    /// Fails if `path` does not point to an existing file.
    pub fn new(
        path: impl Into<PathBuf>,
        looping: bool,
        delay: Duration,
        handler: LineHandler,
    ) -> Result<Self, SourceError> {
        let path = path.into();
        if !path.is_file() {
            return Err(SourceError::SampleFileMissing { path });
        }
        Ok(Self {
            path,
            looping,
            delay,
            handler: Some(handler),
            worker: Worker::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One pass over the file. Returns the number of emitted lines.
fn replay_once(path: &Path, delay: Duration, flag: &RunFlag, handler: &mut LineHandler) -> std::io::Result<usize> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    let mut emitted = 0;
    while flag.is_set() {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        // only the newline goes, a CR stays for the raw log
        handler(line.strip_suffix('\n').unwrap_or(&line));
        emitted += 1;
        flag.sleep(delay);
    }
    Ok(emitted)
}

impl LineSource for FileTailSource {
    fn start(&mut self) -> Result<(), SourceError> {
        let Some(mut handler) = self.handler.take() else {
            return Err(SourceError::AlreadyStarted);
        };
        let path = self.path.clone();
        let looping = self.looping;
        let delay = self.delay;
        self.worker.spawn("wtc3-file-tail", move |flag| {
            while flag.is_set() {
                match replay_once(&path, delay, &flag, &mut handler) {
                    Ok(0) if looping => {
                        // empty file, avoid spinning
                        flag.sleep(delay.max(Duration::from_millis(10)));
                    }
                    Ok(n) => log::trace!("Replayed {n} lines from {}", path.display()),
                    Err(e) => {
                        log::error!("Reading {} failed: {e}", path.display());
                        break;
                    }
                }
                if !looping {
                    break;
                }
            }
            log::debug!("File tail for {} finished", path.display());
        })
    }

    fn stop(&mut self) {
        self.worker.stop();
    }

    fn join(&mut self, timeout: Duration) -> bool {
        self.worker.join(timeout)
    }

    fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    fn describe(&self) -> String {
        let name = self
            .path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned());
        format!("Streaming from sample file: {name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn collecting_handler() -> (LineHandler, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let handler: LineHandler = Box::new(move |line| sink.lock().unwrap().push(line.to_string()));
        (handler, lines)
    }

    fn wait_for(lines: &Mutex<Vec<String>>, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while lines.lock().unwrap().len() < count && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let (handler, _) = collecting_handler();
        let err = FileTailSource::new("/nonexistent/sample.txt", false, DEFAULT_LINE_DELAY, handler).unwrap_err();
        assert!(matches!(err, SourceError::SampleFileMissing { .. }));
        assert!(err.to_string().contains("/nonexistent/sample.txt"));
    }

    #[test]
    fn test_emits_each_line_once_without_loop() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"P04 P07\r\nCC_CV WTC3206\nlast").unwrap();
        let (handler, lines) = collecting_handler();
        let mut source = FileTailSource::new(file.path(), false, Duration::from_millis(1), handler).unwrap();
        source.start().unwrap();
        assert!(source.join(Duration::from_secs(5)));
        assert_eq!(*lines.lock().unwrap(), ["P04 P07\r", "CC_CV WTC3206", "last"]);
    }

    #[test]
    fn test_loops_until_stopped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"a\nb\n").unwrap();
        let (handler, lines) = collecting_handler();
        let mut source = FileTailSource::new(file.path(), true, Duration::from_millis(1), handler).unwrap();
        source.start().unwrap();
        wait_for(&lines, 5);
        source.stop();
        assert!(source.join(Duration::from_secs(5)));
        let lines = lines.lock().unwrap();
        assert!(lines.len() >= 5);
        assert_eq!(lines[..4], ["a", "b", "a", "b"]);
    }

    #[test]
    fn test_stop_interrupts_long_delay() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"a\nb\n").unwrap();
        let (handler, lines) = collecting_handler();
        let mut source = FileTailSource::new(file.path(), true, Duration::from_secs(60), handler).unwrap();
        source.start().unwrap();
        wait_for(&lines, 1);
        let started = Instant::now();
        source.stop();
        assert!(source.join(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(*lines.lock().unwrap(), ["a"]);
    }

    #[test]
    fn test_second_start_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let (handler, _) = collecting_handler();
        let mut source = FileTailSource::new(file.path(), false, Duration::from_millis(1), handler).unwrap();
        source.start().unwrap();
        assert!(matches!(source.start(), Err(SourceError::AlreadyStarted)));
        assert!(source.join(Duration::from_secs(5)));
        assert!(source.describe().starts_with("Streaming from sample file: "));
    }
}
