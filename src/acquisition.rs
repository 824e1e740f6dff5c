//! Acquisition controller.
//!
//! Ties a line source, the parser, the data bus and the raw log together. The
//! source thread runs the whole per-line pipeline:
//!
//! 1. write the line to the raw log (flushed immediately),
//! 2. feed it to the parser,
//! 3. parsed records go to the [`DataBus`]; a replaced data header resets it,
//! 4. records carrying meta data may retarget the raw log file name.
//!
//! The owning thread only issues control calls and reads the bus. Status and
//! error reports are delivered on an event channel instead of being returned,
//! so a failing data source never takes the controller down.

use crate::config::AcquisitionConfig;
use crate::data_bus::DataBus;
use crate::export::session_stamp;
use crate::file_tail::FileTailSource;
use crate::parameters::{MetaBlock, Value};
use crate::parser::{LineKind, Parser};
use crate::raw_log::{RawLog, RawLogError, Retarget};
use crate::serial_source::SerialSource;
use crate::source::{LineHandler, LineSource, SourceError};
use crate::status::{decode_status, StatusDetail};
use chrono::{DateTime, Local};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How long `stop` waits for the source thread.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Display duration attached to status messages.
pub const STATUS_DURATION: Duration = Duration::from_secs(4);

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Reports for the owner of the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    Status { message: String, duration: Duration },
    Error(String),
    ConfigChanged(AcquisitionConfig),
}

/// Per-session state touched by the source thread. Every start builds a new one.
struct Session {
    parser: Parser,
    raw_log: RawLog,
    /// Cleared on stop; a thread that outlives its session is ignored.
    active: bool,
    events: Sender<AcquisitionEvent>,
}

impl Session {
    fn new(bus: &Arc<DataBus>, started_at: &DateTime<Local>, events: Sender<AcquisitionEvent>) -> Self {
        let mut parser = Parser::new();
        let record_bus = Arc::clone(bus);
        parser.on_record(move |meta, record| record_bus.append(meta, record));
        let header_bus = Arc::clone(bus);
        parser.on_data_header(move |_| header_bus.reset());

        Self {
            parser,
            raw_log: RawLog::new(session_stamp(started_at)),
            active: true,
            events,
        }
    }

    fn report(&self, error: &RawLogError) {
        log::warn!("{error}");
        let _ = self.events.send(AcquisitionEvent::Error(error.to_string()));
    }

    fn handle_line(&mut self, raw: &str) {
        if !self.active {
            log::trace!("Dropping line from a stopped source: {raw:?}");
            return;
        }
        if let Err(e) = self.raw_log.write_line(raw) {
            self.report(&e);
            self.raw_log.close();
        }
        if self.parser.feed_line(raw) == LineKind::Record {
            let meta = self.parser.meta().clone();
            if !meta.is_empty() {
                self.update_export_meta(&meta);
            }
        }
    }

    fn update_export_meta(&mut self, meta: &MetaBlock) {
        match self.raw_log.update_meta(meta) {
            Ok(Retarget::Renamed { to, .. }) => log::debug!("Raw log now at {}", to.display()),
            Ok(Retarget::Unchanged | Retarget::StemOnly) => {}
            Err(e) => self.report(&e),
        }
    }
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct AcquisitionController {
    config: AcquisitionConfig,
    bus: Arc<DataBus>,
    session: Arc<Mutex<Session>>,
    source: Option<Box<dyn LineSource>>,
    started_at: DateTime<Local>,
    events_tx: Sender<AcquisitionEvent>,
    events_rx: Receiver<AcquisitionEvent>,
}

impl std::fmt::Debug for AcquisitionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("config", &self.config)
            .field("started_at", &self.started_at)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl AcquisitionController {
    pub fn new(config: AcquisitionConfig, bus: Arc<DataBus>) -> Self {
        let started_at = Local::now();
        let (events_tx, events_rx) = unbounded();
        let session = Session::new(&bus, &started_at, events_tx.clone());

        Self {
            config,
            bus,
            session: Arc::new(Mutex::new(session)),
            source: None,
            started_at,
            events_tx,
            events_rx,
        }
    }

    /// Controller with a fresh bus sized by `config.max_points`.
    pub fn with_config(config: AcquisitionConfig) -> Self {
        let bus = Arc::new(DataBus::new(config.max_points));
        Self::new(config, bus)
    }

    /// Effective configuration; `persist_path` follows the current raw log.
    pub fn config(&self) -> AcquisitionConfig {
        let mut config = self.config.clone();
        if let Some(path) = self.raw_log_path() {
            config.persist_path = path;
        }
        config
    }

    pub fn bus(&self) -> &Arc<DataBus> {
        &self.bus
    }

    /// Receiver for status, error and config-change reports.
    pub fn events(&self) -> Receiver<AcquisitionEvent> {
        self.events_rx.clone()
    }

    /// Start time of the current session, the base of its file names.
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn is_running(&self) -> bool {
        self.source.as_ref().is_some_and(|source| source.is_running())
    }

    fn emit(&self, event: AcquisitionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn emit_error(&self, message: String) {
        log::error!("{message}");
        self.emit(AcquisitionEvent::Error(message));
    }

    /// Start the configured source. Failures are reported, not returned.
    pub fn start(&mut self) {
        self.stop();
        let config = self.config.clone();
        if let Err(e) = self.start_with_config(config) {
            self.emit_error(e.to_string());
        }
    }

    /// Stop the source thread and close the raw log.
    pub fn stop(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.stop();
            if !source.join(JOIN_TIMEOUT) {
                log::warn!("Source did not stop in time: {}", source.describe());
            }
        }
        let mut session = lock(&self.session);
        session.active = false;
        session.raw_log.close();
    }

    /// Switch to `new_config`, falling back to the previous configuration on failure.
    pub fn apply_config(&mut self, new_config: AcquisitionConfig) -> bool {
        let previous = self.config.clone();
        self.stop();
        match self.start_with_config(new_config) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Applying configuration failed, rolling back: {e}");
                if let Err(rollback) = self.start_with_config(previous.clone()) {
                    log::error!("Rollback failed as well: {rollback}");
                    self.config = previous;
                }
                self.emit_error(e.to_string());
                false
            }
        }
    }

    fn start_with_config(&mut self, config: AcquisitionConfig) -> Result<(), AcquisitionError> {
        self.config = config;
        self.bus.reset();
        self.started_at = Local::now();
        let mut session = Session::new(&self.bus, &self.started_at, self.events_tx.clone());
        if let Err(e) = session.raw_log.configure(self.config.raw_log_target()) {
            session.report(&e);
        }
        self.session = Arc::new(Mutex::new(session));

        let source = match self.build_source() {
            Ok(source) => source,
            Err(e) => {
                lock(&self.session).raw_log.close();
                return Err(e.into());
            }
        };

        match source {
            Some(mut source) => {
                if let Err(e) = source.start() {
                    lock(&self.session).raw_log.close();
                    return Err(e.into());
                }
                let message = source.describe();
                log::info!("{message}");
                self.source = Some(source);
                self.emit(AcquisitionEvent::Status {
                    message,
                    duration: STATUS_DURATION,
                });
            }
            None => self.emit(AcquisitionEvent::Status {
                message: "No data source configured.".to_string(),
                duration: STATUS_DURATION,
            }),
        }
        self.emit(AcquisitionEvent::ConfigChanged(self.config()));
        Ok(())
    }

    fn line_handler(&self) -> LineHandler {
        let session = Arc::clone(&self.session);
        Box::new(move |raw| lock(&session).handle_line(raw))
    }

    /// Sample file beats serial port; neither configured is not an error.
    fn build_source(&self) -> Result<Option<Box<dyn LineSource>>, SourceError> {
        if let Some(sample) = &self.config.sample_file {
            let source = FileTailSource::new(
                sample.clone(),
                self.config.sample_loop,
                self.config.line_delay(),
                self.line_handler(),
            )?;
            return Ok(Some(Box::new(source)));
        }
        let serial = &self.config.serial;
        if serial.enabled && !serial.port.is_empty() {
            let source = SerialSource::open(
                &serial.port,
                serial.baudrate,
                serial.newline.as_bytes(),
                self.line_handler(),
            )?;
            return Ok(Some(Box::new(source)));
        }
        Ok(None)
    }

    pub fn raw_log_path(&self) -> Option<PathBuf> {
        lock(&self.session).raw_log.path().map(PathBuf::from)
    }

    /// Current export stem of the session. With `meta` the stem, and the raw
    /// log file name with it, is updated first.
    pub fn export_stem(&self, meta: Option<&MetaBlock>) -> String {
        let mut session = lock(&self.session);
        if let Some(meta) = meta {
            session.update_export_meta(meta);
        }
        session.raw_log.export_stem()
    }

    /// Decode a status word with the configured extra bit labels.
    pub fn decode_status(&self, value: &Value) -> StatusDetail {
        decode_status(value, Some(&self.config.status_bit_labels()))
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        self.stop();
    }
}
