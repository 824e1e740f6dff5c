//! # WTC3 Logger
//!
//! Telemetry acquisition core for WTC3 battery chargers.
//!
//! The charger prints whitespace separated tables over its serial port: a meta
//! header naming the session parameters (strategy, cradle, battery), one line of
//! meta values, then a data header followed by one line of values per sample.
//! This crate turns that stream into typed records and keeps a bounded history
//! of them for consumers.
//!
//! ## Features
//!
//! - **Line sources**: live serial port via `serialport`, or replay of a recorded sample file
//! - **Header-driven parsing**: tokens are cast per parameter, `P45` from millivolts to volts
//! - **Data bus**: bounded, thread-safe record history with change listeners
//! - **Status decoding**: the packed status word `P05` rendered as readable badges and details
//! - **Raw logging**: every received line persisted, file named after battery and cradle
//! - **DataFrame output**: records exported through `polars`
//!
//! ## Examples
//!
//! ### Parsing lines
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use wtc3_logger::{Parser, Value};
//!
//! let records = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&records);
//! let mut parser = Parser::new();
//! parser.on_record(move |_meta, record| sink.lock().unwrap().push(record.clone()));
//! parser.feed([
//!     "P04 P07 P70",
//!     "CC_CV WTC3206 PMNN4809A",
//!     "P04 P10 P11 P12",
//!     "CC_CV 8100 250 0",
//! ]);
//!
//! assert_eq!(parser.meta()["P07"], "WTC3206");
//! let records = records.lock().unwrap();
//! assert_eq!(records[0]["P04"], Value::Text("CC_CV".to_string()));
//! ```
//!
//! ### Acquisition from a sample file
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wtc3_logger::{AcquisitionConfig, AcquisitionController, DataBus};
//!
//! let config = AcquisitionConfig {
//!     sample_file: Some("demos/sample.txt".into()),
//!     persist_raw: true,
//!     ..AcquisitionConfig::default()
//! };
//! let bus = Arc::new(DataBus::new(config.max_points));
//! let mut controller = AcquisitionController::new(config, Arc::clone(&bus));
//! controller.start();
//!
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! if let Some(record) = bus.latest() {
//!     println!("Latest record: {record:?}");
//! }
//! controller.stop();
//! println!("Raw log at {:?}", controller.raw_log_path());
//! ```
//!
//! ### Status word
//!
//! ```rust
//! use wtc3_logger::{decode_status, Value};
//!
//! let detail = decode_status(&Value::Int(0b010_010), None);
//! assert_eq!(detail.badges[0], "Batteriespannung: Normal");
//! assert_eq!(detail.badges[1], "Batterietemperatur: Normal");
//! ```

pub mod acquisition;
pub mod config;
pub mod data_bus;
pub mod export;
pub mod file_tail;
pub mod frame;
pub mod parameters;
pub mod parser;
pub mod raw_log;
pub mod serial_source;
pub mod source;
pub mod status;

// Re-export the main types for convenience
pub use acquisition::{AcquisitionController, AcquisitionError, AcquisitionEvent};

pub use config::{AcquisitionConfig, ConfigError, SerialConfig};

pub use data_bus::{DataBus, ListenerId};

pub use parameters::{MetaBlock, ParameterInfo, TelemetryRecord, Value};

pub use parser::{LineKind, Parser, Phase};

pub use raw_log::{RawLog, RawLogError};

pub use source::{LineHandler, LineSource, SourceError};

pub use file_tail::FileTailSource;

pub use serial_source::SerialSource;

pub use status::{decode_status, StatusDetail};
