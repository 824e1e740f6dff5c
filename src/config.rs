//! Acquisition configuration.
//!
//! Loaded from TOML; every field has a default so partial files work:
//!
//! ```toml
//! sample_file = "demos/sample.txt"
//! persist_raw = true
//! persist_path = "logs"
//!
//! [serial]
//! port = "/dev/ttyUSB0"
//! baudrate = 115200
//! enabled = true
//!
//! [status_bits]
//! 26 = "Lüfter aktiv"
//!
//! [strategy_labels]
//! CC_CV = "Konstantstrom / Konstantspannung"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BAUDRATE: u32 = 115_200;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
    /// Line terminator used by the charger.
    pub newline: String,
    pub enabled: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baudrate: DEFAULT_BAUDRATE,
            newline: "\n".to_string(),
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub serial: SerialConfig,
    /// Replay this file instead of reading the serial port.
    pub sample_file: Option<PathBuf>,
    pub sample_loop: bool,
    pub line_delay_ms: u64,
    /// Write every received line to a raw log.
    pub persist_raw: bool,
    /// Directory for generated log names, or a concrete file that is never renamed.
    pub persist_path: PathBuf,
    /// Capacity of the data bus.
    pub max_points: usize,
    /// Extra status word bits, keyed by bit index.
    pub status_bits: BTreeMap<String, String>,
    pub strategy_labels: BTreeMap<String, String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            sample_file: None,
            sample_loop: true,
            line_delay_ms: 50,
            persist_raw: false,
            persist_path: PathBuf::from("logs"),
            max_points: crate::data_bus::DEFAULT_MAXLEN,
            status_bits: BTreeMap::new(),
            strategy_labels: BTreeMap::new(),
        }
    }
}

impl AcquisitionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn line_delay(&self) -> Duration {
        Duration::from_millis(self.line_delay_ms)
    }

    /// Raw log target when persistence is enabled.
    pub fn raw_log_target(&self) -> Option<&Path> {
        self.persist_raw.then_some(self.persist_path.as_path())
    }

    /// Status bit labels with numeric keys. Keys that are not bit indices are skipped.
    pub fn status_bit_labels(&self) -> BTreeMap<u32, String> {
        self.status_bits
            .iter()
            .filter_map(|(key, label)| match key.trim().parse::<u32>() {
                Ok(bit) if bit < u64::BITS => Some((bit, label.clone())),
                _ => {
                    log::warn!("Ignoring status bit label with invalid key {key:?}");
                    None
                }
            })
            .collect()
    }

    pub fn strategy_label(&self, code: Option<&str>) -> Option<&str> {
        crate::status::label_strategy(code, &self.strategy_labels)
    }
}
