//! Parameter registry for the WTC3 telemetry protocol.
//!
//! Every value in the stream is addressed by a short parameter code such as
//! `P40`. The registry maps the known codes to a description, a unit and an
//! optional scale factor that converts the raw integer into engineering units
//! (e.g. millivolts to volts).

use std::collections::BTreeMap;
use std::fmt;

/// A single decoded token: integer, float or passthrough text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value, `None` for text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Text(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// One-shot header fields of a session, values kept verbatim.
pub type MetaBlock = BTreeMap<String, String>;

/// One parsed data line.
pub type TelemetryRecord = BTreeMap<String, Value>;

/// Static description of a parameter code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterInfo {
    pub key: &'static str,
    pub description: &'static str,
    pub unit: Option<&'static str>,
    pub scale: Option<f64>,
}

impl ParameterInfo {
    const fn new(
        key: &'static str,
        description: &'static str,
        unit: Option<&'static str>,
        scale: Option<f64>,
    ) -> Self {
        Self {
            key,
            description,
            unit,
            scale,
        }
    }

    /// Cast a raw token, applying the scale factor to numeric results.
    pub fn cast(&self, raw: &str) -> Value {
        match (cast_default(raw), self.scale) {
            (Value::Int(v), Some(scale)) => Value::Float(v as f64 * scale),
            (Value::Float(v), Some(scale)) => Value::Float(v * scale),
            (value, _) => value,
        }
    }
}

/// Cast a token without any scaling.
///
/// Tokens carrying a decimal point or an exponent marker become floats, all
/// other tokens are tried as integers. Anything unparseable is passed through.
pub fn cast_default(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Text(String::new());
    }
    let floaty = raw.contains('.') || raw.contains(['e', 'E']);
    let parsed = if floaty {
        raw.parse::<f64>().ok().map(Value::Float)
    } else {
        raw.parse::<i64>().ok().map(Value::Int)
    };
    parsed.unwrap_or_else(|| Value::Text(raw.to_string()))
}

/// Cast a token for `key`, using the registry entry when the code is known.
pub fn cast_for(key: &str, raw: &str) -> Value {
    lookup(key).map_or_else(|| cast_default(raw), |info| info.cast(raw))
}

/// Whether a token parses as a float. Used by the line classifier.
pub fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.parse::<f64>().is_ok()
}

pub fn lookup(key: &str) -> Option<&'static ParameterInfo> {
    PARAMETERS.iter().find(|info| info.key == key)
}

/// Position of `key` in the registry, used to order tabular exports.
pub fn registry_index(key: &str) -> Option<usize> {
    PARAMETERS.iter().position(|info| info.key == key)
}

const V: Option<&str> = Some("V");
const A: Option<&str> = Some("A");
const DEG_C: Option<&str> = Some("°C");
const MILLI: Option<f64> = Some(0.001);
const DECI: Option<f64> = Some(0.1);

/// Battery name field of the meta block.
pub const BATTERY_NAME: &str = "P70";
/// Cradle identifier field of the meta block.
pub const CRADLE: &str = "P07";
/// Charging strategy field of the meta block.
pub const STRATEGY: &str = "P04";
/// Status word field of the data block.
pub const STATUS_WORD: &str = "P05";

pub static PARAMETERS: [ParameterInfo; 38] = [
    ParameterInfo::new("P04", "Ladestrategie", None, None),
    ParameterInfo::new("P05", "Status", None, None),
    ParameterInfo::new("P06", "Laufzeit", Some("s"), None),
    ParameterInfo::new("P07", "Halterung", None, None),
    ParameterInfo::new("P08", "Lademodul", None, None),
    ParameterInfo::new("P40", "Eingangsspannung", V, MILLI),
    ParameterInfo::new("P41", "Controllerspannung", V, MILLI),
    ParameterInfo::new("P42", "Ausgangsspannung", V, MILLI),
    ParameterInfo::new("P43", "Stellspannung", V, MILLI),
    ParameterInfo::new("P44", "Sollspannung", V, MILLI),
    ParameterInfo::new("P45", "Batteriespannung", V, MILLI),
    ParameterInfo::new("P46", "Fuelgauge Batteriespannung", V, MILLI),
    ParameterInfo::new("P50", "Eingangsstrom", A, MILLI),
    ParameterInfo::new("P51", "Controllerstrom", A, MILLI),
    ParameterInfo::new("P52", "Ausgangsstrom", A, MILLI),
    ParameterInfo::new("P53", "Stellstrom", A, MILLI),
    ParameterInfo::new("P54", "Sollstrom", A, MILLI),
    ParameterInfo::new("P55", "Batteriestrom", A, MILLI),
    ParameterInfo::new("P56", "Fuelgauge Ladestrom", A, MILLI),
    ParameterInfo::new("P57", "Stellstrom DAC", Some("count"), None),
    ParameterInfo::new("P60", "Systemtemperatur", DEG_C, DECI),
    ParameterInfo::new("P61", "Batterietemperatur", DEG_C, DECI),
    ParameterInfo::new("P62", "Fuelgauge Temperatur", DEG_C, DECI),
    ParameterInfo::new("P70", "Batteriename", None, None),
    ParameterInfo::new("P71", "Chemie", None, None),
    ParameterInfo::new("P72", "Schlussspannung", V, MILLI),
    ParameterInfo::new("P73", "Kalte Temperatur", DEG_C, DECI),
    ParameterInfo::new("P74", "Kühle Temperatur", DEG_C, DECI),
    ParameterInfo::new("P75", "Warme Temperatur", DEG_C, DECI),
    ParameterInfo::new("P76", "Heiße Temperatur", DEG_C, DECI),
    ParameterInfo::new("P77", "Typ. Kapazität", Some("mAh"), None),
    ParameterInfo::new("P78", "Max. Ladestrom", A, MILLI),
    ParameterInfo::new("P79", "Thermistor Beta", None, None),
    ParameterInfo::new("P80", "Thermistor Widerstand", Some("Ω"), None),
    ParameterInfo::new("P81", "Batterie Spannungsfeedback", Some("Ω"), None),
    ParameterInfo::new("P90", "Eingangsspannung Min", V, MILLI),
    ParameterInfo::new("P91", "Eingangsspannung Reduziert", V, MILLI),
    ParameterInfo::new("P92", "Eingangsspannung Max", V, MILLI),
];
