//! Decoding of the charger status word (parameter `P05`).
//!
//! The status word packs several small enumerations and a handful of flag bits
//! into one integer. Decoding never fails: unknown codes render as
//! `Unbekannt (<code>)` and values that are not integers yield an empty
//! [`StatusDetail`].
//!
//! ```rust
//! use wtc3_logger::status::decode_status_word;
//!
//! let detail = decode_status_word(0, None);
//! assert!(detail.details.contains(&"Batteriespannung: Tiefentladen".to_string()));
//! ```

use crate::parameters::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusDetail {
    pub raw_value: Option<u64>,
    /// Short entries meant for compact display.
    pub badges: Vec<String>,
    pub details: Vec<String>,
}

impl StatusDetail {
    pub fn is_empty(&self) -> bool {
        self.raw_value.is_none()
    }
}

struct Field {
    label: &'static str,
    offset: u32,
    width: u32,
    badge: bool,
    codes: &'static [(u64, &'static str)],
}

impl Field {
    fn extract(&self, word: u64) -> u64 {
        (word >> self.offset) & ((1 << self.width) - 1)
    }

    fn bits(&self) -> std::ops::Range<u32> {
        self.offset..self.offset + self.width
    }

    fn render(&self, code: u64) -> String {
        match self.codes.iter().find(|(c, _)| *c == code) {
            Some((_, text)) => format!("{}: {text}", self.label),
            None => format!("{}: Unbekannt ({code})", self.label),
        }
    }
}

const FIELDS: [Field; 6] = [
    Field {
        label: "Batteriespannung",
        offset: 0,
        width: 3,
        badge: true,
        codes: &[
            (0, "Tiefentladen"),
            (1, "Niedrig"),
            (2, "Normal"),
            (3, "Voll"),
            (4, "Überspannung"),
            (5, "Ladeende"),
        ],
    },
    Field {
        label: "Batterietemperatur",
        offset: 3,
        width: 3,
        badge: true,
        codes: &[
            (0, "Kalt"),
            (1, "Kühl"),
            (2, "Normal"),
            (3, "Warm"),
            (4, "Heiß"),
        ],
    },
    Field {
        label: "Innenwiderstand",
        offset: 6,
        width: 2,
        badge: false,
        codes: &[
            (0, "Niedrig"),
            (1, "Normal"),
            (2, "Hoch"),
            (3, "Nicht verwendet"),
        ],
    },
    Field {
        label: "Versorgung",
        offset: 8,
        width: 2,
        badge: true,
        codes: &[(0, "Tief"), (1, "Niedrig"), (2, "Normal"), (3, "Hoch")],
    },
    Field {
        label: "Ladestrom",
        offset: 11,
        width: 3,
        badge: true,
        codes: &[
            (0, "Aus"),
            (1, "10%"),
            (2, "20%"),
            (3, "50%"),
            (4, "100%"),
            (7, "Nicht verwendet"),
        ],
    },
    Field {
        label: "Fehler",
        offset: 19,
        width: 3,
        badge: true,
        codes: &[
            (0, "Keine Fehler"),
            (1, "Geringe Kapazität"),
            (2, "Hohe Kapazität"),
            (3, "Temperaturdurchgang"),
            (4, "Hoher Widerstand"),
        ],
    },
];

const PERIPHERAL_BITS: [(u32, &str); 5] = [
    (14, "Eingang aktiviert"),
    (15, "Ausgang aktiviert"),
    (16, "Regler aktiv"),
    (17, "Referenz aktiv"),
    (18, "Sleep aktiv"),
];

const NICKEL_EOC_BITS: [(u32, &str); 4] = [
    (22, "ΔV Drop erreicht"),
    (23, "ΔT Anstieg"),
    (24, "Max. Spannungsabfall"),
    (25, "Hohe Temperatur"),
];

fn is_set(word: u64, bit: u32) -> bool {
    bit < u64::BITS && word & (1 << bit) != 0
}

fn handled_bit(bit: u32) -> bool {
    FIELDS.iter().any(|f| f.bits().contains(&bit))
        || PERIPHERAL_BITS.iter().any(|(b, _)| *b == bit)
        || NICKEL_EOC_BITS.iter().any(|(b, _)| *b == bit)
}

/// Coerce a telemetry value into a status word.
///
/// Floats are truncated, text must hold a plain integer. Negative values are
/// rejected.
pub fn status_word(value: &Value) -> Option<u64> {
    match value {
        Value::Int(v) => u64::try_from(*v).ok(),
        Value::Float(v) if v.is_finite() && *v > -1.0 => Some(v.trunc() as u64),
        Value::Float(_) => None,
        Value::Text(s) => s.trim().parse::<u64>().ok(),
    }
}

/// Decode a status value as it appears in a [`TelemetryRecord`](crate::TelemetryRecord).
pub fn decode_status(value: &Value, extra_bits: Option<&BTreeMap<u32, String>>) -> StatusDetail {
    status_word(value).map_or_else(StatusDetail::default, |word| {
        decode_status_word(word, extra_bits)
    })
}

pub fn decode_status_word(word: u64, extra_bits: Option<&BTreeMap<u32, String>>) -> StatusDetail {
    let mut badges = Vec::new();
    let mut details = Vec::new();

    for field in &FIELDS {
        let entry = field.render(field.extract(word));
        if field.badge {
            badges.push(entry.clone());
        }
        details.push(entry);
    }

    for (bit, text) in PERIPHERAL_BITS {
        if is_set(word, bit) {
            details.push(format!("Peripherie: {text}"));
        }
    }
    for (bit, text) in NICKEL_EOC_BITS {
        if is_set(word, bit) {
            details.push(format!("NiCd EoC: {text}"));
        }
    }

    if let Some(extra) = extra_bits {
        details.extend(
            extra
                .iter()
                .filter(|(bit, _)| !handled_bit(**bit) && is_set(word, **bit))
                .map(|(_, label)| label.clone()),
        );
    }

    StatusDetail {
        raw_value: Some(word),
        badges,
        details,
    }
}

/// Display label for a charging strategy code.
pub fn label_strategy<'a>(code: Option<&str>, labels: &'a BTreeMap<String, String>) -> Option<&'a str> {
    let code = code.filter(|c| !c.is_empty())?;
    labels.get(code).map(String::as_str)
}
