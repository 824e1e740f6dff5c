//! File name stems derived from session metadata.

use crate::parameters::{MetaBlock, BATTERY_NAME, CRADLE};
use chrono::{DateTime, TimeZone};
use unicode_normalization::UnicodeNormalization;

pub const SESSION_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn session_stamp<Tz: TimeZone>(started: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    started.format(SESSION_STAMP_FORMAT).to_string()
}

/// Reduce a free-form token to `[A-Za-z0-9-]`.
///
/// Diacritics are decomposed and dropped, other non-ASCII characters vanish,
/// every run of remaining non-alphanumeric characters becomes a single `-`.
pub fn sanitize_token(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.nfkd().filter(char::is_ascii) {
        if c.is_ascii_alphanumeric() {
            cleaned.push(c);
        } else if !cleaned.ends_with('-') {
            cleaned.push('-');
        }
    }
    cleaned.trim_matches(|c| c == '-' || c == '_').to_string()
}

/// `<timestamp>[_<battery>][_<cradle>]`, or `<timestamp>_raw` without either.
pub fn build_export_stem(stamp: &str, meta: &MetaBlock) -> String {
    let mut parts = vec![stamp.to_string()];
    parts.extend(
        [BATTERY_NAME, CRADLE]
            .iter()
            .filter_map(|key| meta.get(*key))
            .map(|value| sanitize_token(value))
            .filter(|token| !token.is_empty()),
    );
    if parts.len() == 1 {
        parts.push("raw".to_string());
    }
    parts.join("_")
}
