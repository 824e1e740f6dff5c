//! Tabular view of parsed records.
//!
//! Records become a polars [`DataFrame`] with one column per parameter key.
//! Known codes come first in registry order, unknown codes follow sorted by
//! name. A column is `Float64` when every present value is numeric, otherwise
//! all its values are rendered as strings.

use crate::parameters::{registry_index, TelemetryRecord, Value};
use polars::prelude::*;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;

fn column_order(records: &[TelemetryRecord]) -> Vec<&str> {
    let keys: BTreeSet<&str> = records
        .iter()
        .flat_map(|record| record.keys().map(String::as_str))
        .collect();
    let mut keys: Vec<&str> = keys.into_iter().collect();
    keys.sort_by_key(|key| (registry_index(key).unwrap_or(usize::MAX), *key));
    keys
}

fn build_column(key: &str, records: &[TelemetryRecord]) -> Column {
    let values: Vec<Option<&Value>> = records.iter().map(|record| record.get(key)).collect();
    let numeric = values.iter().flatten().all(|value| value.is_numeric());

    let series = if numeric {
        let data: Vec<Option<f64>> = values
            .iter()
            .map(|value| value.and_then(Value::as_f64))
            .collect();
        Series::new(key.into(), data)
    } else {
        let data: Vec<Option<String>> = values
            .iter()
            .map(|value| value.map(ToString::to_string))
            .collect();
        Series::new(key.into(), data)
    };
    series.into()
}

pub fn records_to_frame(records: &[TelemetryRecord]) -> PolarsResult<DataFrame> {
    if records.is_empty() {
        return Ok(DataFrame::empty());
    }
    let columns = column_order(records)
        .into_iter()
        .map(|key| build_column(key, records))
        .collect();
    DataFrame::new(columns)
}

pub fn write_csv(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    log::debug!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}
