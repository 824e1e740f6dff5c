//! Stream parser for the WTC3 line protocol.
//!
//! The charger emits whitespace separated lines with no framing. A header line
//! lists parameter codes, the following line(s) carry the matching values. The
//! first header/values pair of a stream is the meta block (strategy, cradle,
//! battery, limits), the next header starts the repeating data block.
//!
//! There is no line-type marker on the wire, so lines are classified by the
//! share of non-numeric tokens: a line is a header if
//! `non_numeric >= max(1, tokens / 2)`. Lines with mostly textual values are
//! therefore misread as headers; this is a property of the protocol.
//!
//! ```rust
//! use wtc3_logger::parser::Parser;
//!
//! let mut parser = Parser::new();
//! parser.feed(["P04 P07", "CC_CV WTC3206", "P06 P40", "1 13030"]);
//! assert_eq!(parser.meta()["P07"], "WTC3206");
//! ```

use crate::parameters::{cast_for, is_numeric, MetaBlock, TelemetryRecord};

pub type RecordCallback = Box<dyn FnMut(&MetaBlock, &TelemetryRecord) + Send>;
pub type HeaderCallback = Box<dyn FnMut(&[String]) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FindHeader,
    ExpectMetaValues,
    ExpectDataValues,
    Data,
}

/// What a single fed line did to the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Blank line, or a values line with no header to attach it to.
    Ignored,
    MetaHeader,
    MetaValues,
    DataHeader { replaced: bool },
    Record,
}

pub struct Parser {
    meta_hdr: Vec<String>,
    meta: MetaBlock,
    data_hdr: Vec<String>,
    phase: Phase,
    record_listeners: Vec<RecordCallback>,
    header_listeners: Vec<HeaderCallback>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("meta_hdr", &self.meta_hdr)
            .field("meta", &self.meta)
            .field("data_hdr", &self.data_hdr)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            meta_hdr: Vec::new(),
            meta: MetaBlock::new(),
            data_hdr: Vec::new(),
            phase: Phase::FindHeader,
            record_listeners: Vec::new(),
            header_listeners: Vec::new(),
        }
    }

    /// Register a callback fired once per parsed data line.
    pub fn on_record<F>(&mut self, f: F)
    where
        F: FnMut(&MetaBlock, &TelemetryRecord) + Send + 'static,
    {
        self.record_listeners.push(Box::new(f));
    }

    /// Register a callback fired when a data header replaces the previous one.
    pub fn on_data_header<F>(&mut self, f: F)
    where
        F: FnMut(&[String]) + Send + 'static,
    {
        self.header_listeners.push(Box::new(f));
    }

    /// Forget headers and meta, keep the registered callbacks.
    pub fn reset(&mut self) {
        self.meta_hdr.clear();
        self.meta.clear();
        self.data_hdr.clear();
        self.phase = Phase::FindHeader;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn meta(&self) -> &MetaBlock {
        &self.meta
    }

    pub fn meta_header(&self) -> &[String] {
        &self.meta_hdr
    }

    pub fn data_header(&self) -> &[String] {
        &self.data_hdr
    }

    pub fn feed<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.feed_line(line.as_ref());
        }
    }

    pub fn feed_line(&mut self, line: &str) -> LineKind {
        let tokens = tokenize(line);
        if tokens.is_empty() {
            return LineKind::Ignored;
        }
        // Meta values are mostly text, so they are taken as-is.
        if self.phase == Phase::ExpectMetaValues {
            return self.handle_values(tokens);
        }
        if is_header(&tokens) {
            self.handle_header(tokens)
        } else {
            self.handle_values(tokens)
        }
    }

    fn handle_header(&mut self, tokens: Vec<String>) -> LineKind {
        if self.meta_hdr.is_empty() {
            self.meta_hdr = tokens;
            self.phase = Phase::ExpectMetaValues;
            return LineKind::MetaHeader;
        }
        let replaced = !self.data_hdr.is_empty();
        self.data_hdr = tokens;
        self.phase = Phase::ExpectDataValues;
        if replaced {
            log::debug!("New data header: {:?}", self.data_hdr);
            for listener in &mut self.header_listeners {
                listener(&self.data_hdr);
            }
        }
        LineKind::DataHeader { replaced }
    }

    fn handle_values(&mut self, tokens: Vec<String>) -> LineKind {
        match self.phase {
            Phase::ExpectMetaValues => {
                self.meta = self.meta_hdr.iter().cloned().zip(tokens).collect();
                self.phase = Phase::FindHeader;
                LineKind::MetaValues
            }
            Phase::ExpectDataValues | Phase::Data => {
                self.phase = Phase::Data;
                let record: TelemetryRecord = self
                    .data_hdr
                    .iter()
                    .zip(&tokens)
                    .map(|(key, raw)| (key.clone(), cast_for(key, raw)))
                    .collect();
                for listener in &mut self.record_listeners {
                    listener(&self.meta, &record);
                }
                LineKind::Record
            }
            Phase::FindHeader => {
                log::trace!("Dropping values line without header: {tokens:?}");
                LineKind::Ignored
            }
        }
    }
}

/// Strip control bytes (STX, ETX, ...) and split on whitespace runs.
pub fn tokenize(line: &str) -> Vec<String> {
    let cleaned: String = line
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

/// Header classification by non-numeric token share.
pub fn is_header<S: AsRef<str>>(tokens: &[S]) -> bool {
    let non_numeric = tokens.iter().filter(|t| !is_numeric(t.as_ref())).count();
    non_numeric >= (tokens.len() / 2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Value;
    use std::sync::{Arc, Mutex};

    const SAMPLE: [&str; 5] = [
        "P04 P07 P08",
        "CC_CV WTC3206 WCM3B-64",
        "P05 P06 P40 P41",
        "31248 1 13030 3299",
        "31249 2 13033 3301",
    ];

    type Seen = Arc<Mutex<Vec<(MetaBlock, TelemetryRecord)>>>;

    fn recording_parser() -> (Parser, Seen) {
        let seen: Seen = Arc::default();
        let mut parser = Parser::new();
        let sink = Arc::clone(&seen);
        parser.on_record(move |meta, record| {
            sink.lock().unwrap().push((meta.clone(), record.clone()));
        });
        (parser, seen)
    }

    #[test]
    fn test_reads_meta_and_records() {
        let (mut parser, seen) = recording_parser();
        parser.feed(SAMPLE);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let (meta, record) = &seen[0];
        assert_eq!(meta["P04"], "CC_CV");
        assert_eq!(meta["P08"], "WCM3B-64");
        assert_eq!(record["P06"], Value::Int(1));
        assert!((record["P40"].as_f64().unwrap() - 13.03).abs() < 1e-6);
        assert_eq!(seen[1].1["P05"], Value::Int(31249));
        assert_eq!(parser.phase(), Phase::Data);
    }

    #[test]
    fn test_blank_lines_fire_nothing() {
        let (mut parser, seen) = recording_parser();
        let headers = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&headers);
        parser.on_data_header(move |_| *counter.lock().unwrap() += 1);

        for line in ["", "   ", "\t\t", " \r\n", "\x02\x03"] {
            assert_eq!(parser.feed_line(line), LineKind::Ignored);
        }
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(*headers.lock().unwrap(), 0);
        assert_eq!(parser.phase(), Phase::FindHeader);
    }

    #[test]
    fn test_control_characters_are_stripped() {
        let (mut parser, seen) = recording_parser();
        parser.feed([
            "\x02P04 P07\x03",
            "CC_CV WTC3206",
            "\x02P06\tP40\x03",
            "\x027\t13030\x03",
        ]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1["P06"], Value::Int(7));
        assert!(seen[0].1.contains_key("P40"));
    }

    #[test]
    fn test_line_kinds_follow_state_machine() {
        let (mut parser, _) = recording_parser();
        assert_eq!(parser.feed_line(SAMPLE[0]), LineKind::MetaHeader);
        assert_eq!(parser.phase(), Phase::ExpectMetaValues);
        assert_eq!(parser.feed_line(SAMPLE[1]), LineKind::MetaValues);
        assert_eq!(parser.phase(), Phase::FindHeader);
        assert_eq!(
            parser.feed_line(SAMPLE[2]),
            LineKind::DataHeader { replaced: false }
        );
        assert_eq!(parser.phase(), Phase::ExpectDataValues);
        assert_eq!(parser.feed_line(SAMPLE[3]), LineKind::Record);
        assert_eq!(
            parser.feed_line("P05 P06"),
            LineKind::DataHeader { replaced: true }
        );
        assert_eq!(parser.data_header(), ["P05", "P06"]);
    }

    #[test]
    fn test_replaced_data_header_fires_callback() {
        let (mut parser, seen) = recording_parser();
        let headers: Arc<Mutex<Vec<Vec<String>>>> = Arc::default();
        let sink = Arc::clone(&headers);
        parser.on_data_header(move |hdr| sink.lock().unwrap().push(hdr.to_vec()));

        parser.feed(SAMPLE);
        assert!(headers.lock().unwrap().is_empty());

        parser.feed(["P06 P45", "3 4100"]);
        assert_eq!(headers.lock().unwrap().as_slice(), [vec!["P06", "P45"]]);
        let seen = seen.lock().unwrap();
        let (meta, last) = seen.last().unwrap();
        assert_eq!(meta["P07"], "WTC3206");
        assert_eq!(last.len(), 2);
        assert!((last["P45"].as_f64().unwrap() - 4.1).abs() < 1e-9);
    }

    #[test]
    fn test_ragged_lines_zip_positionally() {
        let (mut parser, seen) = recording_parser();
        parser.feed(["P04 P07", "CC_CV", "P06 P40 P41", "1 2 3 4 5", "9"]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0.len(), 1);
        assert_eq!(seen[0].1.len(), 3);
        assert_eq!(seen[1].1.len(), 1);
        assert_eq!(seen[1].1["P06"], Value::Int(9));
    }

    #[test]
    fn test_new_meta_replaces_old_meta() {
        let mut parser = Parser::new();
        parser.feed(["P04 P07", "CC_CV WTC3206"]);
        parser.reset();
        parser.feed(["P70", "PMNN4809A"]);
        assert_eq!(parser.meta().len(), 1);
        assert_eq!(parser.meta()["P70"], "PMNN4809A");
    }

    #[test]
    fn test_values_without_header_are_dropped() {
        let (mut parser, seen) = recording_parser();
        assert_eq!(parser.feed_line("1 2 3"), LineKind::Ignored);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_header_threshold() {
        assert!(is_header(&["P04"]));
        assert!(!is_header(&["1"]));
        assert!(is_header(&["CC_CV", "1"]));
        assert!(!is_header(&["CC_CV", "0", "1", "2"]));
        assert!(is_header(&["CC_CV", "X", "1", "2"]));
        assert!(!is_header(&["A", "1", "2", "3", "4"]));
    }

    #[test]
    fn test_unparseable_tokens_pass_through() {
        let (mut parser, seen) = recording_parser();
        parser.feed(["P04", "CC", "P04 P06 P40 P41 P42 P43", "CC_CV 5 -- 7 8 9"]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1["P04"], Value::Text("CC_CV".into()));
        assert_eq!(seen[0].1["P40"], Value::Text("--".into()));
    }
}
