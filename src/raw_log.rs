//! Raw log of every received line.
//!
//! The log is opened under a provisional name (`<session>_raw.tsv`) because
//! the descriptive parts of the name (battery, cradle) only appear inside the
//! stream. Once a meta block arrives the file is closed, renamed to the
//! descriptive stem and reopened in append mode, so nothing written so far is
//! lost. Generated names never replace an existing file: a taken name gets a
//! `-1`, `-2`, ... suffix. A configured path with an extension names a concrete
//! file that keeps its name.

use crate::export::build_export_stem;
use crate::parameters::MetaBlock;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_SUFFIX: &str = ".tsv";

#[derive(Debug, thiserror::Error)]
pub enum RawLogError {
    #[error("Raw data logging unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Raw data log rename failed: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("Raw data logging failed: {0}")]
    Write(#[from] io::Error),
}

/// Outcome of [`RawLog::update_meta`] when nothing went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retarget {
    Unchanged,
    /// Only the stem was recorded, no file is open.
    StemOnly,
    Renamed { from: PathBuf, to: PathBuf },
}

#[derive(Debug)]
pub struct RawLog {
    session_stamp: String,
    file: Option<File>,
    path: Option<PathBuf>,
    dir: Option<PathBuf>,
    suffix: String,
    /// Stem of the file in use, or the descriptive stem when nothing is open.
    export_stem: Option<String>,
    /// Last stem built from meta data.
    meta_stem: Option<String>,
    pinned: bool,
}

impl RawLog {
    pub fn new(session_stamp: impl Into<String>) -> Self {
        Self {
            session_stamp: session_stamp.into(),
            file: None,
            path: None,
            dir: None,
            suffix: DEFAULT_SUFFIX.to_string(),
            export_stem: None,
            meta_stem: None,
            pinned: false,
        }
    }

    pub fn session_stamp(&self) -> &str {
        &self.session_stamp
    }

    fn provisional_stem(&self) -> String {
        format!("{}_raw", self.session_stamp)
    }

    /// Close any open log and, for `Some(target)`, open a new one.
    ///
    /// `target` is either a directory (a provisional name is generated) or a
    /// file path with an extension.
    pub fn configure(&mut self, target: Option<&Path>) -> Result<(), RawLogError> {
        self.close();
        self.path = None;
        self.dir = None;
        self.suffix = DEFAULT_SUFFIX.to_string();
        self.export_stem = None;
        self.meta_stem = None;
        self.pinned = false;
        let Some(target) = target else {
            return Ok(());
        };

        let (stem, path) = if let Some(ext) = target.extension() {
            self.dir = Some(target.parent().map(Path::to_path_buf).unwrap_or_default());
            self.suffix = format!(".{}", ext.to_string_lossy());
            self.pinned = true;
            let stem = target
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| self.provisional_stem());
            let path = self.path_for(&stem);
            (stem, path)
        } else {
            self.dir = Some(target.to_path_buf());
            self.unused_name(&self.provisional_stem(), None)
        };

        let opened = self
            .dir
            .as_deref()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| open_append(&path));
        match opened {
            Ok(file) => {
                log::info!("Raw log opened at {}", path.display());
                self.file = Some(file);
                self.path = Some(path);
                self.export_stem = Some(stem);
                Ok(())
            }
            Err(source) => Err(RawLogError::Unavailable { path, source }),
        }
    }

    fn path_for(&self, stem: &str) -> PathBuf {
        let name = format!("{stem}{}", self.suffix);
        self.dir
            .as_ref()
            .map_or_else(|| PathBuf::from(&name), |dir| dir.join(&name))
    }

    /// First of `base`, `base-1`, `base-2`, ... whose file does not exist yet.
    /// `current` counts as free.
    fn unused_name(&self, base: &str, current: Option<&Path>) -> (String, PathBuf) {
        let mut stem = base.to_string();
        let mut counter = 0_u32;
        loop {
            let path = self.path_for(&stem);
            if current == Some(path.as_path()) || !path.exists() {
                return (stem, path);
            }
            counter += 1;
            stem = format!("{base}-{counter}");
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Stem of the current log file, or the descriptive stem when no log is
    /// open. Falls back to the provisional stem.
    pub fn export_stem(&self) -> String {
        self.export_stem
            .clone()
            .unwrap_or_else(|| self.provisional_stem())
    }

    /// Append one line and flush. Does nothing when no log is open.
    pub fn write_line(&mut self, line: &str) -> Result<(), RawLogError> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
            file.flush()?;
        }
        Ok(())
    }

    /// Flush and close the handle. The last path stays visible.
    pub fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                log::warn!("Flushing raw log failed: {e}");
            }
        }
    }

    /// Recompute the descriptive stem and move the log file if it changed.
    ///
    /// Without an open log only the stem is recorded. A pinned file keeps its
    /// name and stem. On a failed rename the log continues at its old path and
    /// [`RawLogError::Rename`] is returned; if the log cannot be reopened at
    /// all, logging stops and [`RawLogError::Unavailable`] is returned.
    pub fn update_meta(&mut self, meta: &MetaBlock) -> Result<Retarget, RawLogError> {
        if self.pinned {
            return Ok(Retarget::Unchanged);
        }
        let new_stem = build_export_stem(&self.session_stamp, meta);
        if self.meta_stem.as_deref() == Some(new_stem.as_str()) {
            return Ok(Retarget::Unchanged);
        }
        self.meta_stem = Some(new_stem.clone());

        let Some(current) = self.path.clone().filter(|_| self.file.is_some()) else {
            self.export_stem = Some(new_stem);
            return Ok(Retarget::StemOnly);
        };
        let (stem, target) = self.unused_name(&new_stem, Some(&current));
        if current == target {
            self.export_stem = Some(stem);
            return Ok(Retarget::Unchanged);
        }

        self.close();
        let mut rename_error = None;
        let mut reopen_at = target.clone();
        if current.exists() {
            if let Err(e) = fs::rename(&current, &target) {
                rename_error = Some(e);
                reopen_at = current.clone();
            }
        }

        match open_append(&reopen_at) {
            Ok(file) => {
                self.file = Some(file);
                self.path = Some(reopen_at);
            }
            Err(source) => {
                self.path = None;
                return Err(RawLogError::Unavailable {
                    path: reopen_at,
                    source,
                });
            }
        }

        match rename_error {
            Some(source) => Err(RawLogError::Rename {
                from: current,
                to: target,
                source,
            }),
            None => {
                log::info!("Raw log renamed to {}", target.display());
                self.export_stem = Some(stem);
                Ok(Retarget::Renamed {
                    from: current,
                    to: target,
                })
            }
        }
    }
}

impl Drop for RawLog {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAMP: &str = "20240102_030405";

    fn meta(pairs: &[(&str, &str)]) -> MetaBlock {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_directory_target_uses_provisional_name() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("raw");
        let mut log = RawLog::new(STAMP);
        log.configure(Some(&target)).unwrap();
        assert_eq!(log.path(), Some(target.join("20240102_030405_raw.tsv").as_path()));
        assert_eq!(log.export_stem(), "20240102_030405_raw");
        log.write_line("P04 P07").unwrap();
        assert_eq!(read_lines(log.path().unwrap()), ["P04 P07"]);
    }

    #[test]
    fn test_rename_keeps_content_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RawLog::new(STAMP);
        log.configure(Some(dir.path())).unwrap();
        let provisional = log.path().unwrap().to_path_buf();
        log.write_line("P04 P07 P70").unwrap();
        log.write_line("CC_CV WTC3206 PMNN4809A").unwrap();

        let outcome = log
            .update_meta(&meta(&[("P07", "WTC3206"), ("P70", "PMNN4809A")]))
            .unwrap();
        let renamed = dir.path().join("20240102_030405_PMNN4809A_WTC3206.tsv");
        assert_eq!(
            outcome,
            Retarget::Renamed {
                from: provisional.clone(),
                to: renamed.clone()
            }
        );
        assert!(!provisional.exists());
        log.write_line("P04 P06").unwrap();
        log.close();
        assert_eq!(
            read_lines(&renamed),
            ["P04 P07 P70", "CC_CV WTC3206 PMNN4809A", "P04 P06"]
        );
        assert_eq!(log.path(), Some(renamed.as_path()));
    }

    #[test]
    fn test_unchanged_meta_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RawLog::new(STAMP);
        log.configure(Some(dir.path())).unwrap();
        let block = meta(&[("P70", "PMNN4809A")]);
        assert!(matches!(log.update_meta(&block), Ok(Retarget::Renamed { .. })));
        let path = log.path().unwrap().to_path_buf();
        for _ in 0..3 {
            assert_eq!(log.update_meta(&block).unwrap(), Retarget::Unchanged);
        }
        assert_eq!(log.path(), Some(path.as_path()));
    }

    #[test]
    fn test_concrete_file_is_never_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("session.log");
        let mut log = RawLog::new(STAMP);
        log.configure(Some(&target)).unwrap();
        assert_eq!(log.export_stem(), "session");
        let outcome = log.update_meta(&meta(&[("P70", "PMNN4809A")])).unwrap();
        assert_eq!(outcome, Retarget::Unchanged);
        assert_eq!(log.path(), Some(target.as_path()));
        assert_eq!(log.export_stem(), "session");
    }

    #[test]
    fn test_without_target_nothing_is_written() {
        let mut log = RawLog::new(STAMP);
        log.configure(None).unwrap();
        log.write_line("ignored").unwrap();
        assert!(!log.is_open());
        assert_eq!(log.path(), None);
        assert_eq!(log.export_stem(), "20240102_030405_raw");
        assert_eq!(log.update_meta(&meta(&[("P70", "X")])).unwrap(), Retarget::StemOnly);
        assert_eq!(log.export_stem(), "20240102_030405_X");
        assert_eq!(log.update_meta(&meta(&[("P70", "X")])).unwrap(), Retarget::Unchanged);
    }

    #[test]
    fn test_unopenable_target_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();
        let mut log = RawLog::new(STAMP);
        let err = log.configure(Some(&blocker.join("raw"))).unwrap_err();
        assert!(matches!(err, RawLogError::Unavailable { .. }));
        assert!(err.to_string().starts_with("Raw data logging unavailable"));
        assert!(!log.is_open());
        assert_eq!(log.path(), None);
    }

    #[test]
    fn test_failed_rename_keeps_old_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RawLog::new(STAMP);
        log.configure(Some(dir.path())).unwrap();
        let provisional = log.path().unwrap().to_path_buf();
        log.write_line("first").unwrap();
        // longer than any file name the filesystem accepts
        let long_name = "A".repeat(300);
        let block = meta(&[("P70", long_name.as_str())]);

        let err = log.update_meta(&block).unwrap_err();
        assert!(matches!(err, RawLogError::Rename { .. }));
        assert!(err.to_string().starts_with("Raw data log rename failed"));
        assert!(log.is_open());
        assert_eq!(log.path(), Some(provisional.as_path()));
        assert_eq!(log.export_stem(), "20240102_030405_raw");
        log.write_line("second").unwrap();
        assert_eq!(read_lines(&provisional), ["first", "second"]);
        // the stem is remembered, so the same meta does not retry
        assert_eq!(log.update_meta(&block).unwrap(), Retarget::Unchanged);
    }

    #[test]
    fn test_sessions_with_same_name_keep_both_logs() {
        let dir = tempfile::tempdir().unwrap();
        let block = meta(&[("P07", "WTC3206"), ("P70", "PMNN4809A")]);

        let mut first = RawLog::new(STAMP);
        first.configure(Some(dir.path())).unwrap();
        first.write_line("CC_CV 111 1 1").unwrap();
        first.update_meta(&block).unwrap();
        first.close();

        let mut second = RawLog::new(STAMP);
        second.configure(Some(dir.path())).unwrap();
        second.write_line("CC_CV 999 9 9").unwrap();
        let outcome = second.update_meta(&block).unwrap();
        second.close();

        let first_path = dir.path().join("20240102_030405_PMNN4809A_WTC3206.tsv");
        let second_path = dir.path().join("20240102_030405_PMNN4809A_WTC3206-1.tsv");
        assert!(matches!(outcome, Retarget::Renamed { ref to, .. } if *to == second_path));
        assert_eq!(first.path(), Some(first_path.as_path()));
        assert_eq!(second.export_stem(), "20240102_030405_PMNN4809A_WTC3206-1");
        assert_eq!(read_lines(&first_path), ["CC_CV 111 1 1"]);
        assert_eq!(read_lines(&second_path), ["CC_CV 999 9 9"]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_provisional_name_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("20240102_030405_raw.tsv"), "earlier\n").unwrap();
        let mut log = RawLog::new(STAMP);
        log.configure(Some(dir.path())).unwrap();
        assert_eq!(
            log.path(),
            Some(dir.path().join("20240102_030405_raw-1.tsv").as_path())
        );
        assert_eq!(log.export_stem(), "20240102_030405_raw-1");
        log.write_line("later").unwrap();
        assert_eq!(read_lines(&dir.path().join("20240102_030405_raw.tsv")), ["earlier"]);
    }
}
