//! Local alert journal.
//!
//! Every detected alert is appended to a JSON-lines file together with its
//! delivery outcomes, independent of whether any channel accepted it.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::types::Alert;

/// Append-only JSON-lines record of detected alerts.
#[derive(Debug)]
pub struct AlertJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AlertJournal {
    /// Opens (without creating) a journal at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written.
    pub fn append(&self, alert: &Alert) -> Result<()> {
        let mut line = serde_json::to_vec(alert)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Reads the most recent `limit` alerts, oldest first.
    ///
    /// Lines that fail to parse are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn recent(&self, limit: usize) -> Result<Vec<Alert>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut alerts = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Alert>(&line) {
                Ok(alert) => alerts.push(alert),
                Err(e) => {
                    warn!(path = %self.path.display(), line = line_no + 1, error = %e, "skipping malformed journal line");
                }
            }
        }

        let skip = alerts.len().saturating_sub(limit);
        Ok(alerts.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertCategory;

    fn alert(key: &str) -> Alert {
        Alert::builder("firewall_blocks", AlertCategory::Security, key).build()
    }

    #[test]
    fn test_recent_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let journal = AlertJournal::new(dir.path().join("alerts.jsonl"));
        assert!(journal.recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_append_and_read_back_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let journal = AlertJournal::new(dir.path().join("nested").join("alerts.jsonl"));

        for key in ["a", "b", "c"] {
            journal.append(&alert(key)).unwrap();
        }

        let all = journal.recent(10).unwrap();
        let keys: Vec<_> = all.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let last_two = journal.recent(2).unwrap();
        let keys: Vec<_> = last_two.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alerts.jsonl");
        let journal = AlertJournal::new(&path);

        journal.append(&alert("ok")).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{ truncated").unwrap();
        journal.append(&alert("also-ok")).unwrap();

        assert_eq!(journal.recent(10).unwrap().len(), 2);
    }
}
