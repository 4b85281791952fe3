//! Append-only record of already-picked micrographs.
//!
//! One project-relative path per line. A key that has been appended is never
//! removed, which is what makes repeat invocations of the picking job
//! incremental: ledgered micrographs are excluded from the next work set.
//! Membership is held in a `HashSet` so lookups stay cheap as the ledger
//! grows across a long collection.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    done: HashSet<String>,
}

impl Ledger {
    /// Load the ledger at `path`; a missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        let done = if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("cannot read ledger {}", path.display()))?;
            text.lines()
                .filter(|l| !l.is_empty())
                .map(|l| l.to_string())
                .collect()
        } else {
            HashSet::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            done,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.done.contains(key)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Append keys to the file and the in-memory set. Only called after the
    /// external tool has succeeded, so the ledger never records a micrograph
    /// that was not actually processed.
    pub fn append<'a, I>(&mut self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("cannot open ledger {}", self.path.display()))?;
        for key in keys {
            writeln!(f, "{key}")
                .with_context(|| format!("cannot append to ledger {}", self.path.display()))?;
            self.done.insert(key.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::load(&dir.path().join("done_mics.txt")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn appended_keys_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done_mics.txt");

        let mut ledger = Ledger::load(&path).unwrap();
        ledger
            .append(["Movies/mic_001.mrc", "Movies/mic_002.mrc"])
            .unwrap();
        assert!(ledger.contains("Movies/mic_001.mrc"));

        let reloaded = Ledger::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("Movies/mic_002.mrc"));
        assert!(!reloaded.contains("Movies/mic_003.mrc"));
    }

    #[test]
    fn append_is_cumulative_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done_mics.txt");

        let mut first = Ledger::load(&path).unwrap();
        first.append(["Movies/mic_001.mrc"]).unwrap();
        let mut second = Ledger::load(&path).unwrap();
        second.append(["Movies/mic_002.mrc"]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Movies/mic_001.mrc\nMovies/mic_002.mrc\n");
    }
}
