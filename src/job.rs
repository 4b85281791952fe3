//! Job-directory lifecycle shared by both runners.
//!
//! A run owns one job directory: enter it, clear stale outcome markers,
//! execute the body, and leave exactly one zero-byte sentinel behind. The
//! sentinel's presence is the only completion signal the calling pipeline
//! looks at, so a failure writes the failure marker *and* propagates the
//! error to keep the process exit status consistent with it.

use anyhow::{Context, Result};
use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

pub const SUCCESS_MARKER: &str = "RELION_JOB_EXIT_SUCCESS";
pub const FAILURE_MARKER: &str = "RELION_JOB_EXIT_FAILURE";

/// Where a job runs: the project directory it was launched from and the job
/// directory it owns. After `enter`, the process cwd is the job directory
/// and input paths from the tables are resolved against `project_dir`.
#[derive(Debug)]
pub struct JobContext {
    pub project_dir: PathBuf,
    pub job_dir: String,
}

impl JobContext {
    /// Create the job directory, move into it, and clear any stale outcome
    /// marker from an earlier run so old state never leaks into this one.
    pub fn enter(job_dir: &str) -> Result<Self> {
        let project_dir = env::current_dir().context("cannot determine project directory")?;
        fs::create_dir_all(job_dir)
            .with_context(|| format!("cannot create job directory {job_dir}"))?;
        env::set_current_dir(job_dir)
            .with_context(|| format!("cannot enter job directory {job_dir}"))?;
        clear_markers(Path::new("."))?;
        Ok(Self {
            project_dir,
            job_dir: job_dir.to_string(),
        })
    }

    /// Resolve a project-relative path (micrograph names, input STAR files).
    pub fn project_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.project_dir.join(rel)
    }

    /// Absolute path of a file inside the job directory.
    pub fn job_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.project_dir.join(&self.job_dir).join(rel)
    }
}

/// Remove stale success/failure markers in `dir`.
pub fn clear_markers(dir: &Path) -> Result<()> {
    for marker in [SUCCESS_MARKER, FAILURE_MARKER] {
        let path = dir.join(marker);
        if path.is_file() {
            fs::remove_file(&path).with_context(|| format!("cannot remove stale {marker}"))?;
        }
    }
    Ok(())
}

/// Run the job body and leave exactly one outcome sentinel in `dir`.
pub fn run_with_markers_in(dir: &Path, body: impl FnOnce() -> Result<()>) -> Result<()> {
    match body() {
        Ok(()) => {
            touch(&dir.join(SUCCESS_MARKER))?;
            Ok(())
        }
        Err(err) => {
            // Best effort: the job error is what the caller needs to see.
            let _ = touch(&dir.join(FAILURE_MARKER));
            Err(err)
        }
    }
}

/// Marker wrapper for the current (job) directory.
pub fn run_with_markers(body: impl FnOnce() -> Result<()>) -> Result<()> {
    run_with_markers_in(Path::new("."), body)
}

fn touch(path: &Path) -> Result<()> {
    File::create(path).with_context(|| format!("cannot write marker {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn success_writes_only_the_success_marker() {
        let dir = tempfile::tempdir().unwrap();
        run_with_markers_in(dir.path(), || Ok(())).unwrap();
        assert!(dir.path().join(SUCCESS_MARKER).is_file());
        assert!(!dir.path().join(FAILURE_MARKER).exists());
    }

    #[test]
    fn failure_writes_only_the_failure_marker_and_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_with_markers_in(dir.path(), || Err(anyhow!("tool blew up"))).unwrap_err();
        assert!(err.to_string().contains("tool blew up"));
        assert!(dir.path().join(FAILURE_MARKER).is_file());
        assert!(!dir.path().join(SUCCESS_MARKER).exists());
    }

    #[test]
    fn stale_markers_are_cleared() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join(SUCCESS_MARKER)).unwrap();
        File::create(dir.path().join(FAILURE_MARKER)).unwrap();
        clear_markers(dir.path()).unwrap();
        assert!(!dir.path().join(SUCCESS_MARKER).exists());
        assert!(!dir.path().join(FAILURE_MARKER).exists());
    }
}
