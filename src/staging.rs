//! Symlink staging of pipeline inputs into the layouts the tools expect.
//!
//! No image data is ever copied: the job directory gets links back to the
//! canonical files under the project. The picking path stages whatever the
//! ledger has not seen yet; the training path restages from scratch on every
//! run and is capped to the most populated micrographs.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use crate::ledger::Ledger;
use crate::model::MicrographCoords;
use crate::star::StarTable;

pub const TRAIN_IMAGE_DIR: &str = "train_image";
pub const TRAIN_ANNOT_DIR: &str = "train_annot";

/// Suffix of the per-micrograph coordinate files RELION reads back.
pub const COORDS_SUFFIX: &str = "_topaz.star";

/// One micrograph selected for picking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickEntry {
    /// Path under the input job, used as the ledger key and the staged link
    /// location, e.g. `Movies/mic_001.mrc`.
    pub key: String,
    /// Coordinate STAR name for this micrograph, e.g.
    /// `Movies/mic_001_topaz.star`.
    pub coords_star: String,
}

/// The picking work set for one invocation.
#[derive(Debug)]
pub struct PickPlan {
    /// Job that produced the micrographs, e.g. `MotionCorr/job002`.
    pub input_job: String,
    /// Micrograph file extension including the dot.
    pub extension: String,
    /// Not-yet-ledgered micrographs, input-table order.
    pub entries: Vec<PickEntry>,
}

/// Split project-relative micrograph names (`JobType/jobNNN/rest...`) into
/// the owning job prefix and per-micrograph keys, excluding entries already
/// in the ledger. Duplicate names collapse to their first occurrence.
pub fn plan_picking(mic_names: &[&str], ledger: &Ledger) -> Result<PickPlan> {
    let first = match mic_names.first() {
        Some(f) => *f,
        None => bail!("micrographs table is empty"),
    };
    let input_job = job_prefix(first)?;
    let extension = match Path::new(first).extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => String::new(),
    };

    let mut entries = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for name in mic_names {
        let key = strip_job_prefix(name)?;
        if ledger.contains(&key) || !seen.insert(key.clone()) {
            continue;
        }
        let coords_star = replace_extension(&key, COORDS_SUFFIX);
        entries.push(PickEntry { key, coords_star });
    }

    Ok(PickPlan {
        input_job,
        extension,
        entries,
    })
}

/// Create per-micrograph directories under `job_root` and link every planned
/// micrograph back to its canonical file. Returns the distinct staged
/// directories in first-appearance order (relative, for shell globbing).
pub fn stage_picking(project_dir: &Path, job_root: &Path, plan: &PickPlan) -> Result<Vec<String>> {
    let mut dirs: Vec<String> = Vec::new();
    for entry in &plan.entries {
        let dir = match Path::new(&entry.key).parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().into_owned(),
            _ => ".".to_string(),
        };
        if dir != "." {
            fs::create_dir_all(job_root.join(&dir))
                .with_context(|| format!("cannot create staging directory {dir}"))?;
        }
        if !dirs.contains(&dir) {
            dirs.push(dir.clone());
        }
        let target = project_dir.join(&plan.input_job).join(&entry.key);
        let link = job_root.join(&entry.key);
        symlink(&target, &link).with_context(|| {
            format!("cannot link {} -> {}", target.display(), link.display())
        })?;
    }
    Ok(dirs)
}

/// Stage the most populated micrographs for training: a symlink under
/// `train_image/` and a coordinate STAR under `train_annot/` per micrograph.
/// `groups` must already be sorted by descending particle count; a cap of
/// zero or less keeps every micrograph. Returns the number staged.
pub fn stage_training(
    project_dir: &Path,
    job_root: &Path,
    groups: &[MicrographCoords],
    cap: i64,
) -> Result<usize> {
    let take = if cap > 0 { cap as usize } else { usize::MAX };
    let mut staged = 0;
    for group in groups.iter().take(take) {
        let base = Path::new(&group.micrograph)
            .file_name()
            .with_context(|| format!("micrograph name {} has no basename", group.micrograph))?
            .to_string_lossy()
            .into_owned();

        let link = job_root.join(TRAIN_IMAGE_DIR).join(&base);
        // A rerun keeps existing links, including ones whose target vanished.
        if link.symlink_metadata().is_err() {
            let target = project_dir.join(&group.micrograph);
            symlink(&target, &link).with_context(|| {
                format!("cannot link {} -> {}", target.display(), link.display())
            })?;
        }

        let annot = job_root
            .join(TRAIN_ANNOT_DIR)
            .join(replace_extension(&base, ".star"));
        let mut table = StarTable::with_columns(&["rlnCoordinateX", "rlnCoordinateY"]);
        for (x, y) in &group.coords {
            table.add_row(&[x.as_str(), y.as_str()]);
        }
        table
            .write_file(&annot, "")
            .with_context(|| format!("cannot write coordinate file {}", annot.display()))?;
        staged += 1;
    }
    Ok(staged)
}

/// First two path components, the pipeline's `JobType/jobNNN` namespace.
fn job_prefix(name: &str) -> Result<String> {
    let parts: Vec<&str> = name.split('/').collect();
    if parts.len() < 3 {
        bail!("micrograph path '{name}' is not job-namespaced (expected JobType/jobNNN/...)");
    }
    Ok(parts[..2].join("/"))
}

/// Path with the `JobType/jobNNN` prefix removed.
fn strip_job_prefix(name: &str) -> Result<String> {
    let parts: Vec<&str> = name.split('/').collect();
    if parts.len() < 3 {
        bail!("micrograph path '{name}' is not job-namespaced (expected JobType/jobNNN/...)");
    }
    Ok(parts[2..].join("/"))
}

/// `Movies/mic_001.mrc` with suffix `_topaz.star` -> `Movies/mic_001_topaz.star`.
fn replace_extension(path: &str, suffix: &str) -> String {
    let p = Path::new(path);
    match p.extension() {
        Some(_) => format!("{}{suffix}", p.with_extension("").display()),
        None => format!("{path}{suffix}"),
    }
}
