//! crYOLO fine-tune training job.
//!
//! Stages the most populated micrographs with their picked coordinates,
//! writes the tool's JSON configuration, runs `cryolo_train.py` behind the
//! configured activation prefix, and emits the `job_pipeline.star` stub the
//! pipeline expects from an external process.

use anyhow::{bail, Context, Result};
use std::env;
use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::cli::TrainArgs;
use crate::job::JobContext;
use crate::model::{self, CryoloConfig};
use crate::params;
use crate::settings::{ToolSettings, SETTINGS_ENV};
use crate::shell::CommandChain;
use crate::staging::{self, TRAIN_ANNOT_DIR, TRAIN_IMAGE_DIR};
use crate::star::StarTable;

pub const CONFIG_FILE: &str = "config_cryolo.json";
pub const TUNED_MODEL: &str = "fine_tuned_model.h5";

/// Optional SSD scratch space for crYOLO's filtered micrograph copies.
pub const SCRATCH_ENV: &str = "RELION_SCRATCH_DIR";

pub fn run(ctx: &JobContext, args: &TrainArgs, tools: &ToolSettings) -> Result<()> {
    let started = Instant::now();

    let model_path = match &args.model {
        Some(m) => m.clone(),
        None => match &tools.cryolo.general_model {
            Some(m) => m.display().to_string(),
            None => bail!("no --model given and no cryolo general model configured ({SETTINGS_ENV})"),
        },
    };

    let filtered_dir = match env::var_os(SCRATCH_ENV) {
        Some(scratch) => Path::new(&scratch).join("filtered_tmp").display().to_string(),
        None => format!("{}/filtered_tmp/", args.out_dir),
    };

    fs::create_dir_all(TRAIN_IMAGE_DIR).context("cannot create train_image directory")?;
    fs::create_dir_all(TRAIN_ANNOT_DIR).context("cannot create train_annot directory")?;

    let in_parts = ctx.project_path(&args.in_parts);
    let optics = StarTable::read(&in_parts, "optics")
        .with_context(|| format!("cannot read optics table from {}", args.in_parts))?;
    let image_size = optics.parse_i64(0, "rlnImageSize")?;
    let image_angpix = optics.parse_f64(0, "rlnImagePixelSize")?;
    let original_angpix = optics.parse_f64(0, "rlnMicrographOriginalPixelSize")?;
    let box_size = params::unbinned_box_size(image_angpix, original_angpix, image_size);
    println!("Using unbinned box size of {box_size} px");

    let config = CryoloConfig::fine_tune(
        box_size,
        &filtered_dir,
        TRAIN_IMAGE_DIR,
        TRAIN_ANNOT_DIR,
        &model_path,
        &ctx.job_path(TUNED_MODEL).display().to_string(),
    );
    let f = File::create(CONFIG_FILE).context("cannot create config_cryolo.json")?;
    serde_json::to_writer_pretty(f, &config).context("cannot write config_cryolo.json")?;

    let particles = StarTable::read(&in_parts, "particles")
        .with_context(|| format!("cannot read particles table from {}", args.in_parts))?;
    let mics = particles.column("rlnMicrographName")?;
    let xs = particles.column("rlnCoordinateX")?;
    let ys = particles.column("rlnCoordinateY")?;
    let rows = mics
        .iter()
        .zip(&xs)
        .zip(&ys)
        .map(|((m, x), y)| (m.to_string(), x.to_string(), y.to_string()));

    let mut groups = model::group_by_micrograph(rows);
    model::sort_by_count_descending(&mut groups);
    staging::stage_training(&ctx.project_dir, Path::new("."), &groups, args.n)?;

    let mut chain = CommandChain::with_activation(tools.cryolo.activate.as_deref());
    chain.push(format!(
        "{} --conf {} --gpu {} --warmup 0 --fine_tune --cleanup",
        tools.cryolo.train_bin,
        CONFIG_FILE,
        args.gpu.replace(',', " ")
    ));
    println!("Running command:\n{}", chain.rendered());
    chain.run()?;

    write_pipeline_star(
        &ctx.job_path("job_pipeline.star"),
        &args.in_parts,
        &args.out_dir,
    )?;

    let elapsed = Duration::from_secs(started.elapsed().as_secs());
    println!("Job duration = {}", humantime::format_duration(elapsed));
    Ok(())
}

/// Minimal pipeline-graph descriptor: counters, one process node, one input
/// node, one edge. It records that the job ran, nothing about model quality.
fn write_pipeline_star(path: &Path, in_parts: &str, job_dir: &str) -> Result<()> {
    let mut f = File::create(path)
        .with_context(|| format!("cannot create {}", path.display()))?;

    let mut general = StarTable::with_columns(&["rlnPipeLineJobCounter"]);
    general.add_row(&["2"]);
    general.write_pairs(&mut f, "pipeline_general")?;

    let mut processes = StarTable::with_columns(&[
        "rlnPipeLineProcessName",
        "rlnPipeLineProcessAlias",
        "rlnPipeLineProcessTypeLabel",
        "rlnPipeLineProcessStatusLabel",
    ]);
    processes.add_row(&[job_dir, "None", "relion.external", "Running"]);
    processes.write_loop(&mut f, "pipeline_processes")?;

    let mut nodes = StarTable::with_columns(&["rlnPipeLineNodeName", "rlnPipeLineNodeTypeLabel"]);
    nodes.add_row(&[in_parts, "ParticlesData.star.relion"]);
    nodes.write_loop(&mut f, "pipeline_nodes")?;

    let mut edges = StarTable::with_columns(&["rlnPipeLineEdgeFromNode", "rlnPipeLineEdgeProcess"]);
    edges.add_row(&[in_parts, job_dir]);
    edges.write_loop(&mut f, "pipeline_input_edges")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_star_has_the_four_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_pipeline.star");
        write_pipeline_star(
            &path,
            "Select/job004/particles.star",
            "External/cryolo_training",
        )
        .unwrap();

        let general = StarTable::read(&path, "pipeline_general").unwrap();
        assert_eq!(general.get(0, "rlnPipeLineJobCounter").unwrap(), "2");

        let processes = StarTable::read(&path, "pipeline_processes").unwrap();
        assert_eq!(
            processes.get(0, "rlnPipeLineProcessTypeLabel").unwrap(),
            "relion.external"
        );
        assert_eq!(
            processes.get(0, "rlnPipeLineProcessStatusLabel").unwrap(),
            "Running"
        );

        let nodes = StarTable::read(&path, "pipeline_nodes").unwrap();
        assert_eq!(
            nodes.get(0, "rlnPipeLineNodeName").unwrap(),
            "Select/job004/particles.star"
        );

        let edges = StarTable::read(&path, "pipeline_input_edges").unwrap();
        assert_eq!(
            edges.get(0, "rlnPipeLineEdgeProcess").unwrap(),
            "External/cryolo_training"
        );
    }
}
