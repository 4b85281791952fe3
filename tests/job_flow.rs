//! Whole-job lifecycle tests. The external tools are stubbed with `true`
//! and `false` so the flows run without Topaz or crYOLO installed.
//!
//! Jobs run relative to the process working directory, so every test takes
//! the same lock and sets its own cwd before entering a job.

use std::env;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use clap::Parser;
use relion_external_jobs::{cli, job, jobs, settings::ToolSettings, star::StarTable};

static CWD_LOCK: Mutex<()> = Mutex::new(());

const MICS_STAR: &str = "\
# version 30001

data_optics

loop_
_rlnOpticsGroupName #1
_rlnOpticsGroup #2
_rlnMicrographPixelSize #3
opticsGroup1 1 1.0

# version 30001

data_micrographs

loop_
_rlnMicrographName #1
_rlnOpticsGroup #2
MotionCorr/job002/Movies/mic_001.mrc 1
MotionCorr/job002/Movies/mic_002.mrc 1
";

const PARTS_STAR: &str = "\
# version 30001

data_optics

loop_
_rlnOpticsGroupName #1
_rlnImageSize #2
_rlnImagePixelSize #3
_rlnMicrographOriginalPixelSize #4
opticsGroup1 128 2.06 1.03

# version 30001

data_particles

loop_
_rlnMicrographName #1
_rlnCoordinateX #2
_rlnCoordinateY #3
Extract/job007/Movies/mic_a.mrc 100.0 200.0
Extract/job007/Movies/mic_b.mrc 10.0 20.0
Extract/job007/Movies/mic_b.mrc 30.0 40.0
";

fn write_project_file(project: &Path, rel: &str, content: &str) {
    let path = project.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn stub_topaz(bin: &str) -> ToolSettings {
    let mut tools = ToolSettings::default();
    tools.topaz.bin = bin.into();
    // The stub tool never creates the work dirs the real one would.
    tools.topaz.activate = Some("mkdir -p preprocessed output".into());
    tools
}

fn pick_args(in_mics: &str, out_dir: &str) -> cli::PickArgs {
    cli::PickCli::parse_from([
        "external_job_topaz",
        "--in_mics",
        in_mics,
        "--o",
        out_dir,
    ])
    .validated()
    .unwrap()
}

#[test]
fn picking_job_runs_stages_and_reruns_incrementally() {
    let _guard = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let project = tempfile::tempdir().unwrap();
    write_project_file(project.path(), "CtfFind/job004/micrographs_ctf.star", MICS_STAR);
    write_project_file(project.path(), "MotionCorr/job002/Movies/mic_001.mrc", "fake");
    write_project_file(project.path(), "MotionCorr/job002/Movies/mic_002.mrc", "fake");

    let args = pick_args("CtfFind/job004/micrographs_ctf.star", "External/topaz_picking");
    let tools = stub_topaz("true");

    env::set_current_dir(project.path()).unwrap();
    let ctx = job::JobContext::enter(&args.out_dir).unwrap();
    job::run_with_markers(|| jobs::topaz_pick::run(&ctx, &args, &tools)).unwrap();

    let job_dir = project.path().join("External/topaz_picking");
    assert!(job_dir.join(job::SUCCESS_MARKER).is_file());
    assert!(!job_dir.join(job::FAILURE_MARKER).exists());

    // Ledger records both micrographs by their job-relative keys.
    let ledger = fs::read_to_string(job_dir.join("done_mics.txt")).unwrap();
    assert_eq!(ledger, "Movies/mic_001.mrc\nMovies/mic_002.mrc\n");

    // Staged links and scratch dirs are cleaned up after the run.
    assert!(!job_dir.join("Movies/mic_001.mrc").exists());
    assert!(!job_dir.join("preprocessed").exists());
    assert!(!job_dir.join("output").exists());

    // Pipeline-facing outputs.
    assert_eq!(
        fs::read_to_string(job_dir.join("coords_suffix_topaz.star")).unwrap(),
        "CtfFind/job004/micrographs_ctf.star"
    );
    let nodes = StarTable::read(&job_dir.join("RELION_OUTPUT_NODES.star"), "output_nodes").unwrap();
    assert_eq!(
        nodes.get(0, "rlnPipeLineNodeName").unwrap(),
        "External/topaz_picking/coords_suffix_topaz.star"
    );
    let picker = StarTable::read(&job_dir.join("output_for_relion.star"), "picker").unwrap();
    assert_eq!(picker.get(0, "rlnParticleDiameter").unwrap(), "120");
    assert_eq!(picker.get(0, "rlnOriginalImageSize").unwrap(), "132");
    assert_eq!(picker.get(0, "rlnImageSize").unwrap(), "48");
    let manual = fs::read_to_string(project.path().join(".gui_manualpickjob.star")).unwrap();
    assert!(manual.contains("  diameter         120\n"));

    // Rerun with everything ledgered: no staging, no tool invocation (the
    // failing stub proves the chain never ran), success marker written.
    env::set_current_dir(project.path()).unwrap();
    let ctx = job::JobContext::enter(&args.out_dir).unwrap();
    let failing = stub_topaz("false");
    job::run_with_markers(|| jobs::topaz_pick::run(&ctx, &args, &failing)).unwrap();
    assert!(job_dir.join(job::SUCCESS_MARKER).is_file());
    assert!(!job_dir.join(job::FAILURE_MARKER).exists());
}

#[test]
fn failing_tool_leaves_failure_marker_and_ledger_untouched() {
    let _guard = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let project = tempfile::tempdir().unwrap();
    write_project_file(project.path(), "CtfFind/job004/micrographs_ctf.star", MICS_STAR);
    write_project_file(project.path(), "MotionCorr/job002/Movies/mic_001.mrc", "fake");
    write_project_file(project.path(), "MotionCorr/job002/Movies/mic_002.mrc", "fake");

    let args = pick_args("CtfFind/job004/micrographs_ctf.star", "External/topaz_fail");
    let tools = stub_topaz("false");

    env::set_current_dir(project.path()).unwrap();
    let ctx = job::JobContext::enter(&args.out_dir).unwrap();
    let err = job::run_with_markers(|| jobs::topaz_pick::run(&ctx, &args, &tools)).unwrap_err();
    assert!(err.to_string().contains("return code 1"));

    let job_dir = project.path().join("External/topaz_fail");
    assert!(job_dir.join(job::FAILURE_MARKER).is_file());
    assert!(!job_dir.join(job::SUCCESS_MARKER).exists());
    // The chain failed, so nothing was recorded as processed.
    assert!(!job_dir.join("done_mics.txt").exists());
}

#[test]
fn training_job_writes_config_stages_and_pipeline_stub() {
    let _guard = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // The filtered-scratch assertion below relies on the job-dir fallback.
    env::remove_var(jobs::cryolo_train::SCRATCH_ENV);
    let project = tempfile::tempdir().unwrap();
    write_project_file(project.path(), "Select/job009/particles.star", PARTS_STAR);
    write_project_file(project.path(), "Extract/job007/Movies/mic_a.mrc", "fake");
    write_project_file(project.path(), "Extract/job007/Movies/mic_b.mrc", "fake");

    let args = cli::TrainCli::parse_from([
        "external_job_cryolo_train",
        "--in_parts",
        "Select/job009/particles.star",
        "--o",
        "External/cryolo_training",
        "--model",
        "Models/gmodel.h5",
    ])
    .validated()
    .unwrap();

    let mut tools = ToolSettings::default();
    tools.cryolo.train_bin = "true".into();

    env::set_current_dir(project.path()).unwrap();
    let ctx = job::JobContext::enter(&args.out_dir).unwrap();
    job::run_with_markers(|| jobs::cryolo_train::run(&ctx, &args, &tools)).unwrap();

    let job_dir = project.path().join("External/cryolo_training");
    assert!(job_dir.join(job::SUCCESS_MARKER).is_file());

    // Tool config: unbinned box = floor(2.06/1.03) * 128 = 256.
    let config: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(job_dir.join("config_cryolo.json")).unwrap())
            .unwrap();
    assert_eq!(config["model"]["anchors"], serde_json::json!([256, 256]));
    assert_eq!(config["model"]["architecture"], "PhosaurusNet");
    assert_eq!(
        config["model"]["filter"][1],
        "External/cryolo_training/filtered_tmp/"
    );
    assert_eq!(config["train"]["pretrained_weights"], "Models/gmodel.h5");
    let saved = config["train"]["saved_weights_name"].as_str().unwrap();
    assert!(saved.ends_with("External/cryolo_training/fine_tuned_model.h5"));

    // Both micrographs staged (cap defaults to 20), annotations alongside.
    assert!(job_dir.join("train_image/mic_a.mrc").symlink_metadata().is_ok());
    assert!(job_dir.join("train_image/mic_b.mrc").symlink_metadata().is_ok());
    let annot = StarTable::read(&job_dir.join("train_annot/mic_b.star"), "").unwrap();
    assert_eq!(annot.column("rlnCoordinateX").unwrap(), vec!["10.0", "30.0"]);

    let pipeline = job_dir.join("job_pipeline.star");
    let general = StarTable::read(&pipeline, "pipeline_general").unwrap();
    assert_eq!(general.get(0, "rlnPipeLineJobCounter").unwrap(), "2");
    let edges = StarTable::read(&pipeline, "pipeline_input_edges").unwrap();
    assert_eq!(
        edges.get(0, "rlnPipeLineEdgeFromNode").unwrap(),
        "Select/job009/particles.star"
    );
}

#[test]
fn unreadable_particles_table_marks_the_job_failed() {
    let _guard = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let project = tempfile::tempdir().unwrap();
    // Optics only; the particles block is missing.
    let optics_only = PARTS_STAR.split("data_particles").next().unwrap();
    write_project_file(project.path(), "Select/job009/particles.star", optics_only);

    let args = cli::TrainCli::parse_from([
        "external_job_cryolo_train",
        "--in_parts",
        "Select/job009/particles.star",
        "--o",
        "External/cryolo_bad",
        "--model",
        "Models/gmodel.h5",
    ])
    .validated()
    .unwrap();

    let mut tools = ToolSettings::default();
    tools.cryolo.train_bin = "true".into();

    env::set_current_dir(project.path()).unwrap();
    let ctx = job::JobContext::enter(&args.out_dir).unwrap();
    let err = job::run_with_markers(|| jobs::cryolo_train::run(&ctx, &args, &tools)).unwrap_err();
    assert!(err.to_string().contains("particles"));

    let job_dir = project.path().join("External/cryolo_bad");
    // Every abort marks failure, including this one.
    assert!(job_dir.join(job::FAILURE_MARKER).is_file());
    assert!(!job_dir.join(job::SUCCESS_MARKER).exists());
    // The tool config had already been written before the abort.
    assert!(job_dir.join("config_cryolo.json").is_file());
}
