//! Topaz picking job.
//!
//! Stages whatever the ledger has not seen yet, runs the four-stage Topaz
//! chain (preprocess, extract, convert, split) as one `sh -c` child, moves
//! the per-micrograph coordinate files where RELION expects them, and on
//! the first successful run emits the suggested extraction parameters.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::cli::PickArgs;
use crate::job::JobContext;
use crate::ledger::Ledger;
use crate::model::SuggestedBoxes;
use crate::params;
use crate::settings::ToolSettings;
use crate::shell::CommandChain;
use crate::staging;
use crate::star::StarTable;

pub const LEDGER_FILE: &str = "done_mics.txt";
pub const PARAMS_FILE: &str = "output_for_relion.star";
const PREPROCESSED_DIR: &str = "preprocessed";
const OUTPUT_DIR: &str = "output";
const COORDS_SUFFIX_FILE: &str = "coords_suffix_topaz.star";
const OUTPUT_NODES_FILE: &str = "RELION_OUTPUT_NODES.star";
const MANUAL_PICK_FILE: &str = ".gui_manualpickjob.star";

pub fn run(ctx: &JobContext, args: &PickArgs, tools: &ToolSettings) -> Result<()> {
    let started = Instant::now();

    let model = if args.model != "None" {
        Some(ctx.project_path(&args.model))
    } else {
        None
    };

    let in_mics = ctx.project_path(&args.in_mics);
    let optics = StarTable::read(&in_mics, "optics")
        .with_context(|| format!("cannot read optics table from {}", args.in_mics))?;
    let angpix = optics.parse_f64(0, "rlnMicrographPixelSize")?;
    let mics = StarTable::read(&in_mics, "micrographs")
        .with_context(|| format!("cannot read micrographs table from {}", args.in_mics))?;
    let mic_names = mics.column("rlnMicrographName")?;

    let scale = params::downscale_factor(args.diam, angpix);
    println!("Using downscale factor {scale} for {} A particle", args.diam);

    let mut ledger = Ledger::load(Path::new(LEDGER_FILE))?;
    let plan = staging::plan_picking(&mic_names, &ledger)?;
    let staged_dirs = staging::stage_picking(&ctx.project_dir, Path::new("."), &plan)?;

    if plan.entries.is_empty() {
        println!("All mics picked! Nothing to do.");
        return Ok(());
    }

    fs::create_dir_all(OUTPUT_DIR).context("cannot create output directory")?;

    let mut chain = CommandChain::with_activation(tools.topaz.activate.as_deref());

    let mut preprocess = format!(
        "{} preprocess --scale {scale} --destdir {PREPROCESSED_DIR} --num-workers {} --num-threads {}",
        tools.topaz.bin, args.workers, args.threads
    );
    for dir in &staged_dirs {
        // Skip staged folders that hold no micrographs.
        if dir_has_entries_with(Path::new(dir), &plan.extension)? {
            preprocess.push_str(&format!(" {dir}/*{}", plan.extension));
        }
    }
    chain.push(preprocess);

    let radius = params::extraction_radius(args.diam, angpix, scale);
    let mut extract = format!(
        "{} extract --radius {radius} --up-scale {scale} --threshold {} --output {OUTPUT_DIR}/coords.txt --num-workers {} --num-threads {} --device {}",
        tools.topaz.bin, args.threshold, args.workers, args.threads, args.gpu
    );
    if let Some(model) = &model {
        extract.push_str(&format!(" --model {}", model.display()));
    }
    extract.push_str(&format!(" {PREPROCESSED_DIR}/*.mrc"));
    chain.push(extract);

    chain.push(format!(
        "{} convert -t 0 -o {OUTPUT_DIR}/coords.star {OUTPUT_DIR}/coords.txt",
        tools.topaz.bin
    ));
    chain.push(format!(
        "{} split --output {OUTPUT_DIR} {OUTPUT_DIR}/coords.star",
        tools.topaz.bin
    ));

    println!("Running commands:");
    for part in chain.parts() {
        println!("{part}");
    }
    chain.run()?;

    fs::remove_dir_all(PREPROCESSED_DIR).context("cannot remove preprocessed directory")?;

    // The ledger is only updated after the chain succeeded, so it never
    // records a micrograph that was not actually processed.
    ledger.append(plan.entries.iter().map(|e| e.key.as_str()))?;
    for entry in &plan.entries {
        fs::remove_file(&entry.key)
            .with_context(|| format!("cannot remove staged link {}", entry.key))?;
        let stem = Path::new(&entry.key)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let picked = Path::new(OUTPUT_DIR).join(format!("{stem}.star"));
        if picked.exists() {
            let dest = ctx.job_path(&entry.coords_star);
            fs::rename(&picked, &dest)
                .with_context(|| format!("cannot move {} to {}", picked.display(), dest.display()))?;
        }
    }
    fs::remove_dir_all(OUTPUT_DIR).context("cannot remove output directory")?;

    fs::write(COORDS_SUFFIX_FILE, &args.in_mics)
        .with_context(|| format!("cannot write {COORDS_SUFFIX_FILE}"))?;

    let mut nodes = StarTable::with_columns(&["rlnPipeLineNodeName", "rlnPipeLineNodeType"]);
    let suffix_node = Path::new(&args.out_dir)
        .join(COORDS_SUFFIX_FILE)
        .display()
        .to_string();
    nodes.add_row(&[suffix_node.as_str(), "2"]);
    nodes
        .write_file(Path::new(OUTPUT_NODES_FILE), "output_nodes")
        .with_context(|| format!("cannot write {OUTPUT_NODES_FILE}"))?;

    let params_path = ctx.job_path(PARAMS_FILE);
    if !params_path.exists() {
        let boxes = SuggestedBoxes::derive(args.diam, angpix);
        println!(
            "\nSuggested parameters:\n\tDiameter (A): {}\n\tBox size (px): {}\n\tBox size binned (px): {}",
            boxes.diameter, boxes.full_box, boxes.binned_box
        );

        let mut picker = StarTable::with_columns(&[
            "rlnParticleDiameter",
            "rlnOriginalImageSize",
            "rlnImageSize",
        ]);
        let (diameter, full_box, binned_box) = (
            boxes.diameter.to_string(),
            boxes.full_box.to_string(),
            boxes.binned_box.to_string(),
        );
        picker.add_row(&[diameter.as_str(), full_box.as_str(), binned_box.as_str()]);
        picker
            .write_file(&params_path, "picker")
            .with_context(|| format!("cannot write {PARAMS_FILE}"))?;

        fs::write(ctx.project_path(MANUAL_PICK_FILE), manual_pick_star(boxes.diameter))
            .with_context(|| format!("cannot write {MANUAL_PICK_FILE}"))?;
    }

    let elapsed = Duration::from_secs(started.elapsed().as_secs());
    println!("Job duration = {}", humantime::format_duration(elapsed));
    Ok(())
}

fn dir_has_entries_with(dir: &Path, extension: &str) -> Result<bool> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("cannot list staging dir {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("cannot list staging dir {}", dir.display()))?;
        if entry.file_name().to_string_lossy().ends_with(extension) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Display configuration for the manual-pick GUI job, written to the project
/// root so picks can be inspected immediately. The text is a fixed template;
/// only the diameter is substituted.
const MANUAL_PICK_TEMPLATE: &str = r#"
# version 30001

data_job

_rlnJobType                             3
_rlnJobIsContinue                       0


# version 30001

data_joboptions_values

loop_
_rlnJobOptionVariable #1
_rlnJobOptionValue #2
    angpix         -1
 black_val          0
blue_value          0
color_label rlnParticleSelectZScore
  ctfscale          1
  diameter         {diameter}
  do_color         No
  do_queue         No
do_startend        No
  fn_color         ""
     fn_in         ""
  highpass         -1
   lowpass         20
  micscale        0.2
min_dedicated       1
other_args         ""
      qsub       qsub
qsubscript /public/EM/RELION/relion/bin/relion_qsub.csh
 queuename    openmpi
 red_value          2
sigma_contrast      3
 white_val          0
"#;

fn manual_pick_star(diameter: i64) -> String {
    MANUAL_PICK_TEMPLATE.replace("{diameter}", &diameter.to_string())
}
