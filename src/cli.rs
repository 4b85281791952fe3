//! Command-line interfaces for the two external-job runners.
//!
//! RELION invokes these executables directly, so flag spelling (including
//! `--o` and the underscored names) is part of the pipeline contract, as is
//! exiting with status 1 when a required flag is missing. clap's own
//! `required` handling exits with status 2, hence the manual checks here.

use clap::Parser;

/// Fine-tune a crYOLO picking model on the most populated micrographs of a
/// particle set. Run from the RELION project directory, e.g.:
/// `external_job_cryolo_train --o External/cryolo_training --in_parts Select/job004/particles.star --n 20`
#[derive(Debug, Parser, Clone)]
#[command(name = "external_job_cryolo_train", version)]
pub struct TrainCli {
    /// Input particles STAR file
    #[arg(long = "in_parts")]
    pub in_parts: Option<String>,

    /// Output job directory
    #[arg(long = "o")]
    pub out_dir: Option<String>,

    /// crYOLO pretrained model (the configured general model when omitted)
    #[arg(long)]
    pub model: Option<String>,

    /// GPUs to use (e.g. "0,1,2,3")
    #[arg(long, default_value = "0")]
    pub gpu: String,

    /// Train only on the N most populated micrographs (<= 0 keeps all)
    #[arg(long, default_value_t = 20)]
    pub n: i64,

    /// Not used here; RELION always passes it
    #[arg(long = "j")]
    pub threads: Option<String>,

    /// Not used here; RELION always passes it
    #[arg(long = "pipeline_control")]
    pub pipeline_control: Option<String>,
}

/// Validated training arguments.
#[derive(Debug, Clone)]
pub struct TrainArgs {
    pub in_parts: String,
    pub out_dir: String,
    pub model: Option<String>,
    pub gpu: String,
    pub n: i64,
}

impl TrainCli {
    /// Required-flag and extension checks. The returned error is the exact
    /// diagnostic to print before exiting with status 1.
    pub fn validated(self) -> Result<TrainArgs, String> {
        let (in_parts, out_dir) =
            require_star_input(self.in_parts, self.out_dir, "--in_parts", "particles")?;
        Ok(TrainArgs {
            in_parts,
            out_dir,
            model: self.model,
            gpu: self.gpu,
            n: self.n,
        })
    }
}

/// Pick particles with Topaz over a micrograph set, incrementally across
/// reruns. Run from the RELION project directory, e.g.:
/// `external_job_topaz --o External/topaz_picking --in_mics CtfFind/job004/micrographs_ctf.star --diam 120`
#[derive(Debug, Parser, Clone)]
#[command(name = "external_job_topaz", version)]
pub struct PickCli {
    /// Input micrographs STAR file
    #[arg(long = "in_mics")]
    pub in_mics: Option<String>,

    /// Output job directory
    #[arg(long = "o")]
    pub out_dir: Option<String>,

    /// Number of CPU threads
    #[arg(long = "j", default_value_t = 1)]
    pub threads: u32,

    /// Number of worker processes
    #[arg(long, default_value_t = 1)]
    pub workers: u32,

    /// Particle diameter in Angstrom
    #[arg(long, default_value_t = 120)]
    pub diam: i64,

    /// Threshold for picking
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub threshold: f64,

    /// Trained picking model ("None" uses the tool's built-in model)
    #[arg(long, default_value = "None")]
    pub model: String,

    /// GPU to use
    #[arg(long, default_value = "0")]
    pub gpu: String,

    /// Not used here; RELION always passes it
    #[arg(long = "pipeline_control")]
    pub pipeline_control: Option<String>,
}

/// Validated picking arguments.
#[derive(Debug, Clone)]
pub struct PickArgs {
    pub in_mics: String,
    pub out_dir: String,
    pub threads: u32,
    pub workers: u32,
    pub diam: i64,
    pub threshold: f64,
    pub model: String,
    pub gpu: String,
}

impl PickCli {
    /// Required-flag and extension checks, as for `TrainCli::validated`.
    pub fn validated(self) -> Result<PickArgs, String> {
        let (in_mics, out_dir) =
            require_star_input(self.in_mics, self.out_dir, "--in_mics", "micrographs")?;
        Ok(PickArgs {
            in_mics,
            out_dir,
            threads: self.threads,
            workers: self.workers,
            diam: self.diam,
            threshold: self.threshold,
            model: self.model,
            gpu: self.gpu,
        })
    }
}

fn require_star_input(
    input: Option<String>,
    out_dir: Option<String>,
    flag: &str,
    kind: &str,
) -> Result<(String, String), String> {
    let (input, out_dir) = match (input, out_dir) {
        (Some(i), Some(o)) => (i, o),
        _ => return Err(format!("Error: {flag} and --o are required params!")),
    };
    if !input.ends_with(".star") {
        return Err(format!("Error: {flag} must point to a {kind} star file"));
    }
    Ok((input, out_dir))
}
