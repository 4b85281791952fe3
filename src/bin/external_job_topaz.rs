use anyhow::Result;
use clap::Parser;
use relion_external_jobs::{cli, job, jobs, settings};

fn main() -> Result<()> {
    let args = match cli::PickCli::parse().validated() {
        Ok(args) => args,
        Err(msg) => {
            // Usage errors go to stdout with exit status 1, before any job
            // directory side effect.
            println!("{msg}");
            std::process::exit(1);
        }
    };

    let tools = settings::ToolSettings::load()?;
    let ctx = job::JobContext::enter(&args.out_dir)?;
    job::run_with_markers(|| jobs::topaz_pick::run(&ctx, &args, &tools))
}
