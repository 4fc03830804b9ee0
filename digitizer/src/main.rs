use anyhow::{bail, Context};
use clap::Parser;
use generator::section::{write_section, SectionConfig};
use segycore::telemetry::CancelFlag;
use std::path::PathBuf;
use std::thread;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Digitize scanned seismic sections into SEG-Y")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Tab-separated parameter file overriding the workflow's parameters
    #[arg(long)]
    par: Option<PathBuf>,
    /// SEG-Y output path, overriding the workflow's
    #[arg(long)]
    output: Option<PathBuf>,
    /// Directory receiving intermediate images and series
    #[arg(long)]
    diagnostics: Option<PathBuf>,
    /// Draw a synthetic section into this directory and digitize it
    #[arg(long)]
    synthetic: Option<PathBuf>,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Write the effective parameters of the run to a .par file
    #[arg(long)]
    save_par: Option<PathBuf>,
}

/// Cancels `flag` on the first Ctrl+C; the run stops at the next trace boundary.
fn spawn_ctrl_c_handler(flag: CancelFlag) -> anyhow::Result<()> {
    let runtime = TokioBuilder::new_current_thread()
        .enable_all()
        .build()
        .context("creating runtime for signal handling")?;
    thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            let received = runtime.block_on(signal::ctrl_c());
            match received {
                Ok(()) => {
                    log::warn!("interrupt received, stopping after the current trace");
                    flag.cancel();
                }
                Err(err) => log::error!("awaiting Ctrl+C: {}", err),
            }
        })
        .context("spawning signal thread")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut workflow_config = match (&args.workflow, &args.synthetic) {
        (Some(path), None) => WorkflowConfig::load(path)?,
        (None, Some(dir)) => {
            let config = SectionConfig {
                seed: args.seed,
                ..Default::default()
            };
            let workflow = write_section(&config, dir)?;
            println!("Synthetic section drawn into {}", dir.display());
            workflow
        }
        (Some(_), Some(_)) => bail!("--workflow and --synthetic are mutually exclusive"),
        (None, None) => bail!("either --workflow or --synthetic is required"),
    };
    if let Some(par) = args.par {
        workflow_config.par_file = Some(par);
    }
    if let Some(output) = args.output {
        workflow_config.output = output;
    }
    if let Some(dir) = args.diagnostics {
        workflow_config.diagnostics = Some(dir);
    }

    let cancel = CancelFlag::new();
    spawn_ctrl_c_handler(cancel.clone())?;

    let runner = Runner::new(workflow_config);
    let result = runner.execute(&cancel)?;

    if let Some(path) = args.save_par {
        result.par_file().save(&path)?;
        println!("Parameters saved to {}", path.display());
    }

    let summary = &result.summary;
    println!(
        "Digitized {} traces x {} samples ({} ms, {:.1}-{:.1} ms) -> {}",
        summary.traces,
        summary.samples_per_trace,
        summary.sample_interval_ms,
        summary.first_time_ms,
        summary.last_time_ms,
        summary.output.display()
    );
    println!(
        "Baselines raw {} filtered {} final {} (synthetic {}), expected {}",
        summary.raw_baselines,
        summary.filtered_baselines,
        summary.final_baselines,
        summary.synthetic_baselines,
        summary.expected_traces
    );
    if !summary.degenerate_traces.is_empty() {
        println!("Traces rebuilt from neighbours: {:?}", summary.degenerate_traces);
    }
    println!("Summary written to {}", result.summary_path.display());

    Ok(())
}
