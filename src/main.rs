extern crate covent;

use clap::Parser;
use covent::output::{FileOutput, SinkOutput};
use covent::run_control_session;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct CoventArgs {
    /// JSON configuration file (control parameters, runtime policy, scenario).
    config_file: PathBuf,
    /// Number of control cycles to run.
    #[arg(long, default_value_t = 30)]
    cycles: usize,
    /// Directory for the per-cycle CSV report; omitted means no report.
    #[arg(long, short)]
    output_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CoventArgs::parse();
    let config = BufReader::new(File::open(&args.config_file)?);

    match args.output_dir {
        Some(directory) => {
            run_control_session(config, FileOutput::new(directory), args.cycles)?;
        }
        None => {
            run_control_session(config, SinkOutput, args.cycles)?;
        }
    }

    Ok(())
}
