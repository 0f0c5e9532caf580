// CLI for the latency numbers harness

use clap::{CommandFactory, FromArgMatches, Parser};
use numbers::pipeline::{Pipeline, Settings};
use numbers::probe::CapabilitySnapshot;
use numbers::report;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trial_bench::{CancelFlag, TrialEngine};

// setup command line args

#[derive(Parser)]
#[command(about = "Measures cache, memory, branch, lock and disk latencies on this machine.")]
pub struct CliArgs {
    /// Print the per-trial table of every benchmark as well.
    #[clap(short, long, action)]
    verbose: bool,

    /// Epochs for the repeatable benchmarks.
    #[clap(long, default_value_t = 11)]
    epochs: u32,

    /// Minimum duration of one epoch, in milliseconds.
    #[clap(long, default_value_t = 10)]
    min_epoch_ms: u64,

    /// Directory for the temporary disk benchmark file (default: current directory).
    #[clap(long)]
    dir: Option<PathBuf>,
}

fn main() -> Result<(), String> {
    env_logger::init();

    let help_snapshot = CapabilitySnapshot::probe(Path::new("."));
    let matches = CliArgs::command()
        .after_help(numbers::describe(&help_snapshot))
        .get_matches();
    let args = CliArgs::from_arg_matches(&matches).map_err(|e| e.to_string())?;

    let disk_dir = match args.dir {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(|e| e.to_string())?,
    };
    let snapshot = CapabilitySnapshot::probe(&disk_dir);
    log::info!("{snapshot:?}");

    // Ctrl-C only raises the flag; the run stops at the next epoch boundary
    // and unwinds, which removes the disk benchmark file
    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || handler_flag.cancel()).map_err(|e| e.to_string())?;

    let engine = TrialEngine::new(trial_bench::open_counters(), cancel);
    if !engine.counters_available() {
        log::warn!("hardware counters unavailable; cycle figures will be omitted");
    }
    let settings = Settings {
        epochs: args.epochs,
        min_epoch_time: Duration::from_millis(args.min_epoch_ms),
        disk_dir,
        verbose: args.verbose,
    };

    let mut pipeline = Pipeline::new(&snapshot, settings, engine).map_err(|e| e.to_string())?;
    let measurements = pipeline.run().map_err(|e| e.to_string())?;

    let figures = report::aggregate(&measurements);
    print!("{}", report::render_figures(&figures));

    Ok(())
}
