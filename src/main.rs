//! synctool - additive folder sync from the command line.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, warn};

use synctool_lib::logging::{init_logging, LogConfig};
use synctool_lib::{SyncEngine, SyncOptions, SyncOutcome, SyncRequest, TransferControl};

/// Resolution of the progress bar; fractions are scaled onto it.
const BAR_TICKS: u64 = 1000;

/// Copy a folder's contents into another folder without deleting anything
#[derive(Parser)]
#[command(name = "synctool", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Folder whose contents are copied
    source: PathBuf,

    /// Folder receiving the copy; created if missing
    target: PathBuf,

    /// Program used for the external mirror attempt
    #[arg(long, value_name = "PROGRAM")]
    mirror_program: Option<PathBuf>,

    /// Skip the mirror tool and use the built-in copy
    #[arg(long)]
    no_mirror: bool,

    /// Print the outcome as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn options(&self) -> SyncOptions {
        let mut options = SyncOptions::from_env();
        if let Some(program) = &self.mirror_program {
            options.mirror_program = program.clone();
        }
        if self.no_mirror {
            options.use_mirror = false;
        }
        options
    }
}

fn progress_bar(hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(BAR_TICKS);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{wide_bar:.cyan/blue}] {percent:>3}% {msg}")?
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&LogConfig::from_verbosity(cli.verbose));

    let engine = SyncEngine::new(cli.options());
    let request = SyncRequest::new(&cli.source, &cli.target);
    let control = TransferControl::new();

    let interrupt = control.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                debug!("Interrupt received, cancelling");
                interrupt.cancel();
            }
            Err(e) => warn!("Could not listen for Ctrl-C: {}", e),
        }
    });

    let pb = progress_bar(cli.json)?;
    let bar = pb.clone();
    let outcome = engine
        .perform_sync(
            &request,
            move |update| {
                bar.set_position((update.fraction * BAR_TICKS as f64).round() as u64);
                bar.set_message(update.label);
            },
            &control,
        )
        .await;
    pb.finish_and_clear();

    if cli.json {
        println!("{}", serde_json::to_string(&outcome)?);
    } else {
        match &outcome {
            SyncOutcome::Completed { summary } => println!("{}", summary.trim_end()),
            SyncOutcome::Cancelled => eprintln!("Sync cancelled"),
            SyncOutcome::Failed { message } => eprintln!("Sync failed: {}", message),
        }
    }

    Ok(match outcome {
        SyncOutcome::Completed { .. } => ExitCode::SUCCESS,
        SyncOutcome::Cancelled => ExitCode::from(130),
        SyncOutcome::Failed { .. } => ExitCode::FAILURE,
    })
}
