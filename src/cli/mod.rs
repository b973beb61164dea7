// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses the command line with clap and hands a validated
// Options value to Layer 2. No training logic lives here.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, TrainArgs};

use crate::application::{options::Options, train_use_case::TrainUseCase};

#[derive(Parser, Debug)]
#[command(
    name = "event-extract-train",
    version = "0.1.0",
    about = "Train and evaluate the trigger, role and attribution models of an event-extraction pipeline."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch the parsed subcommand.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    let options = Options::try_from(args)?;
    tracing::info!("Training {} into '{}'", options.task_type, options.output_dir.display());

    TrainUseCase::new(options).execute()?;

    println!("Training complete.");
    Ok(())
}
