use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::normalize::InspectMode;
use crate::receiver::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Fetch the result bundle of a finished simulation.
    #[command(alias = "r")]
    Results {
        /// Identifier of the simulation on the control service.
        #[arg(required = true)]
        id: String,

        /// File the received bundle is written to.
        #[arg(short, long, default_value = "results.tgz")]
        output: PathBuf,

        #[command(flatten)]
        fetch: FetchOpts,
    },

    /// Fetch the diagnostic bundle of a simulation.
    #[command(alias = "d")]
    Diagnostics {
        /// Identifier of the simulation on the control service.
        #[arg(required = true)]
        id: String,

        /// File the received bundle is written to.
        #[arg(short, long, default_value = "diagnostics.tgz")]
        output: PathBuf,

        #[command(flatten)]
        fetch: FetchOpts,
    },

    /// Normalize an already-downloaded bundle for local inspection.
    #[command(alias = "i")]
    Inspect {
        /// The bundle to inspect.
        #[arg(required = true)]
        archive: PathBuf,

        /// Directory the normalized tree is written to.
        #[arg(short, long)]
        output: PathBuf,

        /// Overwrite the destination directory if it already exists.
        #[arg(long)]
        force: bool,

        /// List every member while extracting.
        #[arg(short, long)]
        verbose: bool,

        /// Post-extraction fixup to apply to the inspected tree.
        #[arg(long, value_enum)]
        mode: Option<InspectMode>,
    },
}

/// Options shared by the two retrieval commands.
#[derive(ClapArgs, Clone, Debug)]
pub struct FetchOpts {
    /// Base URL of the control service.
    #[arg(long, env = "SIMFETCH_CONTROL_URL")]
    pub control: String,

    /// Port the upload endpoint listens on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Hostname the remote service should stream the bundle back to.
    #[arg(long, default_value = "localhost")]
    pub callback_host: String,

    /// Unpack the received bundle into this directory as-is.
    #[arg(long, value_name = "DIR", conflicts_with = "inspect")]
    pub unpack: Option<PathBuf>,

    /// Normalize the received bundle into this directory.
    #[arg(long, value_name = "DIR")]
    pub inspect: Option<PathBuf>,

    /// Overwrite the inspection directory if it already exists.
    #[arg(long)]
    pub force: bool,

    /// List every member while extracting.
    #[arg(short, long)]
    pub verbose: bool,

    /// Post-extraction fixup to apply to the inspected tree.
    #[arg(long, value_enum)]
    pub mode: Option<InspectMode>,
}

/// Parses command-line arguments using `clap` and returns the command to execute.
///
/// This is the main entry point for the CLI logic.
/// It handles parsing and returns a `Commands` enum variant, or an error if parsing fails.
pub fn run() -> Result<Commands, Box<dyn std::error::Error>> {
    let args = Args::parse();
    Ok(args.command)
}
