use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use thumbstack_lib::commands;
use thumbstack_lib::domain::config_manager::{load_config, CONFIG_FILENAME};
use thumbstack_lib::domain::estimator::KszEstimator;

/// Aperture-photometry stacking of CMB maps on a galaxy catalog
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Analysis configuration (JSON or TOML). THUMBSTACK__* environment
    /// variables override its fields.
    #[arg(short, long, default_value = CONFIG_FILENAME, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file if none exists
    InitConfig,
    /// Print the resolved configuration
    ShowConfig,
    /// Filter every object and persist the tables
    Filter {
        /// Recompute even if matching tables exist
        #[arg(long)]
        force: bool,
        /// Worker threads, 0 = all cores
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Stack the persisted filter outputs of the selected objects
    Stack,
    /// Calibrate the noise and measure the kSZ amplitude
    Estimate {
        /// Run a single estimator instead of all of them
        #[arg(short, long, value_enum)]
        estimator: Option<KszEstimator>,
    },
    /// Dump the stamp of one object as a FITS cube
    Stamp {
        #[arg(short, long)]
        index: usize,
        #[arg(short, long, default_value = "stamp.fits")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let report = if let Command::InitConfig = args.command {
        commands::config::init_config(&args.config)?
    } else {
        let mut config = load_config(&args.config)?;
        match args.command {
            Command::InitConfig | Command::ShowConfig => commands::config::show_config(&config)?,
            Command::Filter { force, workers } => {
                if let Some(w) = workers {
                    config.workers = w;
                }
                commands::filter::run_filter(&config, force)?
            }
            Command::Stack => commands::stack::run_stack(&config)?,
            Command::Estimate { estimator } => commands::estimate::run_estimate(&config, estimator)?,
            Command::Stamp { index, output } => commands::stamp::dump_stamp(&config, index, &output)?,
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
