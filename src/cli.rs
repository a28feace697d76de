//! Command-line interface for wavetile
//!
//! Handles argument parsing and logging configuration.

use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

/// wavetile - waveform tiles, live spectrum and recording on PipeWire
#[derive(Parser, Debug)]
#[command(name = "wavetile")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace, -vvvv = trace including PipeWire
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Print waveform tiles of a WAV file as JSON lines
    Tiles {
        file: PathBuf,
        /// Tiles spanning the whole file; defaults to the configured zoom
        #[arg(short, long)]
        zoom: Option<f64>,
        /// First tile index
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        offset: i64,
        /// Number of tiles to print; all remaining tiles when omitted
        #[arg(short, long)]
        count: Option<u64>,
    },

    /// Print a whole-file RMS summary
    Overview {
        file: PathBuf,
        #[arg(short, long, default_value_t = 80)]
        bins: usize,
    },

    /// Run the spectrum bar pipeline over a WAV file block by block
    Spectrum {
        file: PathBuf,
        #[arg(short, long)]
        bins: Option<usize>,
        /// Samples per block
        #[arg(short = 'l', long)]
        block: Option<usize>,
    },

    /// Record from the default input
    Record {
        #[arg(short, long, default_value_t = 5.0)]
        seconds: f64,
    },

    /// Play a WAV file
    Play {
        file: PathBuf,
        #[arg(short, long, default_value_t = 1.0)]
        rate: f32,
        #[arg(long)]
        reverse: bool,
        /// Start position as a fraction of the file
        #[arg(short, long)]
        seek: Option<f64>,
    },
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Keep dependencies at warn
    builder.filter_level(LevelFilter::Warn);
    builder.filter_module("wavetile", args.log_level());

    if args.verbose >= 4 {
        builder.filter_module("pipewire", args.log_level());
    }

    builder.format_timestamp_millis().init();
}
