use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch the input directory and clean new videos one at a time
    Watch {
        /// Start without checking ffmpeg, directories and the inpaint service
        #[arg(long)]
        skip_validation: bool,
    },

    /// Clean a single video now
    Process {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Watermark corners: lt, rb or lt_rb
        #[arg(long)]
        corners: Option<String>,
    },

    /// Show the state of a running watcher
    Status {
        /// Print the raw status JSON
        #[arg(long)]
        json: bool,
    },

    /// Check ffmpeg, directories and the inpaint service
    Validate,

    /// Write the default configuration as TOML
    InitConfig {
        /// Destination file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
