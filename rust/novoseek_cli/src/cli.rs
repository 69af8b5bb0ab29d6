use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON configuration file (defaults are used when missing)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the spectra file (will over-write the config file)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Path to the output file, `.parquet` or `.csv`, or a directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Where to cache the knapsack index between runs
    #[arg(short, long)]
    pub knapsack_path: Option<PathBuf>,

    /// Number of beams to keep while decoding
    #[arg(short = 'b', long)]
    pub num_beams: Option<usize>,

    /// Refine low confidence predictions
    #[arg(long, overrides_with = "no_refine")]
    pub refine: bool,

    /// Disable refinement even if the config enables it
    #[arg(long)]
    pub no_refine: bool,

    /// Report annotated sequences from the input as targets
    #[arg(long)]
    pub with_targets: bool,

    /// Write a configuration template with all the defaults and exit
    #[arg(long)]
    pub write_template: Option<PathBuf>,
}
