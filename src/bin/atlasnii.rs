//! Commandline utility to build an atlas directory from a raw atlas distribution.
//!
//! The source directory holds `reference.nii[.gz]`, `labels/` and `masks/`.
//! A selection file picks and renames datasets; without one every dataset is
//! taken under its own name.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use zebranii::atlas::{build_atlas, AtlasSelection, DirectorySource};
use zebranii::common::regularise_name;
use zebranii::config::load_config;
use zebranii::logging;
use zebranii::Result;

#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// name of the atlas, used for its directory
    #[arg(short, long)]
    name: String,

    /// directory the atlas directory is created in
    #[arg(short, long, default_value = "./")]
    output_directory: PathBuf,

    /// the raw atlas directory
    #[arg(short, long)]
    source_directory: PathBuf,

    /// TOML file mapping atlas names to source dataset names
    #[arg(long)]
    selection: Option<PathBuf>,

    /// voxel spacing (µm) of the atlas; the source grid is kept otherwise
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"])]
    spacing: Option<Vec<f64>>,

    /// configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// log debug output
    #[arg(short, long)]
    verbose: bool,
}

fn run(cli: Args) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    logging::init(logging::level_for(&config.logging.level, cli.verbose));

    let source = DirectorySource::open(&cli.source_directory)?;
    let selection = cli.selection.as_deref().map(AtlasSelection::load).transpose()?;
    let spacing = cli.spacing.as_ref().map(|s| [s[0], s[1], s[2]]);
    let directory = cli.output_directory.join(regularise_name(&cli.name));
    let content = build_atlas(&source, selection.as_ref(), spacing, &directory)?;
    info!(
        atlas = %directory.display(),
        labels = content.labels.len(),
        masks = content.masks.len(),
        "built atlas"
    );
    Ok(())
}

fn main() {
    let cli = Args::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error! {}", e);
        std::process::exit(e.exit_code());
    }
}
