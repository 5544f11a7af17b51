//! Commandline utility to register a moving volume to one label of an atlas.
//!
//! Transforms are stored next to the moving image in `registration/`, where
//! `warpnii` picks them up.

use clap::Parser;
use std::path::PathBuf;

use zebranii::ants::{AntsToolkit, Preset};
use zebranii::atlas::{Atlas, Subset};
use zebranii::config::load_config;
use zebranii::logging;
use zebranii::nifti_io::read_volume;
use zebranii::registration::run_registration;
use zebranii::Result;

#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// the atlas directory, as built by atlasnii
    #[arg(short, long)]
    atlas_directory: PathBuf,

    /// atlas label the moving image is registered to
    #[arg(short, long)]
    registration_label: String,

    /// the moving nifti file
    #[arg(short, long)]
    moving_image: PathBuf,

    /// registration stages; overrides the configuration
    #[arg(short, long)]
    preset: Option<Preset>,

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

    let label = [cli.registration_label.clone()];
    let atlas = Atlas::load(&cli.atlas_directory, Subset::Only(&label), Subset::Nothing)?;
    let fixed = atlas.label(&cli.registration_label)?;
    let moving = read_volume(&cli.moving_image)?;

    let mut toolkit = AntsToolkit::from_config(&config.registration);
    if let Some(preset) = cli.preset {
        toolkit = toolkit.with_preset(preset);
    }
    let pair = run_registration(&toolkit, fixed, &moving, &cli.moving_image)?;
    println!("{}", pair.forward.display());
    println!("{}", pair.inverse.display());
    Ok(())
}

fn main() {
    let cli = Args::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error! {}", e);
        std::process::exit(e.exit_code());
    }
}
