//! Commandline utility to carry atlas region masks onto a registered moving volume.
//!
//! Every selected atlas mask is warped through the inverse transform stored
//! by `registernii`, thresholded and cleaned. The results replace the
//! `region-masks/` directory next to the moving image.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use zebranii::ants::AntsToolkit;
use zebranii::atlas::{Atlas, Subset};
use zebranii::config::load_config;
use zebranii::logging;
use zebranii::masks::{region_masks_dir, transform_masks, MaskOptions};
use zebranii::nifti_io::read_volume;
use zebranii::registration::TransformPair;
use zebranii::{Error, Result};

#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// the atlas directory, as built by atlasnii
    #[arg(short, long)]
    atlas_directory: PathBuf,

    /// the registered moving nifti file
    #[arg(short, long)]
    moving_image: PathBuf,

    /// atlas masks to transform; all of them by default
    #[arg(long, num_args = 1..)]
    masks: Option<Vec<String>>,

    /// skip closing and small component removal
    #[arg(long)]
    no_cleanup: bool,

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

    let pair = TransformPair::for_moving(&cli.moving_image);
    if !pair.exists() {
        return Err(Error::MissingFile(pair.inverse));
    }
    let masks = match &cli.masks {
        Some(names) => Subset::Only(names),
        None => Subset::All,
    };
    let atlas = Atlas::load(&cli.atlas_directory, Subset::Nothing, masks)?;
    let moving = read_volume(&cli.moving_image)?;

    let cleanup = if config.cleanup.enabled && !cli.no_cleanup {
        Some(config.cleanup.params(moving.spacing())?)
    } else {
        None
    };
    let options = MaskOptions {
        threshold: config.cleanup.threshold,
        cleanup,
    };
    let toolkit = AntsToolkit::from_config(&config.registration);
    let out_dir = region_masks_dir(&cli.moving_image);
    let content = transform_masks(&toolkit, &atlas, &moving, &pair.inverse, &options, &out_dir)?;
    info!(regions = content.len(), directory = %out_dir.display(), "region masks ready");
    Ok(())
}

fn main() {
    let cli = Args::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error! {}", e);
        std::process::exit(e.exit_code());
    }
}
