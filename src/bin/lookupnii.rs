//! Commandline utility to name the regions containing a voxel or world point.
//!
//! Prints one region name per line.

use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use tracing::info;

use zebranii::config::load_config;
use zebranii::logging;
use zebranii::masks::Segmentation;
use zebranii::{Error, Result};

#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
#[command(group(ArgGroup::new("location").required(true).args(["voxel", "point"])))]
struct Args {
    /// the region-masks directory written by warpnii
    #[arg(short, long)]
    region_masks: PathBuf,

    /// voxel index in the moving image
    #[arg(long, num_args = 3, value_names = ["I", "J", "K"])]
    voxel: Option<Vec<usize>>,

    /// world coordinates (µm) in the moving image space
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
    point: Option<Vec<f64>>,

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

    let segmentation = Segmentation::load(&cli.region_masks, None)?;
    let regions = match (&cli.voxel, &cli.point) {
        (Some(v), _) => segmentation.regions_at([v[0], v[1], v[2]])?,
        (None, Some(p)) => segmentation.regions_at_world([p[0], p[1], p[2]])?,
        (None, None) => {
            return Err(Error::invalid_parameter("location", "give --voxel or --point"))
        }
    };
    if regions.is_empty() {
        info!("no region contains this location");
    }
    for name in regions {
        println!("{name}");
    }
    Ok(())
}

fn main() {
    let cli = Args::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error! {}", e);
        std::process::exit(e.exit_code());
    }
}
