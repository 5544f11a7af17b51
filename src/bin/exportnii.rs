//! Commandline utility to export region masks plane by plane.
//!
//! Writes LabelMe polygon annotations or PNG outline overlays for every plane
//! of the moving image along one volume axis.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use zebranii::common::VolumeAxis;
use zebranii::config::load_config;
use zebranii::export::{export_planes, select_regions, ExportFormat};
use zebranii::logging;
use zebranii::masks::{region_masks_dir, Segmentation};
use zebranii::nifti_io::read_volume;
use zebranii::{Error, Result};

#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// the moving nifti file the region masks were transformed onto
    #[arg(short, long)]
    moving_image: PathBuf,

    /// output path with one {} for the zero-padded plane index
    #[arg(short, long)]
    output_file_format: String,

    /// labelme or raster
    #[arg(short, long)]
    export_format: ExportFormat,

    /// regions to export; all of them by default
    #[arg(long, num_args = 1..)]
    masks: Option<Vec<String>>,

    /// Number for the axis planes are taken across:
    ///     0 -> X, 1 -> Y, 2 -> Z
    #[arg(short, long, default_value_t = 2)]
    axis: usize,

    /// region mask covering the right hemisphere; splits every region in two
    #[arg(long)]
    hemisphere_mask: Option<String>,

    /// also export hole boundaries
    #[arg(long)]
    include_holes: bool,

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

    let axis = VolumeAxis::from_usize(cli.axis)
        .ok_or_else(|| Error::invalid_parameter("axis", format!("{} is not 0, 1 or 2", cli.axis)))?;
    let moving = read_volume(&cli.moving_image)?;
    let segmentation = Segmentation::load(&region_masks_dir(&cli.moving_image), None)?;
    let regions = select_regions(
        &segmentation,
        cli.masks.as_deref(),
        cli.hemisphere_mask.as_deref(),
    )?;
    let paths = export_planes(
        &moving,
        &regions,
        cli.export_format,
        axis,
        &cli.output_file_format,
        cli.include_holes || config.export.include_holes,
    )?;
    info!(files = paths.len(), "exported segmentation");
    Ok(())
}

fn main() {
    let cli = Args::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error! {}", e);
        std::process::exit(e.exit_code());
    }
}
