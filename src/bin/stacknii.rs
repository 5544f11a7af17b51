//! Commandline utility to stack a series of 2D plane images into a NIfTI volume.
//!
//! Planes are given either as an explicit list or as a directory plus a file
//! name prefix, in which case they are ordered by the last number in their
//! file names. The stack layout and spacing come from flags or from a
//! `stack.json` sidecar as written by `slicenii`.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use zebranii::common::Direction;
use zebranii::config::load_config;
use zebranii::logging;
use zebranii::nifti_io::{write_mask, write_volume};
use zebranii::planes::{discover_planes, normalise, read_planes};
use zebranii::stack::{assemble, PlaneSpacing, Rotation, StackGeometry, StackLayout, StackMetadata};
use zebranii::{Error, Result};

#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// plane image files, first plane first
    #[arg(long, num_args = 1.., conflicts_with = "input_dir")]
    plane_images: Vec<PathBuf>,

    /// directory holding the plane images
    #[arg(short, long)]
    input_dir: Option<PathBuf>,

    /// select plane images in the input directory by the start of their file names
    #[arg(short, long, default_value = "")]
    start_string: String,

    /// a stack.json sidecar with the layout and spacing. Defaults to the
    /// sidecar in the input directory when no layout flags are given.
    #[arg(short, long)]
    metadata: Option<PathBuf>,

    /// the anatomical side the first plane lies on
    #[arg(long)]
    plane_image_order: Option<Direction>,

    /// the sides the vertical and horizontal image axes start from
    #[arg(long, num_args = 2, value_names = ["VERTICAL", "HORIZONTAL"])]
    plane_orientation: Vec<Direction>,

    /// pixel spacing (µm) along image rows and columns
    #[arg(long, num_args = 2, value_names = ["ROW", "COLUMN"])]
    plane_spacing: Vec<f64>,

    /// distance (µm) between planes
    #[arg(long)]
    plane_height: Option<f64>,

    /// counter-clockwise rotation of every plane, a multiple of 90 degrees
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    plane_rotation: f64,

    /// normalise to [0, 1] and threshold at 0.5
    #[arg(long)]
    as_mask: bool,

    /// the output nifti file (.nii or .nii.gz); must not exist yet
    #[arg(short, long)]
    output: PathBuf,

    /// configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// log debug output
    #[arg(short, long)]
    verbose: bool,
}

fn geometry_from_flags(cli: &Args) -> Result<StackGeometry> {
    let missing = |flag: &str| Error::invalid_parameter(flag, "required without a stack.json sidecar");
    let order = cli.plane_image_order.ok_or_else(|| missing("--plane-image-order"))?;
    let (vertical, horizontal) = match cli.plane_orientation[..] {
        [v, h] => (v, h),
        _ => return Err(missing("--plane-orientation")),
    };
    let spacing = match cli.plane_spacing[..] {
        [row, column] => PlaneSpacing::new(row, column),
        _ => return Err(missing("--plane-spacing")),
    };
    let height = cli.plane_height.ok_or_else(|| missing("--plane-height"))?;
    let layout = StackLayout::new(order, (vertical, horizontal), Rotation::from_degrees(cli.plane_rotation)?);
    StackGeometry::new(layout, spacing, height)
}

fn sidecar(cli: &Args) -> Option<PathBuf> {
    if let Some(path) = &cli.metadata {
        return Some(path.clone());
    }
    if cli.plane_image_order.is_some() {
        return None;
    }
    cli.input_dir
        .as_ref()
        .map(|dir| dir.join(StackMetadata::FILE_NAME))
        .filter(|path| path.is_file())
}

fn run(cli: Args) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    logging::init(logging::level_for(&config.logging.level, cli.verbose));

    if cli.output.exists() {
        return Err(Error::AlreadyExists(cli.output.clone()));
    }
    let geometry = match sidecar(&cli) {
        Some(path) => {
            info!(path = %path.display(), "reading stack layout");
            StackMetadata::load(&path)?.geometry()?
        }
        None => geometry_from_flags(&cli)?,
    };
    let paths = match &cli.input_dir {
        Some(dir) => discover_planes(dir, &cli.start_string)?,
        None => cli.plane_images.clone(),
    };
    let planes = read_planes(&paths)?;
    let volume = assemble(&planes, &geometry)?;
    info!(shape = ?volume.shape(), spacing = ?volume.spacing(), "assembled volume");

    if cli.as_mask {
        let scaled = normalise(volume.data());
        write_mask(&cli.output, &volume.with_data(scaled.mapv(|v| v > 0.5))?)?;
    } else {
        write_volume(&cli.output, &volume)?;
    }
    info!(output = %cli.output.display(), "wrote volume");
    Ok(())
}

fn main() {
    let cli = Args::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error! {}", e);
        std::process::exit(e.exit_code());
    }
}
