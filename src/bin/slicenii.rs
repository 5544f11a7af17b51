//! Commandline utility to split a NIfTI volume into a series of 2D plane images.
//!
//! The volume is reoriented (permutation and flips only) so that its planes
//! follow the requested stack layout. Planes are written as
//! `<basename>_planes/<basename>_plane-NNN.<ext>` next to a `stack.json`
//! sidecar that `stacknii` can read back.

use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tracing::info;

use zebranii::common::{volume_stem, Direction};
use zebranii::config::load_config;
use zebranii::logging;
use zebranii::nifti_io::read_volume;
use zebranii::planes::write_plane;
use zebranii::stack::{disassemble, Rotation, StackLayout, StackMetadata};
use zebranii::Result;

#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// the input nifti file
    #[arg(short, long)]
    input: PathBuf,

    /// the anatomical side the first plane should lie on
    #[arg(long)]
    plane_image_order: Direction,

    /// the sides the vertical and horizontal image axes should start from
    #[arg(long, num_args = 2, required = true, value_names = ["VERTICAL", "HORIZONTAL"])]
    plane_orientation: Vec<Direction>,

    /// counter-clockwise rotation the planes were stacked with, a multiple of 90 degrees
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    plane_rotation: f64,

    /// an output path where a NEW directory will be created to store the planes
    #[arg(short, long, default_value = "./")]
    output: PathBuf,

    /// image file extension, which selects the image format
    #[arg(short, long, default_value = "png")]
    extension: String,

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

    let layout = StackLayout::new(
        cli.plane_image_order,
        (cli.plane_orientation[0], cli.plane_orientation[1]),
        Rotation::from_degrees(cli.plane_rotation)?,
    );
    layout.validate()?;
    let volume = read_volume(&cli.input)?;
    let stack = disassemble(&volume, &layout)?;

    let basename = volume_stem(&cli.input);
    let save_dir = cli.output.join(format!("{basename}_planes"));
    fs::create_dir_all(&save_dir)?;
    for (index, plane) in stack.planes.iter().enumerate() {
        let save_index = format!("{:03}", index + 1);
        let path = save_dir.join(format!("{basename}_plane-{save_index}.{}", cli.extension));
        write_plane(&path, plane, index)?;
    }
    StackMetadata::new(&layout, stack.spacing, stack.plane_height)
        .save(&save_dir.join(StackMetadata::FILE_NAME))?;
    info!(planes = stack.planes.len(), directory = %save_dir.display(), "wrote planes");
    Ok(())
}

fn main() {
    let cli = Args::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error! {}", e);
        std::process::exit(e.exit_code());
    }
}
