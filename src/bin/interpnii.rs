//! Commandline utility to interpolate a non-uniformly spaced plane stack.
//!
//! Planes between each pair of input planes are filled in linearly so that
//! the output stack is spaced `--target-spacing` apart.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use zebranii::config::load_config;
use zebranii::logging;
use zebranii::nifti_io::create_parent;
use zebranii::planes::{plane_file_names, read_planes, write_plane};
use zebranii::stack::interpolate_planes;
use zebranii::Result;

#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// plane image files, first plane first
    #[arg(long, num_args = 2.., required = true)]
    plane_images: Vec<PathBuf>,

    /// distance (µm) between neighbouring planes, once per pair or once for all
    #[arg(long, num_args = 1.., required = true)]
    plane_gaps: Vec<f64>,

    /// distance (µm) between output planes; must divide every gap
    #[arg(long)]
    target_spacing: f64,

    /// output path with one {} for the zero-padded plane index
    #[arg(short, long)]
    output_file_format: String,

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

    let planes = read_planes(&cli.plane_images)?;
    let interpolated = interpolate_planes(&planes, &cli.plane_gaps, cli.target_spacing)?;
    let paths = plane_file_names(&cli.output_file_format, interpolated.len())?;
    for (index, (plane, path)) in interpolated.iter().zip(&paths).enumerate() {
        create_parent(path)?;
        // interpolated values go back to the integer pixel depth of the inputs
        write_plane(path, &plane.mapv(f32::round), index)?;
    }
    info!(input = planes.len(), output = paths.len(), "wrote interpolated planes");
    Ok(())
}

fn main() {
    let cli = Args::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error! {}", e);
        std::process::exit(e.exit_code());
    }
}
