//! Commandline utility to resample a NIfTI volume to a new voxel spacing, or
//! onto the voxel grid of a reference volume.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use zebranii::config::load_config;
use zebranii::logging;
use zebranii::nifti_io::{read_volume, write_volume};
use zebranii::resample::{resample, resample_to_grid, Interpolation};
use zebranii::{Error, Result};

#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// the input nifti file
    #[arg(short, long)]
    input: PathBuf,

    /// new voxel spacing (µm) along the three volume axes
    #[arg(short, long, num_args = 3, value_names = ["X", "Y", "Z"])]
    spacing: Vec<f64>,

    /// a nifti file whose voxel grid the input is resampled onto
    #[arg(short, long, conflicts_with = "spacing")]
    reference: Option<PathBuf>,

    /// nearest suits masks
    #[arg(long, value_enum, default_value_t = Interpolation::Linear)]
    interpolation: Interpolation,

    /// the output nifti file
    #[arg(short, long)]
    output: PathBuf,

    /// configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// log debug output
    #[arg(short, long)]
    verbose: bool,
}

enum Target {
    Spacing([f64; 3]),
    Grid(PathBuf),
}

fn run(cli: Args) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    logging::init(logging::level_for(&config.logging.level, cli.verbose));

    let target = match (&cli.reference, &cli.spacing[..]) {
        (Some(reference), _) => Target::Grid(reference.clone()),
        (None, [x, y, z]) => Target::Spacing([*x, *y, *z]),
        (None, _) => {
            return Err(Error::invalid_parameter(
                "--spacing",
                "give three spacings or a --reference volume",
            ))
        }
    };
    let volume = read_volume(&cli.input)?;
    let resampled = match target {
        Target::Spacing(spacing) => resample(&volume, spacing, cli.interpolation)?,
        Target::Grid(reference) => {
            resample_to_grid(&volume, &read_volume(&reference)?, cli.interpolation)?
        }
    };
    write_volume(&cli.output, &resampled)?;
    info!(
        from = ?volume.shape(),
        to = ?resampled.shape(),
        output = %cli.output.display(),
        "wrote resampled volume"
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
