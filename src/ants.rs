//! ANTs command line backend for [`Registration`] and [`Warp`].
//!
//! Volumes are handed to `antsRegistration` and `antsApplyTransforms` as
//! temporary NIfTI files. Composite transforms (`.h5`) are written.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::config::RegistrationConfig;
use crate::error::{Error, Result};
use crate::nifti_io::{read_volume, write_volume};
use crate::registration::{Registration, TransformPair, Warp};
use crate::volume::VolumeImage;

const THREADS_ENV: &str = "ITK_GLOBAL_DEFAULT_NUMBER_OF_THREADS";

/// Registration stages handed to `antsRegistration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Rigid, affine and SyN stages with mutual information, as
    /// `antsRegistrationSyNQuick.sh -t s`.
    #[default]
    SynQuick,
    /// Translation, rigid, affine and SyN stages of the Z-BRAIN atlas
    /// tutorial.
    Zbrain,
}

impl Preset {
    /// Arguments for `antsRegistration`, excluding `--output`.
    pub fn arguments(&self, fixed: &Path, moving: &Path, fixed_shape: [usize; 3]) -> Vec<String> {
        let (f, m) = (fixed.display(), moving.display());
        let mut args: Vec<String> = vec![
            "--dimensionality".into(),
            "3".into(),
            "--initial-moving-transform".into(),
            format!("[{f},{m},1]"),
        ];
        match self {
            Preset::SynQuick => {
                let large = fixed_shape.iter().any(|&n| n > 256);
                let (linear_shrink, linear_sigmas) = if large {
                    ("12x8x4x2", "4x3x2x1vox")
                } else {
                    ("8x4x2x1", "3x2x1x0vox")
                };
                let (syn_convergence, syn_shrink, syn_sigmas) = if large {
                    ("[100x100x70x50x0,1e-6,10]", "10x6x4x2x1", "5x3x2x1x0vox")
                } else {
                    ("[100x70x50x0,1e-6,10]", "8x4x2x1", "3x2x1x0vox")
                };
                let mi = [format!("MI[{f},{m},1,32,Regular,0.25]")];
                push_stage(&mut args, &mi, "Rigid[0.1]", "[1000x500x250x0,1e-6,10]", linear_shrink, linear_sigmas);
                push_stage(&mut args, &mi, "Affine[0.1]", "[1000x500x250x0,1e-6,10]", linear_shrink, linear_sigmas);
                push_stage(
                    &mut args,
                    &[format!("MI[{f},{m},1,32]")],
                    "SyN[0.1,3,0]",
                    syn_convergence,
                    syn_shrink,
                    syn_sigmas,
                );
                args.extend(
                    [
                        "--use-histogram-matching",
                        "0",
                        "--winsorize-image-intensities",
                        "[0.005,0.995]",
                    ]
                    .map(String::from),
                );
            }
            Preset::Zbrain => {
                let mattes = [format!("Mattes[{f},{m},1,32,Regular,0.25]")];
                let its = "[100x100x100,1e-8,20]";
                push_stage(&mut args, &mattes, "Translation[0.1]", its, "6x4x2", "4x2x1vox");
                push_stage(&mut args, &mattes, "Rigid[0.1]", its, "3x2x1", "4x2x1vox");
                push_stage(&mut args, &mattes, "Affine[0.1]", its, "3x2x1", "4x2x1vox");
                push_stage(
                    &mut args,
                    &[format!("Mattes[{f},{m},0.5,32]"), format!("CC[{f},{m},0.5,4]")],
                    "SyN[0.1,3,0]",
                    "[100x100x50,1e-8,5]",
                    "4x2x1",
                    "4x2x1vox",
                );
                args.extend(
                    ["--use-histogram-matching", "1", "--collapse-output-transforms", "1"]
                        .map(String::from),
                );
            }
        }
        args.extend(
            [
                "--write-composite-transform",
                "1",
                "--float",
                "0",
                "--interpolation",
                "Linear",
                "--verbose",
                "1",
            ]
            .map(String::from),
        );
        args
    }
}

fn push_stage(
    args: &mut Vec<String>,
    metrics: &[String],
    transform: &str,
    convergence: &str,
    shrink_factors: &str,
    smoothing_sigmas: &str,
) {
    for metric in metrics {
        args.push("--metric".into());
        args.push(metric.clone());
    }
    args.extend(
        [
            "--transform",
            transform,
            "--convergence",
            convergence,
            "--shrink-factors",
            shrink_factors,
            "--smoothing-sigmas",
            smoothing_sigmas,
        ]
        .map(String::from),
    );
}

/// Runs the ANTs executables found in `bin_dir` or on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct AntsToolkit {
    preset: Preset,
    bin_dir: Option<PathBuf>,
    threads: Option<usize>,
}

impl AntsToolkit {
    pub fn from_config(config: &RegistrationConfig) -> Self {
        Self {
            preset: config.preset,
            bin_dir: config.ants_bin_dir.clone(),
            threads: config.threads,
        }
    }

    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = preset;
        self
    }

    fn command(&self, program: &str) -> Command {
        let program = match &self.bin_dir {
            Some(dir) => dir.join(program),
            None => PathBuf::from(program),
        };
        let mut cmd = Command::new(program);
        if let Some(threads) = self.threads {
            cmd.env(THREADS_ENV, threads.to_string());
        }
        cmd
    }

    fn run(&self, program: &str, args: &[String]) -> Result<()> {
        debug!(program, args = %args.join(" "), "running");
        let output = self.command(program).args(args).output().map_err(|e| {
            Error::registration_failed(format!("could not launch {program}: {e}"))
        })?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(target: "ants", "{line}");
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(10).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(Error::registration_failed(format!(
                "{program} exited with {}: {}",
                output.status,
                tail.join("\n")
            )));
        }
        Ok(())
    }
}

fn scratch_dir() -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix("zebranii-ants").tempdir()?)
}

fn copy_output(from: &Path, to: &Path) -> Result<()> {
    if !from.is_file() {
        return Err(Error::registration_failed(format!(
            "expected output {} was not written",
            from.display()
        )));
    }
    fs::copy(from, to)?;
    Ok(())
}

impl Registration for AntsToolkit {
    fn register(
        &self,
        fixed: &VolumeImage,
        moving: &VolumeImage,
        outputs: &TransformPair,
    ) -> Result<()> {
        let scratch = scratch_dir()?;
        let fixed_path = scratch.path().join("fixed.nii.gz");
        let moving_path = scratch.path().join("moving.nii.gz");
        write_volume(&fixed_path, fixed)?;
        write_volume(&moving_path, moving)?;

        let prefix = scratch.path().join("transform_");
        let mut args = self.preset.arguments(&fixed_path, &moving_path, fixed.shape());
        args.push("--output".into());
        args.push(prefix.display().to_string());
        info!(preset = ?self.preset, "running antsRegistration");
        self.run("antsRegistration", &args)?;

        copy_output(&scratch.path().join("transform_Composite.h5"), &outputs.forward)?;
        copy_output(
            &scratch.path().join("transform_InverseComposite.h5"),
            &outputs.inverse,
        )?;
        Ok(())
    }
}

impl Warp for AntsToolkit {
    fn warp(
        &self,
        volume: &VolumeImage,
        reference: &VolumeImage,
        transform: &Path,
    ) -> Result<VolumeImage> {
        if !transform.is_file() {
            return Err(Error::MissingFile(transform.to_path_buf()));
        }
        let scratch = scratch_dir()?;
        let input = scratch.path().join("input.nii.gz");
        let reference_path = scratch.path().join("reference.nii.gz");
        let output = scratch.path().join("warped.nii.gz");
        write_volume(&input, volume)?;
        write_volume(&reference_path, reference)?;

        let args: Vec<String> = vec![
            "--dimensionality".into(),
            "3".into(),
            "--input".into(),
            input.display().to_string(),
            "--reference-image".into(),
            reference_path.display().to_string(),
            "--output".into(),
            output.display().to_string(),
            "--interpolation".into(),
            "Linear".into(),
            "--transform".into(),
            transform.display().to_string(),
        ];
        self.run("antsApplyTransforms", &args)?;
        if !output.is_file() {
            return Err(Error::registration_failed(
                "antsApplyTransforms did not write its output",
            ));
        }
        read_volume(&output)
    }
}
