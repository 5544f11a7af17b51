//! Registering a moving volume to an atlas volume.
//!
//! The registration algorithm itself is external. Implementations of
//! [`Registration`] produce a forward (moving to atlas) and an inverse (atlas
//! to moving) transform file; implementations of [`Warp`] apply such a file.
//! [`run_registration`] makes sure a failed run never leaves a half-written
//! pair of transforms behind.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::common::volume_stem;
use crate::error::{Error, Result};
use crate::volume::{Volume, VolumeImage};

/// Directory next to the moving image that holds its transforms.
pub const REGISTRATION_DIR: &str = "registration";

/// Computes transforms that align `moving` to `fixed`.
pub trait Registration {
    /// Writes the forward and inverse transforms to `outputs`.
    fn register(&self, fixed: &VolumeImage, moving: &VolumeImage, outputs: &TransformPair)
        -> Result<()>;
}

/// Applies a transform file to a volume.
pub trait Warp {
    /// Resamples `volume` through `transform` onto the voxel grid of
    /// `reference`, with linear interpolation.
    fn warp(&self, volume: &VolumeImage, reference: &VolumeImage, transform: &Path)
        -> Result<VolumeImage>;
}

/// Forward (moving to atlas) and inverse (atlas to moving) transform files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformPair {
    pub forward: PathBuf,
    pub inverse: PathBuf,
}

impl TransformPair {
    fn in_dir(dir: &Path, stem: &str) -> Self {
        Self {
            forward: dir.join(format!("{stem}_Composite.h5")),
            inverse: dir.join(format!("{stem}_InverseComposite.h5")),
        }
    }

    /// `<dir>/registration/<stem>_Composite.h5` and
    /// `<dir>/registration/<stem>_InverseComposite.h5` for a moving image at
    /// `<dir>/<stem>.nii[.gz]`.
    pub fn for_moving(moving_path: &Path) -> Self {
        Self::in_dir(&registration_dir(moving_path), &volume_stem(moving_path))
    }

    pub fn exists(&self) -> bool {
        self.forward.is_file() && self.inverse.is_file()
    }
}

pub fn registration_dir(moving_path: &Path) -> PathBuf {
    moving_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(REGISTRATION_DIR)
}

pub fn transformation_header_path(moving_path: &Path) -> PathBuf {
    registration_dir(moving_path).join(format!(
        "{}_transformation_header.json",
        volume_stem(moving_path)
    ))
}

/// Grid description of a volume as recorded next to its transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeHeader {
    pub dimensions: [usize; 3],
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    /// Unit axis directions, row-major.
    pub direction: [[f64; 3]; 3],
}

impl VolumeHeader {
    pub fn of<T>(volume: &Volume<T>) -> Self {
        let d = volume.direction();
        Self {
            dimensions: volume.shape(),
            spacing: volume.spacing(),
            origin: volume.origin(),
            direction: [0, 1, 2].map(|row| [0, 1, 2].map(|col| d[(row, col)])),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationHeader {
    pub fixed: VolumeHeader,
    pub moving: VolumeHeader,
}

impl TransformationHeader {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MissingFile(path.to_path_buf()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// Registers `moving` (stored at `moving_path`) against `fixed` and stores
/// the transforms at [`TransformPair::for_moving`].
///
/// The toolkit writes into a staging directory first. Both files are moved
/// into place only once both exist, so existing transforms survive a failed
/// run and a failed first run leaves none.
pub fn run_registration<R: Registration + ?Sized>(
    toolkit: &R,
    fixed: &VolumeImage,
    moving: &VolumeImage,
    moving_path: &Path,
) -> Result<TransformPair> {
    let stem = volume_stem(moving_path);
    let reg_dir = registration_dir(moving_path);
    fs::create_dir_all(&reg_dir)?;
    let staging = reg_dir.join(format!(".{stem}.partial"));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;
    let staged = TransformPair::in_dir(&staging, &stem);
    let target = TransformPair::for_moving(moving_path);

    info!(moving = %moving_path.display(), "registering to atlas");
    let outcome = toolkit
        .register(fixed, moving, &staged)
        .and_then(|()| {
            if staged.exists() {
                Ok(())
            } else {
                Err(Error::registration_failed(
                    "registration finished without writing both transforms",
                ))
            }
        })
        .and_then(|()| {
            fs::rename(&staged.inverse, &target.inverse)?;
            if let Err(e) = fs::rename(&staged.forward, &target.forward) {
                // a new inverse must not sit next to an old forward transform
                let _ = fs::remove_file(&target.inverse);
                return Err(e.into());
            }
            Ok(())
        });
    if let Err(e) = fs::remove_dir_all(&staging) {
        warn!(dir = %staging.display(), "could not remove staging directory: {e}");
    }
    outcome?;

    let header = TransformationHeader {
        fixed: VolumeHeader::of(fixed),
        moving: VolumeHeader::of(moving),
    };
    fs::write(
        transformation_header_path(moving_path),
        serde_json::to_string_pretty(&header)?,
    )?;
    info!(forward = %target.forward.display(), inverse = %target.inverse.display(), "stored transforms");
    Ok(target)
}
