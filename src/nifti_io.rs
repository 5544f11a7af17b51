//! Reading and writing volumes as NIfTI-1 files.
//!
//! Every volume is read as `f32`. Intensity volumes are written as `f32`,
//! masks as `u8` with values 0 and 1. Files ending in `.gz` are compressed.

use nalgebra::Matrix4;
use ndarray::{Array3, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::volume::{Volume, VolumeImage};

/// NIfTI `xyzt_units` code for micrometres.
const NIFTI_UNITS_MICRON: u8 = 3;

/// Reads a 3D NIfTI volume.
///
/// Trailing singleton dimensions (a 4D file holding a single volume) are
/// dropped; anything else that is not 3D is rejected with `NotAVolume`.
pub fn read_volume(path: &Path) -> Result<VolumeImage> {
    if !path.is_file() {
        return Err(Error::MissingFile(path.to_path_buf()));
    }
    let obj = ReaderOptions::new().read_file(path)?;
    let affine = obj.header().affine::<f64>();
    let mut img = obj.into_volume().into_ndarray::<f32>()?;
    while img.ndim() > 3 && img.shape()[img.ndim() - 1] == 1 {
        let last = img.ndim() - 1;
        img = img.index_axis_move(Axis(last), 0);
    }
    let ndim = img.ndim();
    let data = img
        .into_dimensionality::<Ix3>()
        .map_err(|_| Error::NotAVolume {
            path: path.to_path_buf(),
            ndim,
        })?;
    debug!(path = %path.display(), shape = ?data.dim(), "read volume");
    Volume::new(data, affine)
}

/// Reads a mask volume; any voxel above zero is inside the mask.
pub fn read_mask(path: &Path) -> Result<Volume<bool>> {
    let volume = read_volume(path)?;
    Ok(volume.map(|&v| v > 0.0))
}

pub fn write_volume(path: &Path, volume: &VolumeImage) -> Result<()> {
    let header = header_for(volume.affine(), volume.spacing());
    create_parent(path)?;
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(volume.data())?;
    debug!(path = %path.display(), shape = ?volume.shape(), "wrote volume");
    Ok(())
}

pub fn write_mask(path: &Path, mask: &Volume<bool>) -> Result<()> {
    let header = header_for(mask.affine(), mask.spacing());
    let data: Array3<u8> = mask.data().map(|&inside| u8::from(inside));
    create_parent(path)?;
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&data)?;
    debug!(path = %path.display(), shape = ?mask.shape(), "wrote mask");
    Ok(())
}

/// Creates the directory a file is about to be written to.
pub fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(std::fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}

fn header_for(affine: &Matrix4<f64>, spacing: [f64; 3]) -> NiftiHeader {
    let mut header = NiftiHeader::default();
    header.set_affine(affine);
    for (axis, value) in spacing.iter().enumerate() {
        header.pixdim[axis + 1] = *value as f32;
    }
    header.xyzt_units = NIFTI_UNITS_MICRON;
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
    header
}
