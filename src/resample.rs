//! Resampling volumes onto new voxel grids.

use clap::ValueEnum;
use ndarray::Array3;
use tracing::debug;

use crate::error::{Error, Result};
use crate::volume::{Volume, VolumeImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Interpolation {
    /// Trilinear interpolation, for intensity and label volumes.
    Linear,
    /// Nearest neighbour, for masks.
    Nearest,
}

/// Samples `data` at continuous voxel coordinates.
///
/// Coordinates outside the grid yield `None`.
pub fn sample(data: &Array3<f32>, index: [f64; 3], interpolation: Interpolation) -> Option<f32> {
    let (ni, nj, nk) = data.dim();
    let shape = [ni, nj, nk];
    let mut clamped = [0.0f64; 3];
    for axis in 0..3 {
        let last = shape[axis] as f64 - 1.0;
        if shape[axis] == 0 || index[axis] < -1e-6 || index[axis] > last + 1e-6 {
            return None;
        }
        clamped[axis] = index[axis].clamp(0.0, last);
    }
    match interpolation {
        Interpolation::Nearest => {
            let [i, j, k] = clamped.map(|v| v.round() as usize);
            Some(data[[i, j, k]])
        }
        Interpolation::Linear => {
            let lo = clamped.map(|v| v.floor() as usize);
            let mut value = 0.0f64;
            for corner in 0..8 {
                let mut weight = 1.0f64;
                let mut at = [0usize; 3];
                for axis in 0..3 {
                    let frac = clamped[axis] - lo[axis] as f64;
                    let upper = (corner >> axis) & 1 == 1;
                    at[axis] = if upper {
                        (lo[axis] + 1).min(shape[axis] - 1)
                    } else {
                        lo[axis]
                    };
                    weight *= if upper { frac } else { 1.0 - frac };
                }
                if weight > 0.0 {
                    value += weight * f64::from(data[at]);
                }
            }
            Some(value as f32)
        }
    }
}

/// Resamples a volume to a new voxel spacing.
///
/// The new shape is `round(shape * spacing / new_spacing)` (at least one
/// voxel per axis); origin and axis directions are kept.
pub fn resample(
    volume: &VolumeImage,
    spacing: [f64; 3],
    interpolation: Interpolation,
) -> Result<VolumeImage> {
    for (axis, &value) in spacing.iter().enumerate() {
        if !(value.is_finite() && value > 0.0) {
            return Err(Error::InvalidSpacing {
                name: ["spacing x", "spacing y", "spacing z"][axis],
                value,
            });
        }
    }
    let old_spacing = volume.spacing();
    let old_shape = volume.shape();
    let mut shape = [0usize; 3];
    let mut step = [0.0f64; 3];
    for axis in 0..3 {
        let extent = old_shape[axis] as f64 * old_spacing[axis];
        shape[axis] = ((extent / spacing[axis]).round() as usize).max(1);
        step[axis] = spacing[axis] / old_spacing[axis];
    }
    debug!(from = ?old_shape, to = ?shape, ?interpolation, "resampling volume");

    let source = volume.data();
    let data = Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(i, j, k)| {
        let index = [i as f64 * step[0], j as f64 * step[1], k as f64 * step[2]];
        // the last output voxel may reach just past the source grid
        let index = [0, 1, 2].map(|axis| index[axis].min(old_shape[axis] as f64 - 1.0));
        sample(source, index, interpolation).unwrap_or(0.0)
    });
    Volume::from_geometry(data, spacing, volume.direction(), volume.origin())
}

/// Resamples `volume` onto the voxel grid of `reference` through world
/// coordinates. Voxels that fall outside `volume` are zero.
pub fn resample_to_grid<T>(
    volume: &VolumeImage,
    reference: &Volume<T>,
    interpolation: Interpolation,
) -> Result<VolumeImage> {
    let [ni, nj, nk] = reference.shape();
    let mut data = Array3::<f32>::zeros((ni, nj, nk));
    for ((i, j, k), value) in data.indexed_iter_mut() {
        let world = reference.voxel_to_world([i as f64, j as f64, k as f64]);
        let index = volume.world_to_voxel(world)?;
        *value = sample(volume.data(), index, interpolation).unwrap_or(0.0);
    }
    reference.with_data(data)
}
