//! Binary morphology on region masks.
//!
//! `cleanup` closes small gaps in a warped mask and drops fragments that are
//! too small to be anatomy. Dilation and erosion use a box structuring element.
//! `close` treats everything outside the grid as background.

use ndarray::{s, Array3, Axis};
use std::collections::VecDeque;
use tracing::debug;

use crate::error::{Error, Result};

/// Cleanup parameters in voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupParams {
    /// Structuring element half-width along each axis.
    pub radius: [usize; 3],
    /// Connected components with fewer voxels are removed.
    pub min_voxels: usize,
}

impl CleanupParams {
    /// Converts a physical radius (µm) and a minimal component volume (µm³)
    /// to voxels for the given spacing.
    pub fn from_physical(radius_um: f64, min_volume_um3: f64, spacing: [f64; 3]) -> Result<Self> {
        if !(radius_um.is_finite() && radius_um >= 0.0) {
            return Err(Error::invalid_parameter(
                "cleanup radius",
                format!("{radius_um} is not a non-negative length"),
            ));
        }
        if !(min_volume_um3.is_finite() && min_volume_um3 >= 0.0) {
            return Err(Error::invalid_parameter(
                "minimal component volume",
                format!("{min_volume_um3} is not a non-negative volume"),
            ));
        }
        let mut radius = [0usize; 3];
        for axis in 0..3 {
            let value = spacing[axis];
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::InvalidSpacing {
                    name: ["spacing x", "spacing y", "spacing z"][axis],
                    value,
                });
            }
            radius[axis] = (radius_um / value).round() as usize;
        }
        let voxel_volume = spacing[0] * spacing[1] * spacing[2];
        let min_voxels = (min_volume_um3 / voxel_volume).ceil() as usize;
        Ok(Self { radius, min_voxels })
    }
}

/// Box filter along one axis: `any` for dilation, `all` for erosion, over the
/// window clipped to the grid. Erosion therefore keeps voxels whose window
/// leaves the grid; `close` pads the mask so this never reaches its result.
fn filter_axis(mask: &mut Array3<bool>, axis: usize, radius: usize, dilate: bool) {
    if radius == 0 {
        return;
    }
    let mut prefix = Vec::new();
    for mut lane in mask.lanes_mut(Axis(axis)) {
        let n = lane.len();
        prefix.clear();
        prefix.push(0usize);
        for &v in lane.iter() {
            let last = prefix[prefix.len() - 1];
            prefix.push(last + usize::from(v));
        }
        for (i, out) in lane.iter_mut().enumerate() {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(n);
            let count = prefix[hi] - prefix[lo];
            *out = if dilate { count > 0 } else { count == hi - lo };
        }
    }
}

pub fn dilate(mask: &Array3<bool>, radius: [usize; 3]) -> Array3<bool> {
    let mut out = mask.clone();
    for (axis, &r) in radius.iter().enumerate() {
        filter_axis(&mut out, axis, r, true);
    }
    out
}

pub fn erode(mask: &Array3<bool>, radius: [usize; 3]) -> Array3<bool> {
    let mut out = mask.clone();
    for (axis, &r) in radius.iter().enumerate() {
        filter_axis(&mut out, axis, r, false);
    }
    out
}

/// Dilation followed by erosion, with background beyond the grid.
///
/// The mask is padded by `radius` background voxels on every side, so each
/// erosion window inside the original grid sees only dilated values.
pub fn close(mask: &Array3<bool>, radius: [usize; 3]) -> Array3<bool> {
    let (ni, nj, nk) = mask.dim();
    let [ri, rj, rk] = radius;
    let mut padded = Array3::from_elem((ni + 2 * ri, nj + 2 * rj, nk + 2 * rk), false);
    padded
        .slice_mut(s![ri..ri + ni, rj..rj + nj, rk..rk + nk])
        .assign(mask);
    let closed = erode(&dilate(&padded, radius), radius);
    closed
        .slice(s![ri..ri + ni, rj..rj + nj, rk..rk + nk])
        .to_owned()
}

/// Labels 26-connected components. Background is 0, components count from 1.
pub fn label_components(mask: &Array3<bool>) -> (Array3<usize>, Vec<usize>) {
    let (ni, nj, nk) = mask.dim();
    let mut labels = Array3::<usize>::zeros((ni, nj, nk));
    // sizes[0] is unused so that sizes[label] is the size of `label`
    let mut sizes = vec![0usize];
    let mut queue = VecDeque::new();
    for ((i, j, k), &inside) in mask.indexed_iter() {
        if !inside || labels[[i, j, k]] != 0 {
            continue;
        }
        let label = sizes.len();
        let mut size = 0;
        labels[[i, j, k]] = label;
        queue.push_back([i, j, k]);
        while let Some([ci, cj, ck]) = queue.pop_front() {
            size += 1;
            for di in -1i64..=1 {
                for dj in -1i64..=1 {
                    for dk in -1i64..=1 {
                        let (xi, xj, xk) = (ci as i64 + di, cj as i64 + dj, ck as i64 + dk);
                        if xi < 0 || xj < 0 || xk < 0 {
                            continue;
                        }
                        let at = [xi as usize, xj as usize, xk as usize];
                        if at[0] >= ni || at[1] >= nj || at[2] >= nk {
                            continue;
                        }
                        if mask[at] && labels[at] == 0 {
                            labels[at] = label;
                            queue.push_back(at);
                        }
                    }
                }
            }
        }
        sizes.push(size);
    }
    (labels, sizes)
}

/// Removes 26-connected components with fewer than `min_voxels` voxels.
pub fn remove_small_components(mask: &Array3<bool>, min_voxels: usize) -> Array3<bool> {
    if min_voxels <= 1 {
        return mask.clone();
    }
    let (labels, sizes) = label_components(mask);
    labels.map(|&label| label != 0 && sizes[label] >= min_voxels)
}

/// Closes the mask and removes small components until nothing changes.
///
/// Each round only adds voxels to the previous result, so the loop ends, and
/// the result is a fixed point: cleaning it again returns it unchanged.
pub fn cleanup(mask: &Array3<bool>, params: &CleanupParams) -> Array3<bool> {
    let step = |m: &Array3<bool>| remove_small_components(&close(m, params.radius), params.min_voxels);
    let mut current = step(mask);
    let mut rounds = 1;
    loop {
        let next = step(&current);
        if next == current {
            break;
        }
        current = next;
        rounds += 1;
    }
    debug!(
        rounds,
        before = mask.iter().filter(|&&v| v).count(),
        after = current.iter().filter(|&&v| v).count(),
        "cleaned mask"
    );
    current
}
