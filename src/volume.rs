//! In-memory volumes with their voxel-to-world geometry.

use nalgebra::{Matrix3, Matrix4, Point3, Vector3};
use ndarray::Array3;

use crate::error::{Error, Result};

/// A 3D raster indexed `[i, j, k]` with a voxel-to-world affine in the RAS+
/// frame (micrometres).
///
/// The affine columns are the axis direction vectors scaled by the voxel
/// spacing. The affine is always invertible.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    data: Array3<T>,
    affine: Matrix4<f64>,
}

/// Intensity volume as read from disk.
pub type VolumeImage = Volume<f32>;

impl<T> Volume<T> {
    pub fn new(data: Array3<T>, affine: Matrix4<f64>) -> Result<Self> {
        let linear: Matrix3<f64> = affine.fixed_slice::<3, 3>(0, 0).into_owned();
        if !linear.determinant().is_normal() {
            return Err(Error::invalid_parameter(
                "affine",
                "voxel-to-world affine is not invertible",
            ));
        }
        Ok(Self { data, affine })
    }

    /// Builds the affine from per-axis spacing, unit direction columns and an
    /// origin.
    pub fn from_geometry(
        data: Array3<T>,
        spacing: [f64; 3],
        direction: Matrix3<f64>,
        origin: [f64; 3],
    ) -> Result<Self> {
        for (axis, &value) in spacing.iter().enumerate() {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::InvalidSpacing {
                    name: ["spacing x", "spacing y", "spacing z"][axis],
                    value,
                });
            }
        }
        let mut affine = Matrix4::identity();
        for axis in 0..3 {
            for row in 0..3 {
                affine[(row, axis)] = direction[(row, axis)] * spacing[axis];
            }
            affine[(axis, 3)] = origin[axis];
        }
        Self::new(data, affine)
    }

    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<T> {
        &mut self.data
    }

    pub fn affine(&self) -> &Matrix4<f64> {
        &self.affine
    }

    pub fn shape(&self) -> [usize; 3] {
        let (i, j, k) = self.data.dim();
        [i, j, k]
    }

    /// Voxel spacing, the length of each affine column.
    pub fn spacing(&self) -> [f64; 3] {
        let mut spacing = [0.0; 3];
        for (axis, value) in spacing.iter_mut().enumerate() {
            *value = self.column(axis).norm();
        }
        spacing
    }

    /// World position of voxel `[0, 0, 0]`.
    pub fn origin(&self) -> [f64; 3] {
        [self.affine[(0, 3)], self.affine[(1, 3)], self.affine[(2, 3)]]
    }

    /// Unit direction vectors of the three voxel axes, as columns.
    pub fn direction(&self) -> Matrix3<f64> {
        let spacing = self.spacing();
        Matrix3::from_fn(|row, col| self.affine[(row, col)] / spacing[col])
    }

    /// Scaled direction vector of one voxel axis.
    pub fn column(&self, axis: usize) -> Vector3<f64> {
        Vector3::new(
            self.affine[(0, axis)],
            self.affine[(1, axis)],
            self.affine[(2, axis)],
        )
    }

    pub fn voxel_to_world(&self, index: [f64; 3]) -> [f64; 3] {
        let p = self
            .affine
            .transform_point(&Point3::new(index[0], index[1], index[2]));
        [p.x, p.y, p.z]
    }

    /// Continuous voxel coordinates of a world point.
    pub fn world_to_voxel(&self, point: [f64; 3]) -> Result<[f64; 3]> {
        let inverse = self.affine.try_inverse().ok_or_else(|| {
            Error::invalid_parameter("affine", "voxel-to-world affine is not invertible")
        })?;
        let p = inverse.transform_point(&Point3::new(point[0], point[1], point[2]));
        Ok([p.x, p.y, p.z])
    }

    /// Same geometry, new voxel values.
    pub fn with_data<U>(&self, data: Array3<U>) -> Result<Volume<U>> {
        let shape = self.shape();
        let (i, j, k) = data.dim();
        if [i, j, k] != shape {
            return Err(Error::invalid_parameter(
                "data",
                format!("shape {:?} does not match volume shape {:?}", [i, j, k], shape),
            ));
        }
        Ok(Volume {
            data,
            affine: self.affine,
        })
    }

    pub fn map<U, F>(&self, f: F) -> Volume<U>
    where
        F: FnMut(&T) -> U,
    {
        Volume {
            data: self.data.map(f),
            affine: self.affine,
        }
    }

    /// True when both volumes share shape and affine (within `1e-6`).
    pub fn same_grid<U>(&self, other: &Volume<U>) -> bool {
        self.shape() == other.shape()
            && (self.affine - other.affine).abs().max() < 1e-6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lps_volume() -> VolumeImage {
        let direction = Matrix3::new(
            -1.0, 0.0, 0.0, //
            0.0, -1.0, 0.0, //
            0.0, 0.0, 1.0,
        );
        Volume::from_geometry(
            Array3::zeros((4, 5, 6)),
            [0.5, 0.25, 2.0],
            direction,
            [10.0, 20.0, 30.0],
        )
        .unwrap()
    }

    #[test]
    fn test_geometry_accessors() {
        let vol = lps_volume();
        assert_eq!(vol.shape(), [4, 5, 6]);
        assert_eq!(vol.spacing(), [0.5, 0.25, 2.0]);
        assert_eq!(vol.origin(), [10.0, 20.0, 30.0]);
        assert_eq!(vol.direction()[(0, 0)], -1.0);
        assert_eq!(vol.direction()[(2, 2)], 1.0);
    }

    #[test]
    fn test_world_voxel_mapping() {
        let vol = lps_volume();
        let world = vol.voxel_to_world([2.0, 4.0, 1.0]);
        assert_eq!(world, [9.0, 19.0, 32.0]);
        let back = vol.world_to_voxel(world).unwrap();
        for (a, b) in back.iter().zip([2.0, 4.0, 1.0]) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rejects_singular_affine() {
        let mut affine = Matrix4::identity();
        affine[(2, 2)] = 0.0;
        assert!(Volume::new(Array3::<f32>::zeros((2, 2, 2)), affine).is_err());
    }

    #[test]
    fn test_rejects_bad_spacing() {
        let err = Volume::from_geometry(
            Array3::<f32>::zeros((2, 2, 2)),
            [1.0, 0.0, 1.0],
            Matrix3::identity(),
            [0.0; 3],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSpacing { .. }));
    }

    #[test]
    fn test_with_data_checks_shape() {
        let vol = lps_volume();
        assert!(vol.with_data(Array3::<bool>::from_elem((4, 5, 6), true)).is_ok());
        assert!(vol.with_data(Array3::<bool>::from_elem((4, 5, 5), true)).is_err());
    }
}
