//! Stacking 2D plane images into a volume and slicing a volume back into
//! plane images.
//!
//! Assembly is a strict reshape: plane `k` becomes `volume[.., .., k]` after
//! its in-plane rotation, and the declared layout only determines the
//! voxel-to-world affine. Disassembly reverses this through the affine, so a
//! volume written by [`assemble`] comes back plane for plane.

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::common::Direction;
use crate::error::{Error, Result};
use crate::volume::{Volume, VolumeImage};

/// In-plane rotation in quarter turns, counter-clockwise as displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Rotation {
    quarter_turns: u8,
}

impl Rotation {
    pub const NONE: Rotation = Rotation { quarter_turns: 0 };

    /// Accepts any multiple of 90°; negative angles turn clockwise.
    pub fn from_degrees(degrees: f64) -> Result<Self> {
        let turns = degrees / 90.0;
        if !turns.is_finite() || (turns - turns.round()).abs() > 1e-9 {
            return Err(Error::InvalidRotation(degrees));
        }
        Ok(Self {
            quarter_turns: (turns.round() as i64).rem_euclid(4) as u8,
        })
    }

    pub fn quarter_turns(&self) -> u8 {
        self.quarter_turns
    }

    pub fn degrees(&self) -> f64 {
        f64::from(self.quarter_turns) * 90.0
    }

    pub fn inverse(&self) -> Self {
        Self {
            quarter_turns: (4 - self.quarter_turns) % 4,
        }
    }

    /// True for odd quarter turns, which exchange rows and columns.
    pub fn swaps_axes(&self) -> bool {
        self.quarter_turns % 2 == 1
    }

    /// Rotates a `[row, column]` plane.
    ///
    /// One quarter turn maps `out[i, j]` to `plane[j, width - 1 - i]`.
    pub fn apply<T: Clone>(&self, plane: ArrayView2<'_, T>) -> Array2<T> {
        let mut view = plane;
        match self.quarter_turns {
            1 => {
                view = view.reversed_axes();
                view.invert_axis(Axis(0));
            }
            2 => {
                view.invert_axis(Axis(0));
                view.invert_axis(Axis(1));
            }
            3 => {
                view = view.reversed_axes();
                view.invert_axis(Axis(1));
            }
            _ => {}
        }
        view.to_owned()
    }
}

impl TryFrom<f64> for Rotation {
    type Error = Error;

    fn try_from(degrees: f64) -> Result<Self> {
        Rotation::from_degrees(degrees)
    }
}

impl From<Rotation> for f64 {
    fn from(rotation: Rotation) -> f64 {
        rotation.degrees()
    }
}

/// Physical pixel size of a plane image (µm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneSpacing {
    pub row: f64,
    pub column: f64,
}

impl PlaneSpacing {
    pub fn new(row: f64, column: f64) -> Self {
        Self { row, column }
    }

    fn transposed(self) -> Self {
        Self {
            row: self.column,
            column: self.row,
        }
    }
}

/// How the planes of a stack sit in anatomical space.
///
/// `orientation` gives the sides the row (vertical) and column (horizontal)
/// axes of the rotated planes start from; `order` is the side the first plane
/// lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackLayout {
    pub order: Direction,
    pub orientation: (Direction, Direction),
    pub rotation: Rotation,
}

impl StackLayout {
    pub fn new(order: Direction, orientation: (Direction, Direction), rotation: Rotation) -> Self {
        Self {
            order,
            orientation,
            rotation,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let (vertical, horizontal) = self.orientation;
        if !vertical.is_orthogonal_to(&horizontal) {
            return Err(Error::InvalidOrientation(format!(
                "plane axes {vertical} and {horizontal} are not orthogonal"
            )));
        }
        if !self.order.is_orthogonal_to(&vertical) || !self.order.is_orthogonal_to(&horizontal) {
            return Err(Error::InvalidOrientation(format!(
                "plane order {} lies within the plane spanned by {vertical} and {horizontal}",
                self.order
            )));
        }
        Ok(())
    }

    /// Unit vectors of the (row, column, stack) axes of the assembled volume.
    fn axis_vectors(&self) -> [Vector3<f64>; 3] {
        [
            self.orientation.0.axis_vector(),
            self.orientation.1.axis_vector(),
            self.order.axis_vector(),
        ]
    }
}

/// A validated layout plus the physical spacing of the supplied planes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackGeometry {
    layout: StackLayout,
    spacing: PlaneSpacing,
    plane_height: f64,
}

impl StackGeometry {
    pub fn new(layout: StackLayout, spacing: PlaneSpacing, plane_height: f64) -> Result<Self> {
        layout.validate()?;
        for (name, value) in [
            ("plane spacing (row)", spacing.row),
            ("plane spacing (column)", spacing.column),
            ("plane height", plane_height),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::InvalidSpacing { name, value });
            }
        }
        Ok(Self {
            layout,
            spacing,
            plane_height,
        })
    }

    pub fn layout(&self) -> &StackLayout {
        &self.layout
    }

    pub fn spacing(&self) -> PlaneSpacing {
        self.spacing
    }

    pub fn plane_height(&self) -> f64 {
        self.plane_height
    }
}

/// Planes recovered from a volume, in stack order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneStack {
    pub planes: Vec<Array2<f32>>,
    pub spacing: PlaneSpacing,
    pub plane_height: f64,
}

/// Stacks plane images into a volume.
///
/// # Arguments
///
/// * `planes` - Plane images indexed `[row, column]`, first plane first.
/// * `geometry` - Layout and spacing the planes were acquired with.
///
/// # Returns
///
/// A volume of shape `(rows, columns, planes)` of the rotated planes, with the
/// spacing `(row, column, plane height)` of the rotated planes.
pub fn assemble(planes: &[Array2<f32>], geometry: &StackGeometry) -> Result<VolumeImage> {
    let first = planes.first().ok_or(Error::EmptyStack)?;
    let expected = first.dim();
    for (index, plane) in planes.iter().enumerate() {
        if plane.dim() != expected {
            return Err(Error::ShapeMismatch {
                index,
                expected,
                actual: plane.dim(),
            });
        }
    }

    let layout = geometry.layout();
    let rotation = layout.rotation;
    let (rows, columns) = if rotation.swaps_axes() {
        (expected.1, expected.0)
    } else {
        expected
    };
    let spacing = if rotation.swaps_axes() {
        geometry.spacing().transposed()
    } else {
        geometry.spacing()
    };

    let mut data = Array3::<f32>::zeros((rows, columns, planes.len()));
    for (k, plane) in planes.iter().enumerate() {
        data.index_axis_mut(Axis(2), k)
            .assign(&rotation.apply(plane.view()));
    }

    let direction = Matrix3::from_columns(&layout.axis_vectors());
    info!(
        shape = ?data.dim(),
        order = %layout.order,
        orientation = %format!("{}{}", layout.orientation.0, layout.orientation.1),
        rotation = rotation.degrees(),
        "assembled plane stack"
    );
    Volume::from_geometry(
        data,
        [spacing.row, spacing.column, geometry.plane_height()],
        direction,
        [0.0; 3],
    )
}

/// Side each voxel axis of `volume` starts from, or `ObliqueVolume` when an
/// axis is not aligned with an anatomical axis.
pub fn axis_directions<T>(volume: &Volume<T>) -> Result<[Direction; 3]> {
    let mut sides = [Direction::Left; 3];
    for (axis, side) in sides.iter_mut().enumerate() {
        let column = volume.column(axis);
        let norm = column.norm();
        let dominant = column.iamax();
        for world in 0..3 {
            if world != dominant && column[world].abs() > 1e-6 * norm {
                return Err(Error::ObliqueVolume);
            }
        }
        *side = Direction::from_axis_vector(dominant, column[dominant] > 0.0);
    }
    Ok(sides)
}

/// Slices a volume into plane images of the given layout.
///
/// The volume axes are permuted and flipped (never resampled) so that they
/// run along the (row, column, stack) axes of the layout; each plane is then
/// turned back by the inverse rotation. The returned spacing describes the
/// un-rotated planes.
pub fn disassemble(volume: &VolumeImage, layout: &StackLayout) -> Result<PlaneStack> {
    layout.validate()?;
    let sides = axis_directions(volume)?;
    let targets = [layout.orientation.0, layout.orientation.1, layout.order];

    let mut permutation = [0usize; 3];
    let mut flips = [false; 3];
    for (slot, target) in targets.iter().enumerate() {
        let axis = sides
            .iter()
            .position(|side| side.world_axis() == target.world_axis())
            .ok_or(Error::ObliqueVolume)?;
        permutation[slot] = axis;
        flips[slot] = sides[axis] != *target;
    }
    debug!(?permutation, ?flips, "reoriented volume for slicing");

    let mut view = volume.data().view().permuted_axes(permutation);
    for (slot, &flip) in flips.iter().enumerate() {
        if flip {
            view.invert_axis(Axis(slot));
        }
    }

    let inverse = layout.rotation.inverse();
    let planes: Vec<Array2<f32>> = view
        .axis_iter(Axis(2))
        .map(|plane| inverse.apply(plane))
        .collect();

    let voxel_spacing = volume.spacing();
    let rotated = PlaneSpacing::new(voxel_spacing[permutation[0]], voxel_spacing[permutation[1]]);
    let spacing = if layout.rotation.swaps_axes() {
        rotated.transposed()
    } else {
        rotated
    };
    info!(planes = planes.len(), "disassembled volume");
    Ok(PlaneStack {
        planes,
        spacing,
        plane_height: voxel_spacing[permutation[2]],
    })
}

/// Linearly interpolates a non-uniformly spaced stack into one spaced
/// `target` apart.
///
/// `gaps` holds one distance for every pair of neighbouring planes, or a
/// single distance shared by all of them. Each gap must be a positive multiple
/// of `target`. The first and last planes are kept as they are.
pub fn interpolate_planes(
    planes: &[Array2<f32>],
    gaps: &[f64],
    target: f64,
) -> Result<Vec<Array2<f32>>> {
    let first = planes.first().ok_or(Error::EmptyStack)?;
    for (index, plane) in planes.iter().enumerate() {
        if plane.dim() != first.dim() {
            return Err(Error::ShapeMismatch {
                index,
                expected: first.dim(),
                actual: plane.dim(),
            });
        }
    }
    if !(target.is_finite() && target > 0.0) {
        return Err(Error::InvalidSpacing {
            name: "target spacing",
            value: target,
        });
    }
    let pairs = planes.len() - 1;
    let gaps: Vec<f64> = match gaps.len() {
        1 => vec![gaps[0]; pairs],
        n if n == pairs => gaps.to_vec(),
        n => {
            return Err(Error::invalid_parameter(
                "plane gaps",
                format!("expected 1 or {pairs} values, got {n}"),
            ))
        }
    };

    let mut out = vec![first.clone()];
    for (i, &gap) in gaps.iter().enumerate() {
        if !(gap.is_finite() && gap > 0.0) {
            return Err(Error::InvalidSpacing {
                name: "plane gap",
                value: gap,
            });
        }
        let ratio = gap / target;
        let steps = ratio.round();
        if steps < 1.0 || (ratio - steps).abs() > 1e-6 * ratio.max(1.0) {
            return Err(Error::invalid_parameter(
                "target spacing",
                format!("{target} does not divide the plane gap {gap}"),
            ));
        }
        let steps = steps as usize;
        let (a, b) = (&planes[i], &planes[i + 1]);
        for s in 1..steps {
            let t = s as f32 / steps as f32;
            out.push(a * (1.0 - t) + b * t);
        }
        out.push(b.clone());
    }
    debug!(input = planes.len(), output = out.len(), "interpolated plane stack");
    Ok(out)
}

/// Layout and spacing of a plane stack as stored next to its plane images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackMetadata {
    pub plane_image_order: Direction,
    pub plane_orientation: [Direction; 2],
    #[serde(default)]
    pub plane_rotation: Rotation,
    pub plane_spacing: [f64; 2],
    pub plane_height: f64,
}

impl StackMetadata {
    pub const FILE_NAME: &'static str = "stack.json";

    pub fn new(layout: &StackLayout, spacing: PlaneSpacing, plane_height: f64) -> Self {
        Self {
            plane_image_order: layout.order,
            plane_orientation: [layout.orientation.0, layout.orientation.1],
            plane_rotation: layout.rotation,
            plane_spacing: [spacing.row, spacing.column],
            plane_height,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MissingFile(path.to_path_buf()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn layout(&self) -> StackLayout {
        StackLayout::new(
            self.plane_image_order,
            (self.plane_orientation[0], self.plane_orientation[1]),
            self.plane_rotation,
        )
    }

    pub fn geometry(&self) -> Result<StackGeometry> {
        StackGeometry::new(
            self.layout(),
            PlaneSpacing::new(self.plane_spacing[0], self.plane_spacing[1]),
            self.plane_height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn layout(rotation: f64) -> StackLayout {
        StackLayout::new(
            Direction::Superior,
            (Direction::Posterior, Direction::Right),
            Rotation::from_degrees(rotation).unwrap(),
        )
    }

    #[test]
    fn test_rotation_matches_counter_clockwise_turns() {
        let m = array![[1, 2, 3], [4, 5, 6]];
        let r90 = Rotation::from_degrees(90.0).unwrap();
        assert_eq!(r90.apply(m.view()), array![[3, 6], [2, 5], [1, 4]]);
        let r180 = Rotation::from_degrees(180.0).unwrap();
        assert_eq!(r180.apply(m.view()), array![[6, 5, 4], [3, 2, 1]]);
        let r270 = Rotation::from_degrees(-90.0).unwrap();
        assert_eq!(r270.quarter_turns(), 3);
        assert_eq!(r270.apply(m.view()), array![[4, 1], [5, 2], [6, 3]]);
        for turns in 0..4 {
            let r = Rotation::from_degrees(90.0 * turns as f64).unwrap();
            assert_eq!(r.inverse().apply(r.apply(m.view()).view()), m);
        }
    }

    #[test]
    fn test_rotation_rejects_other_angles() {
        assert!(matches!(
            Rotation::from_degrees(45.0),
            Err(Error::InvalidRotation(_))
        ));
        assert!(Rotation::from_degrees(f64::NAN).is_err());
        assert_eq!(Rotation::from_degrees(450.0).unwrap().quarter_turns(), 1);
    }

    #[test]
    fn test_geometry_validation() {
        let bad = StackLayout::new(
            Direction::Superior,
            (Direction::Posterior, Direction::Anterior),
            Rotation::NONE,
        );
        assert!(matches!(
            StackGeometry::new(bad, PlaneSpacing::new(1.0, 1.0), 1.0),
            Err(Error::InvalidOrientation(_))
        ));
        let collinear_order = StackLayout::new(
            Direction::Right,
            (Direction::Posterior, Direction::Left),
            Rotation::NONE,
        );
        assert!(matches!(
            collinear_order.validate(),
            Err(Error::InvalidOrientation(_))
        ));
        for (r, c, h) in [(0.0, 1.0, 1.0), (1.0, -1.0, 1.0), (1.0, 1.0, f64::NAN)] {
            assert!(matches!(
                StackGeometry::new(layout(0.0), PlaneSpacing::new(r, c), h),
                Err(Error::InvalidSpacing { .. })
            ));
        }
    }

    #[test]
    fn test_assemble_affine() {
        let geometry = StackGeometry::new(layout(0.0), PlaneSpacing::new(0.24, 0.5), 2.0).unwrap();
        let planes = vec![Array2::<f32>::zeros((4, 6)); 3];
        let vol = assemble(&planes, &geometry).unwrap();
        assert_eq!(vol.shape(), [4, 6, 3]);
        // rows start posterior (+y), columns start right (-x), planes start superior (-z)
        let a = vol.affine();
        assert_eq!(a[(1, 0)], 0.24);
        assert_eq!(a[(0, 1)], -0.5);
        assert_eq!(a[(2, 2)], -2.0);
        assert_eq!(vol.origin(), [0.0; 3]);
        assert_eq!(
            axis_directions(&vol).unwrap(),
            [Direction::Posterior, Direction::Right, Direction::Superior]
        );
    }

    #[test]
    fn test_odd_rotation_swaps_spacing() {
        let geometry = StackGeometry::new(layout(90.0), PlaneSpacing::new(0.24, 0.5), 2.0).unwrap();
        let planes = vec![Array2::<f32>::zeros((4, 6)); 2];
        let vol = assemble(&planes, &geometry).unwrap();
        assert_eq!(vol.shape(), [6, 4, 2]);
        assert_eq!(vol.spacing(), [0.5, 0.24, 2.0]);
        let stack = disassemble(&vol, geometry.layout()).unwrap();
        assert_eq!(stack.spacing, PlaneSpacing::new(0.24, 0.5));
        assert_eq!(stack.planes[0].dim(), (4, 6));
    }

    #[test]
    fn test_disassemble_other_layout_permutes() {
        let geometry = StackGeometry::new(layout(0.0), PlaneSpacing::new(1.0, 2.0), 3.0).unwrap();
        let planes: Vec<_> = (0..2)
            .map(|k| Array2::from_shape_fn((3, 4), |(r, c)| (k * 100 + r * 10 + c) as f32))
            .collect();
        let vol = assemble(&planes, &geometry).unwrap();
        // slice the same volume into coronal planes starting right
        let coronal = StackLayout::new(
            Direction::Anterior,
            (Direction::Inferior, Direction::Right),
            Rotation::NONE,
        );
        let stack = disassemble(&vol, &coronal).unwrap();
        assert_eq!(stack.planes.len(), 3);
        assert_eq!(stack.planes[0].dim(), (2, 4));
        // first coronal plane is the last row (most anterior); inferior rows first
        assert_eq!(stack.planes[0][[0, 0]], 120.0);
        assert_eq!(stack.planes[0][[1, 3]], 23.0);
        assert_eq!(stack.spacing, PlaneSpacing::new(3.0, 2.0));
        assert_eq!(stack.plane_height, 1.0);
    }

    #[test]
    fn test_oblique_volume_is_rejected() {
        let c = std::f64::consts::FRAC_1_SQRT_2;
        let direction = Matrix3::new(c, -c, 0.0, c, c, 0.0, 0.0, 0.0, 1.0);
        let vol = Volume::from_geometry(Array3::<f32>::zeros((2, 2, 2)), [1.0; 3], direction, [0.0; 3])
            .unwrap();
        assert!(matches!(
            disassemble(&vol, &layout(0.0)),
            Err(Error::ObliqueVolume)
        ));
    }

    #[test]
    fn test_interpolate_planes() {
        let planes = vec![array![[0.0f32]], array![[4.0f32]], array![[6.0f32]]];
        let out = interpolate_planes(&planes, &[4.0, 2.0], 1.0).unwrap();
        let values: Vec<f32> = out.iter().map(|p| p[[0, 0]]).collect();
        assert_eq!(values, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let shared = interpolate_planes(&planes, &[2.0], 2.0).unwrap();
        assert_eq!(shared.len(), 3);

        assert!(interpolate_planes(&planes, &[3.0], 2.0).is_err());
        assert!(interpolate_planes(&planes, &[1.0, 1.0, 1.0], 1.0).is_err());
        assert!(matches!(
            interpolate_planes(&planes, &[1.0], 0.0),
            Err(Error::InvalidSpacing { .. })
        ));
    }

    #[test]
    fn test_metadata_json() {
        let meta = StackMetadata::new(&layout(-90.0), PlaneSpacing::new(0.24, 0.24), 1.0);
        let text = serde_json::to_string(&meta).unwrap();
        assert!(text.contains("\"plane_image_order\":\"S\""));
        assert!(text.contains("\"plane_rotation\":270.0"));
        let back: StackMetadata = serde_json::from_str(&text).unwrap();
        assert_eq!(back, meta);
        assert!(serde_json::from_str::<StackMetadata>(
            &text.replace("270.0", "30.0")
        )
        .is_err());
    }
}
