use clap::ValueEnum;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::Error;

/// Anatomical direction in the NIfTI RAS+ world frame.
///
/// When used to describe an image axis, the direction names the side the axis
/// starts from: an axis running from anterior to posterior is `Anterior`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Direction {
    #[value(name = "A", alias = "anterior")]
    #[serde(rename = "A")]
    Anterior,
    #[value(name = "P", alias = "posterior")]
    #[serde(rename = "P")]
    Posterior,
    #[value(name = "S", alias = "superior")]
    #[serde(rename = "S")]
    Superior,
    #[value(name = "I", alias = "inferior")]
    #[serde(rename = "I")]
    Inferior,
    #[value(name = "L", alias = "left")]
    #[serde(rename = "L")]
    Left,
    #[value(name = "R", alias = "right")]
    #[serde(rename = "R")]
    Right,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::Anterior,
        Direction::Posterior,
        Direction::Superior,
        Direction::Inferior,
        Direction::Left,
        Direction::Right,
    ];

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Anterior => Direction::Posterior,
            Direction::Posterior => Direction::Anterior,
            Direction::Superior => Direction::Inferior,
            Direction::Inferior => Direction::Superior,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// World axis (0 -> x, 1 -> y, 2 -> z) this direction lies on.
    pub fn world_axis(&self) -> usize {
        match self {
            Direction::Left | Direction::Right => 0,
            Direction::Anterior | Direction::Posterior => 1,
            Direction::Superior | Direction::Inferior => 2,
        }
    }

    /// True for R, A and S, the positive ends of the RAS+ axes.
    pub fn is_positive(&self) -> bool {
        matches!(
            self,
            Direction::Right | Direction::Anterior | Direction::Superior
        )
    }

    /// Unit vector pointing towards this side.
    pub fn towards(&self) -> Vector3<f64> {
        let mut v = Vector3::zeros();
        v[self.world_axis()] = if self.is_positive() { 1.0 } else { -1.0 };
        v
    }

    /// Unit vector of an image axis that starts on this side.
    pub fn axis_vector(&self) -> Vector3<f64> {
        self.opposite().towards()
    }

    /// Side an axis starts from, given the world axis and the sign of its
    /// direction vector.
    pub fn from_axis_vector(world_axis: usize, positive: bool) -> Self {
        let towards = match (world_axis, positive) {
            (0, true) => Direction::Right,
            (0, false) => Direction::Left,
            (1, true) => Direction::Anterior,
            (1, false) => Direction::Posterior,
            (_, true) => Direction::Superior,
            (_, false) => Direction::Inferior,
        };
        towards.opposite()
    }

    pub fn is_orthogonal_to(&self, other: &Direction) -> bool {
        self.world_axis() != other.world_axis()
    }

    pub fn letter(&self) -> char {
        match self {
            Direction::Anterior => 'A',
            Direction::Posterior => 'P',
            Direction::Superior => 'S',
            Direction::Inferior => 'I',
            Direction::Left => 'L',
            Direction::Right => 'R',
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "ANTERIOR" => Ok(Direction::Anterior),
            "P" | "POSTERIOR" => Ok(Direction::Posterior),
            "S" | "SUPERIOR" => Ok(Direction::Superior),
            "I" | "INFERIOR" => Ok(Direction::Inferior),
            "L" | "LEFT" => Ok(Direction::Left),
            "R" | "RIGHT" => Ok(Direction::Right),
            _ => Err(Error::InvalidOrientation(format!(
                "`{s}` is not one of A, P, S, I, L, R"
            ))),
        }
    }
}

/// Index axis of a volume array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeAxis {
    X,
    Y,
    Z,
}

impl VolumeAxis {
    pub fn to_usize(&self) -> usize {
        match self {
            VolumeAxis::X => 0,
            VolumeAxis::Y => 1,
            VolumeAxis::Z => 2,
        }
    }

    pub fn from_usize(val: usize) -> Option<Self> {
        match val {
            0 => Some(VolumeAxis::X),
            1 => Some(VolumeAxis::Y),
            2 => Some(VolumeAxis::Z),
            _ => None,
        }
    }
}

impl fmt::Display for VolumeAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_usize())
    }
}

/// Last run of digits in a file name, used to order numbered plane files.
///
/// `fish_plane-010.tif` yields 10. Names without digits sort first.
pub fn extract_number_from_filename(path: &Path) -> u128 {
    let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
        return 0;
    };
    let mut number_str = String::new();
    let mut last_run = String::new();
    for ch in filename.chars() {
        if ch.is_ascii_digit() {
            number_str.push(ch);
        } else if !number_str.is_empty() {
            last_run = std::mem::take(&mut number_str);
        }
    }
    if !number_str.is_empty() {
        last_run = number_str;
    }
    last_run.parse::<u128>().unwrap_or(0)
}

/// File name for a region, derived from its atlas name.
///
/// `Telencephalon :: Olfactory Bulb` becomes `Telencephalon__Olfactory-Bulb`.
pub fn regularise_name(name: &str) -> String {
    name.replace("::", "").replace("  ", "__").replace(' ', "-")
}

/// Strips `.nii`, `.nii.gz` and any other single extension from a file name.
pub fn volume_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    if let Some(stem) = name.strip_suffix(".nii.gz") {
        return stem.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_axis_vectors_start_on_named_side() {
        // an axis starting anterior runs towards posterior, i.e. -y
        assert_eq!(Direction::Anterior.axis_vector(), Vector3::new(0.0, -1.0, 0.0));
        assert_eq!(Direction::Left.axis_vector(), Vector3::new(1.0, 0.0, 0.0));
        for d in Direction::ALL {
            let v = d.axis_vector();
            let back = Direction::from_axis_vector(d.world_axis(), v[d.world_axis()] > 0.0);
            assert_eq!(back, d);
        }
    }

    #[test]
    fn test_orthogonality() {
        assert!(Direction::Posterior.is_orthogonal_to(&Direction::Right));
        assert!(!Direction::Anterior.is_orthogonal_to(&Direction::Anterior));
        assert!(!Direction::Anterior.is_orthogonal_to(&Direction::Posterior));
    }

    #[test]
    fn test_parse_direction() {
        assert_eq!("p".parse::<Direction>().unwrap(), Direction::Posterior);
        assert_eq!("Superior".parse::<Direction>().unwrap(), Direction::Superior);
        assert!("X".parse::<Direction>().is_err());
    }

    #[test]
    fn test_extract_number_from_filename() {
        let path = PathBuf::from("/data/fish2_plane-010.tif");
        assert_eq!(extract_number_from_filename(&path), 10);
        assert_eq!(extract_number_from_filename(&PathBuf::from("plane.tif")), 0);
        assert_eq!(extract_number_from_filename(&PathBuf::from("7.png")), 7);
    }

    #[test]
    fn test_regularise_name() {
        assert_eq!(
            regularise_name("Telencephalon :: Olfactory Bulb"),
            "Telencephalon__Olfactory-Bulb"
        );
        assert_eq!(regularise_name("Hemispheres :: Right"), "Hemispheres__Right");
    }

    #[test]
    fn test_volume_stem() {
        assert_eq!(volume_stem(&PathBuf::from("a/fish.nii.gz")), "fish");
        assert_eq!(volume_stem(&PathBuf::from("fish.nii")), "fish");
        assert_eq!(volume_stem(&PathBuf::from("fish")), "fish");
    }
}
