//! Error types shared by every stage of the pipeline.
//!
//! Errors fall into three kinds: invalid input that the operator has to
//! correct, failures of the external registration toolkit, and plain I/O or
//! format problems. Each binary maps the kind to its exit status.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for zebranii operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A plane stack without any planes.
    #[error("Empty plane stack: at least one plane image is required")]
    EmptyStack,

    /// A plane whose pixel dimensions differ from the first plane.
    #[error("Shape mismatch: plane {index} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Orientation or order directions that do not span three axes.
    #[error("Invalid orientation: {0}")]
    InvalidOrientation(String),

    /// A spacing value that is not strictly positive.
    #[error("Invalid spacing: {name} = {value} (must be a positive number)")]
    InvalidSpacing { name: &'static str, value: f64 },

    /// An in-plane rotation that is not a multiple of 90 degrees.
    #[error("Invalid rotation: {0}° is not a multiple of 90°")]
    InvalidRotation(f64),

    /// Any other rejected command line or configuration value.
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A volume whose axes are not aligned with the anatomical axes.
    #[error("Volume axes are not aligned with the anatomical axes")]
    ObliqueVolume,

    /// A NIfTI file that does not hold a 3D volume.
    #[error("{path} is not a 3D volume (found {ndim} dimensions)")]
    NotAVolume { path: PathBuf, ndim: usize },

    /// A label or mask name that the atlas does not contain.
    #[error("Unknown label: {0}")]
    UnknownLabel(String),

    /// A voxel index outside the volume grid.
    #[error("Voxel {index:?} is outside the volume of shape {shape:?}")]
    OutOfBounds { index: [i64; 3], shape: [usize; 3] },

    /// A plane image with a pixel format other than 8/16-bit grayscale.
    #[error("Unsupported image {path}: {reason}")]
    UnsupportedImage { path: PathBuf, reason: String },

    /// Plane values that cannot be written losslessly as an integer image.
    #[error("Plane {index} holds values that do not fit a 16-bit grayscale image")]
    UnsupportedPixelValues { index: usize },

    /// The external registration routine failed or did not converge.
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// A required input file does not exist.
    #[error("File not found: {0}")]
    MissingFile(PathBuf),

    /// An output that must not be overwritten already exists.
    #[error("Output already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Nifti(#[from] nifti::error::NiftiError),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

/// Result type for zebranii operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; rerun after correcting the parameters.
    Validation,
    /// The external toolkit failed.
    External,
    /// Missing, unreadable or corrupt files.
    Io,
}

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a registration failure.
    pub fn registration_failed(msg: impl Into<String>) -> Self {
        Self::RegistrationFailed(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyStack
            | Error::ShapeMismatch { .. }
            | Error::InvalidOrientation(_)
            | Error::InvalidSpacing { .. }
            | Error::InvalidRotation(_)
            | Error::InvalidParameter { .. }
            | Error::ObliqueVolume
            | Error::UnknownLabel(_)
            | Error::OutOfBounds { .. }
            | Error::UnsupportedPixelValues { .. }
            | Error::AlreadyExists(_) => ErrorKind::Validation,
            Error::RegistrationFailed(_) => ErrorKind::External,
            Error::NotAVolume { .. }
            | Error::UnsupportedImage { .. }
            | Error::MissingFile(_)
            | Error::Io(_)
            | Error::Nifti(_)
            | Error::Image(_)
            | Error::Json(_)
            | Error::Toml(_)
            | Error::Pattern(_) => ErrorKind::Io,
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Validation => 2,
            ErrorKind::External => 3,
            ErrorKind::Io => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_display() {
        let err = Error::ShapeMismatch {
            index: 3,
            expected: (100, 100),
            actual: (100, 99),
        };
        let msg = err.to_string();
        assert!(msg.contains("plane 3"));
        assert!(msg.contains("(100, 99)"));
    }

    #[test]
    fn test_kinds_and_exit_codes() {
        assert_eq!(Error::EmptyStack.kind(), ErrorKind::Validation);
        assert_eq!(Error::registration_failed("diverged").kind(), ErrorKind::External);
        assert_eq!(Error::MissingFile(PathBuf::from("a.nii")).kind(), ErrorKind::Io);
        assert_eq!(Error::InvalidRotation(45.0).exit_code(), 2);
        assert_eq!(Error::registration_failed("x").exit_code(), 3);
    }
}
