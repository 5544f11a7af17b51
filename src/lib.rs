//! Tools for registering larval zebrafish brain scans to a reference atlas.
//!
//! Plane images are stacked into NIfTI volumes (`stack`), registered against an
//! atlas built from a raw atlas distribution (`atlas`, `registration`), and the
//! atlas region masks are carried back onto the scan (`masks`) where they can be
//! queried or exported as per-plane annotations (`export`).

pub mod ants;
pub mod atlas;
pub mod common;
pub mod config;
pub mod contour;
pub mod error;
pub mod export;
pub mod logging;
pub mod masks;
pub mod morphology;
pub mod nifti_io;
pub mod planes;
pub mod registration;
pub mod resample;
pub mod stack;
pub mod volume;

pub use error::{Error, ErrorKind, Result};
pub use volume::{Volume, VolumeImage};
