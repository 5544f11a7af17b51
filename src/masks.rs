//! Carrying atlas region masks onto a registered moving volume, and looking
//! up which regions contain a voxel.
//!
//! Region masks live in `<moving dir>/region-masks/`, one NIfTI file per
//! region, indexed by a `content.json` mapping region names to file names.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::atlas::Atlas;
use crate::common::regularise_name;
use crate::error::{Error, Result};
use crate::morphology::{cleanup, CleanupParams};
use crate::nifti_io::{read_mask, write_mask};
use crate::registration::Warp;
use crate::volume::{Volume, VolumeImage};

pub const REGION_MASKS_DIR: &str = "region-masks";
pub const CONTENT_FILE: &str = "content.json";

pub fn region_masks_dir(moving_path: &Path) -> PathBuf {
    moving_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(REGION_MASKS_DIR)
}

/// How warped masks are turned back into binary masks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskOptions {
    /// Warped values above this are inside the region.
    pub threshold: f64,
    /// Cleanup applied after thresholding, if any.
    pub cleanup: Option<CleanupParams>,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            cleanup: None,
        }
    }
}

fn read_content(dir: &Path) -> Result<BTreeMap<String, String>> {
    let path = dir.join(CONTENT_FILE);
    if !path.is_file() {
        return Err(Error::MissingFile(path));
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Deletes the masks listed by a previous run, leaving unrelated files alone.
fn clear_previous(dir: &Path) -> Result<()> {
    if !dir.join(CONTENT_FILE).is_file() {
        return Ok(());
    }
    for file in read_content(dir)?.values() {
        let path = dir.join(file);
        if path.is_file() {
            fs::remove_file(path)?;
        }
    }
    fs::remove_file(dir.join(CONTENT_FILE))?;
    debug!(dir = %dir.display(), "removed previous region masks");
    Ok(())
}

/// Warps every mask of `atlas` onto the grid of `moving` through the inverse
/// transform and writes the binary results to `out_dir`.
///
/// # Arguments
///
/// * `warp` - Applies the transform file.
/// * `atlas` - Atlas holding the masks to carry over.
/// * `moving` - The registered moving volume; masks end up on its grid.
/// * `inverse` - Atlas to moving transform.
/// * `options` - Threshold and optional cleanup.
/// * `out_dir` - Region masks directory, rewritten from scratch.
///
/// # Returns
///
/// The region name to file name index that was written as `content.json`.
pub fn transform_masks<W: Warp + ?Sized>(
    warp: &W,
    atlas: &Atlas,
    moving: &VolumeImage,
    inverse: &Path,
    options: &MaskOptions,
    out_dir: &Path,
) -> Result<BTreeMap<String, String>> {
    if !inverse.is_file() {
        return Err(Error::MissingFile(inverse.to_path_buf()));
    }
    fs::create_dir_all(out_dir)?;
    clear_previous(out_dir)?;

    let mut content = BTreeMap::new();
    for (name, mask) in atlas.masks() {
        info!(region = name, "transforming mask");
        let as_float = mask.map(|&inside| if inside { 1.0f32 } else { 0.0 });
        let warped = warp.warp(&as_float, moving, inverse)?;
        if warped.shape() != moving.shape() {
            return Err(Error::registration_failed(format!(
                "warped mask {name} has shape {:?}, expected {:?}",
                warped.shape(),
                moving.shape()
            )));
        }
        let mut binary = warped
            .data()
            .map(|&v| f64::from(v) > options.threshold);
        if let Some(params) = &options.cleanup {
            binary = cleanup(&binary, params);
        }
        if !binary.iter().any(|&v| v) {
            warn!(region = name, "region mask is empty on the moving image");
        }
        let region = moving.with_data(binary)?;
        let file = format!("{}.nii.gz", regularise_name(name));
        write_mask(&out_dir.join(&file), &region)?;
        content.insert(name.to_string(), file);
    }

    fs::write(
        out_dir.join(CONTENT_FILE),
        serde_json::to_string_pretty(&content)?,
    )?;
    info!(dir = %out_dir.display(), regions = content.len(), "wrote region masks");
    Ok(content)
}

/// Region masks on one voxel grid.
#[derive(Debug, Clone)]
pub struct Segmentation {
    masks: BTreeMap<String, Volume<bool>>,
    shape: [usize; 3],
}

impl Segmentation {
    /// All masks must share one shape; at least one is required.
    pub fn from_masks(masks: BTreeMap<String, Volume<bool>>) -> Result<Self> {
        let shape = masks
            .values()
            .next()
            .map(|mask| mask.shape())
            .ok_or_else(|| Error::invalid_parameter("region masks", "no region masks given"))?;
        if let Some((name, mask)) = masks.iter().find(|(_, mask)| mask.shape() != shape) {
            return Err(Error::invalid_parameter(
                "region masks",
                format!("{name} has shape {:?}, expected {:?}", mask.shape(), shape),
            ));
        }
        Ok(Self { masks, shape })
    }

    /// Loads the masks listed in `dir/content.json`, or only `names` of them.
    pub fn load(dir: &Path, names: Option<&[String]>) -> Result<Self> {
        let content = read_content(dir)?;
        let mut masks = BTreeMap::new();
        for (name, file) in &content {
            if names.map_or(true, |wanted| wanted.contains(name)) {
                masks.insert(name.clone(), read_mask(&dir.join(file))?);
            }
        }
        if let Some(wanted) = names {
            for name in wanted.iter().filter(|name| !content.contains_key(*name)) {
                warn!(region = %name, "region not found in region masks, skipping");
            }
        }
        Self::from_masks(masks)
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.masks.keys().map(String::as_str)
    }

    pub fn masks(&self) -> impl Iterator<Item = (&str, &Volume<bool>)> {
        self.masks.iter().map(|(name, mask)| (name.as_str(), mask))
    }

    pub fn mask(&self, name: &str) -> Result<&Volume<bool>> {
        self.masks
            .get(name)
            .ok_or_else(|| Error::UnknownLabel(name.to_string()))
    }

    fn out_of_bounds(&self, index: [i64; 3]) -> Error {
        Error::OutOfBounds {
            index,
            shape: self.shape,
        }
    }

    /// Names of the regions whose mask contains voxel `index`.
    pub fn regions_at(&self, index: [usize; 3]) -> Result<BTreeSet<String>> {
        if index.iter().zip(self.shape).any(|(&i, n)| i >= n) {
            return Err(self.out_of_bounds(index.map(|i| i as i64)));
        }
        Ok(self
            .masks
            .iter()
            .filter(|(_, mask)| mask.data()[index])
            .map(|(name, _)| name.clone())
            .collect())
    }

    /// Names of the regions containing the voxel nearest to a world point.
    pub fn regions_at_world(&self, point: [f64; 3]) -> Result<BTreeSet<String>> {
        let reference = self
            .masks
            .values()
            .next()
            .ok_or_else(|| Error::invalid_parameter("region masks", "no region masks loaded"))?;
        let index = reference.world_to_voxel(point)?.map(|v| v.round() as i64);
        if index.iter().any(|&i| i < 0) {
            return Err(self.out_of_bounds(index));
        }
        self.regions_at(index.map(|i| i as usize))
    }
}
