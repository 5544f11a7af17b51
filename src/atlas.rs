//! Reference atlases: building them from a raw atlas distribution and
//! loading them for registration and mask transformation.
//!
//! An atlas directory holds an optional reference volume, named label
//! volumes (stainings used as registration targets) and named region masks,
//! all on one voxel grid, listed in `content.json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::common::{regularise_name, volume_stem};
use crate::error::{Error, Result};
use crate::nifti_io::{read_mask, read_volume, write_mask, write_volume};
use crate::resample::{resample, Interpolation};
use crate::volume::{Volume, VolumeImage};

pub const CONTENT_FILE: &str = "content.json";

/// A raw atlas distribution.
pub trait AtlasSource {
    fn reference(&self) -> Result<Option<VolumeImage>>;

    fn label_names(&self) -> Vec<String>;

    fn load_label(&self, name: &str) -> Result<VolumeImage>;

    fn mask_names(&self) -> Vec<String>;

    /// Mask values above zero are inside the region.
    fn load_mask(&self, name: &str) -> Result<VolumeImage>;
}

/// Raw atlas laid out as NIfTI files:
///
/// ```text
/// <root>/reference.nii[.gz]
/// <root>/labels/<dataset>.nii[.gz]
/// <root>/masks/<dataset>.nii[.gz]
/// ```
#[derive(Debug, Clone)]
pub struct DirectorySource {
    reference: Option<PathBuf>,
    labels: BTreeMap<String, PathBuf>,
    masks: BTreeMap<String, PathBuf>,
}

fn list_volumes(dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut found = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(found);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if path.is_file() && (name.ends_with(".nii") || name.ends_with(".nii.gz")) {
            found.insert(volume_stem(&path), path);
        }
    }
    Ok(found)
}

impl DirectorySource {
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::MissingFile(root.to_path_buf()));
        }
        let reference = ["reference.nii.gz", "reference.nii"]
            .iter()
            .map(|name| root.join(name))
            .find(|path| path.is_file());
        let source = Self {
            reference,
            labels: list_volumes(&root.join("labels"))?,
            masks: list_volumes(&root.join("masks"))?,
        };
        info!(
            root = %root.display(),
            labels = source.labels.len(),
            masks = source.masks.len(),
            reference = source.reference.is_some(),
            "opened atlas source"
        );
        Ok(source)
    }

    fn lookup<'a>(table: &'a BTreeMap<String, PathBuf>, name: &str) -> Result<&'a PathBuf> {
        table
            .get(name)
            .ok_or_else(|| Error::UnknownLabel(name.to_string()))
    }
}

impl AtlasSource for DirectorySource {
    fn reference(&self) -> Result<Option<VolumeImage>> {
        self.reference.as_deref().map(read_volume).transpose()
    }

    fn label_names(&self) -> Vec<String> {
        self.labels.keys().cloned().collect()
    }

    fn load_label(&self, name: &str) -> Result<VolumeImage> {
        read_volume(Self::lookup(&self.labels, name)?)
    }

    fn mask_names(&self) -> Vec<String> {
        self.masks.keys().cloned().collect()
    }

    fn load_mask(&self, name: &str) -> Result<VolumeImage> {
        read_volume(Self::lookup(&self.masks, name)?)
    }
}

/// Which source datasets go into an atlas, and under which names.
///
/// ```toml
/// [labels]
/// "Elavl3-H2BRFP" = "elavl3_h2brfp"
///
/// [masks]
/// "Diencephalon -" = "diencephalon"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasSelection {
    /// Atlas label name to source dataset name.
    pub labels: BTreeMap<String, String>,
    /// Atlas mask name to source dataset name.
    pub masks: BTreeMap<String, String>,
}

impl AtlasSelection {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MissingFile(path.to_path_buf()));
        }
        Ok(toml::from_str(&fs::read_to_string(path)?)?)
    }

    /// Every dataset of `source` under its own name.
    pub fn everything<S: AtlasSource + ?Sized>(source: &S) -> Self {
        let same = |names: Vec<String>| names.into_iter().map(|n| (n.clone(), n)).collect();
        Self {
            labels: same(source.label_names()),
            masks: same(source.mask_names()),
        }
    }
}

/// The `content.json` index of an atlas directory. Paths are relative to
/// the directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtlasContent {
    pub reference: Option<PathBuf>,
    pub labels: BTreeMap<String, PathBuf>,
    pub masks: BTreeMap<String, PathBuf>,
}

impl AtlasContent {
    pub fn load(directory: &Path) -> Result<Self> {
        let path = directory.join(CONTENT_FILE);
        if !path.is_file() {
            return Err(Error::MissingFile(path));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn save(&self, directory: &Path) -> Result<()> {
        fs::write(
            directory.join(CONTENT_FILE),
            serde_json::to_string_pretty(self)?,
        )?;
        Ok(())
    }
}

fn resampled(volume: VolumeImage, spacing: Option<[f64; 3]>, interpolation: Interpolation) -> Result<VolumeImage> {
    match spacing {
        Some(spacing) => resample(&volume, spacing, interpolation),
        None => Ok(volume),
    }
}

/// Builds an atlas directory from `source`.
///
/// Labels and the reference are resampled trilinearly, masks with nearest
/// neighbour; without `spacing` the source grid is kept. Selected names the
/// source does not provide are skipped with a warning.
pub fn build_atlas<S: AtlasSource + ?Sized>(
    source: &S,
    selection: Option<&AtlasSelection>,
    spacing: Option<[f64; 3]>,
    directory: &Path,
) -> Result<AtlasContent> {
    if directory.exists() {
        return Err(Error::AlreadyExists(directory.to_path_buf()));
    }
    if let Some(spacing) = spacing {
        for (axis, &value) in spacing.iter().enumerate() {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::InvalidSpacing {
                    name: ["spacing x", "spacing y", "spacing z"][axis],
                    value,
                });
            }
        }
    }
    let everything;
    let selection = match selection {
        Some(selection) => selection,
        None => {
            everything = AtlasSelection::everything(source);
            &everything
        }
    };

    let label_names = source.label_names();
    let mask_names = source.mask_names();
    let mut content = AtlasContent::default();
    let mut written: Vec<Volume<()>> = Vec::new();
    fs::create_dir_all(directory)?;

    if let Some(reference) = source.reference()? {
        let reference = resampled(reference, spacing, Interpolation::Linear)?;
        let relative = PathBuf::from("reference").join("reference.nii.gz");
        write_volume(&directory.join(&relative), &reference)?;
        written.push(reference.map(|_| ()));
        content.reference = Some(relative);
    }

    for (name, dataset) in &selection.labels {
        if !label_names.contains(dataset) {
            warn!(label = %name, dataset = %dataset, "label not found in atlas source, skipping");
            continue;
        }
        let label = resampled(source.load_label(dataset)?, spacing, Interpolation::Linear)?;
        let relative = PathBuf::from("labels").join(format!("{}.nii.gz", regularise_name(name)));
        write_volume(&directory.join(&relative), &label)?;
        debug!(label = %name, file = %relative.display(), "wrote label");
        written.push(label.map(|_| ()));
        content.labels.insert(name.clone(), relative);
    }

    for (name, dataset) in &selection.masks {
        if !mask_names.contains(dataset) {
            warn!(mask = %name, dataset = %dataset, "mask not found in atlas source, skipping");
            continue;
        }
        let mask = resampled(source.load_mask(dataset)?, spacing, Interpolation::Nearest)?;
        let relative = PathBuf::from("masks").join(format!("{}.nii.gz", regularise_name(name)));
        write_mask(&directory.join(&relative), &mask.map(|&v| v > 0.0))?;
        debug!(mask = %name, file = %relative.display(), "wrote mask");
        written.push(mask.map(|_| ()));
        content.masks.insert(name.clone(), relative);
    }

    if let Some(first) = written.first() {
        if written.iter().any(|volume| !volume.same_grid(first)) {
            warn!("atlas volumes do not share one voxel grid");
        }
    } else {
        warn!("atlas source provided none of the selected volumes");
    }

    content.save(directory)?;
    info!(
        directory = %directory.display(),
        labels = content.labels.len(),
        masks = content.masks.len(),
        "built atlas"
    );
    Ok(content)
}

/// Which entries of an atlas to load.
#[derive(Debug, Clone, Copy)]
pub enum Subset<'a> {
    All,
    Only(&'a [String]),
    Nothing,
}

impl Subset<'_> {
    fn pick<'n>(&self, available: &'n BTreeMap<String, PathBuf>, kind: &str) -> Vec<(&'n String, &'n PathBuf)> {
        match self {
            Subset::All => available.iter().collect(),
            Subset::Nothing => Vec::new(),
            Subset::Only(names) => names
                .iter()
                .filter_map(|name| {
                    let found = available.get_key_value(name);
                    if found.is_none() {
                        warn!(name = %name, "{kind} not found in atlas, skipping");
                    }
                    found
                })
                .collect(),
        }
    }
}

/// A loaded atlas.
#[derive(Debug, Clone)]
pub struct Atlas {
    directory: PathBuf,
    reference: Option<VolumeImage>,
    labels: BTreeMap<String, VolumeImage>,
    masks: BTreeMap<String, Volume<bool>>,
}

impl Atlas {
    /// Loads the requested labels and masks of the atlas in `directory`.
    /// Requested names the atlas does not contain are skipped with a warning.
    pub fn load(directory: &Path, labels: Subset<'_>, masks: Subset<'_>) -> Result<Self> {
        let content = AtlasContent::load(directory)?;
        let reference = content
            .reference
            .as_ref()
            .map(|relative| read_volume(&directory.join(relative)))
            .transpose()?;
        let mut atlas = Self {
            directory: directory.to_path_buf(),
            reference,
            labels: BTreeMap::new(),
            masks: BTreeMap::new(),
        };
        for (name, relative) in labels.pick(&content.labels, "label") {
            atlas
                .labels
                .insert(name.clone(), read_volume(&directory.join(relative))?);
        }
        for (name, relative) in masks.pick(&content.masks, "mask") {
            atlas
                .masks
                .insert(name.clone(), read_mask(&directory.join(relative))?);
        }
        info!(
            directory = %directory.display(),
            labels = atlas.labels.len(),
            masks = atlas.masks.len(),
            "loaded atlas"
        );
        Ok(atlas)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn reference(&self) -> Option<&VolumeImage> {
        self.reference.as_ref()
    }

    pub fn label(&self, name: &str) -> Result<&VolumeImage> {
        self.labels
            .get(name)
            .ok_or_else(|| Error::UnknownLabel(name.to_string()))
    }

    pub fn mask(&self, name: &str) -> Result<&Volume<bool>> {
        self.masks
            .get(name)
            .ok_or_else(|| Error::UnknownLabel(name.to_string()))
    }

    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    pub fn masks(&self) -> impl Iterator<Item = (&str, &Volume<bool>)> {
        self.masks.iter().map(|(name, mask)| (name.as_str(), mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;
    use ndarray::Array3;
    use tempfile::tempdir;

    fn volume(value: f32) -> VolumeImage {
        Volume::from_geometry(
            Array3::from_elem((4, 4, 2), value),
            [1.0, 1.0, 2.0],
            Matrix3::identity(),
            [0.0; 3],
        )
        .unwrap()
    }

    fn raw_source(root: &Path) {
        write_volume(&root.join("reference.nii.gz"), &volume(7.0)).unwrap();
        write_volume(&root.join("labels").join("elavl3.nii.gz"), &volume(3.0)).unwrap();
        write_volume(&root.join("masks").join("tectum.nii"), &volume(255.0)).unwrap();
        write_volume(&root.join("masks").join("hemisphere.nii.gz"), &volume(0.0)).unwrap();
    }

    #[test]
    fn test_directory_source_lists_datasets() {
        let dir = tempdir().unwrap();
        raw_source(dir.path());
        let source = DirectorySource::open(dir.path()).unwrap();
        assert_eq!(source.label_names(), ["elavl3"]);
        assert_eq!(source.mask_names(), ["hemisphere", "tectum"]);
        assert!(source.reference().unwrap().is_some());
        assert!(matches!(
            source.load_label("huc"),
            Err(Error::UnknownLabel(_))
        ));
    }

    #[test]
    fn test_build_with_selection_and_resampling() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("raw");
        raw_source(&raw);
        let source = DirectorySource::open(&raw).unwrap();
        let selection: AtlasSelection = toml::from_str(
            r#"
            [labels]
            "Elavl3-H2BRFP" = "elavl3"
            "HuC-GCaMP" = "missing"
            [masks]
            "Mesencephalon :: Tectum" = "tectum"
            "#,
        )
        .unwrap();
        let out = dir.path().join("atlas");
        let content = build_atlas(&source, Some(&selection), Some([2.0, 2.0, 2.0]), &out).unwrap();
        assert_eq!(content.labels.len(), 1);
        assert_eq!(
            content.masks["Mesencephalon :: Tectum"],
            PathBuf::from("masks/Mesencephalon__Tectum.nii.gz")
        );

        let atlas = Atlas::load(&out, Subset::All, Subset::All).unwrap();
        let label = atlas.label("Elavl3-H2BRFP").unwrap();
        assert_eq!(label.shape(), [2, 2, 2]);
        assert!(label.data().iter().all(|&v| (v - 3.0).abs() < 1e-6));
        let (_, tectum) = atlas.masks().next().unwrap();
        assert!(tectum.data().iter().all(|&v| v));
        assert!(matches!(atlas.label("HuC-GCaMP"), Err(Error::UnknownLabel(_))));
        assert_eq!(atlas.reference().unwrap().shape(), [2, 2, 2]);
    }

    #[test]
    fn test_build_refuses_existing_directory() {
        let dir = tempdir().unwrap();
        raw_source(dir.path());
        let source = DirectorySource::open(dir.path()).unwrap();
        let err = build_atlas(&source, None, None, dir.path()).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_build_rejects_bad_spacing() {
        let dir = tempdir().unwrap();
        raw_source(dir.path());
        let source = DirectorySource::open(dir.path()).unwrap();
        let err = build_atlas(&source, None, Some([1.0, -1.0, 1.0]), &dir.path().join("a"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSpacing { .. }));
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn test_load_subset() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("raw");
        raw_source(&raw);
        let out = dir.path().join("atlas");
        build_atlas(&DirectorySource::open(&raw).unwrap(), None, None, &out).unwrap();
        let wanted = vec!["tectum".to_string(), "cerebellum".to_string()];
        let atlas = Atlas::load(&out, Subset::Nothing, Subset::Only(&wanted)).unwrap();
        assert_eq!(atlas.label_names().count(), 0);
        assert_eq!(atlas.masks().count(), 1);
        assert!(atlas.mask("tectum").is_ok());
    }
}
