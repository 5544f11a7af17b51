use nalgebra::Matrix3;
use ndarray::{s, Array3};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use zebranii::atlas::{build_atlas, Atlas, DirectorySource, Subset};
use zebranii::masks::{region_masks_dir, transform_masks, MaskOptions, Segmentation};
use zebranii::morphology::CleanupParams;
use zebranii::nifti_io::{read_volume, write_volume};
use zebranii::registration::{run_registration, Registration, TransformPair, Warp};
use zebranii::resample::{resample_to_grid, Interpolation};
use zebranii::{Error, Volume, VolumeImage};

/// Registration that always finds the identity, and a warp that resamples
/// through world coordinates only.
struct IdentityToolkit;

impl Registration for IdentityToolkit {
    fn register(&self, _: &VolumeImage, _: &VolumeImage, outputs: &TransformPair) -> zebranii::Result<()> {
        fs::write(&outputs.forward, "identity")?;
        fs::write(&outputs.inverse, "identity")?;
        Ok(())
    }
}

impl Warp for IdentityToolkit {
    fn warp(&self, volume: &VolumeImage, reference: &VolumeImage, transform: &Path) -> zebranii::Result<VolumeImage> {
        if !transform.is_file() {
            return Err(Error::MissingFile(transform.to_path_buf()));
        }
        resample_to_grid(volume, reference, Interpolation::Linear)
    }
}

struct BrokenToolkit;

impl Registration for BrokenToolkit {
    fn register(&self, _: &VolumeImage, _: &VolumeImage, outputs: &TransformPair) -> zebranii::Result<()> {
        fs::write(&outputs.inverse, "half")?;
        Err(Error::registration_failed("antsRegistration exited with 1"))
    }
}

fn grid<T>(data: Array3<T>) -> Volume<T> {
    Volume::from_geometry(data, [2.0, 2.0, 4.0], Matrix3::identity(), [0.0; 3]).unwrap()
}

fn raw_atlas(root: &Path) {
    let brain = Array3::from_shape_fn((10, 10, 6), |(i, j, k)| (i + j + k) as f32);
    write_volume(&root.join("reference.nii.gz"), &grid(brain.clone())).unwrap();
    write_volume(&root.join("labels").join("elavl3.nii.gz"), &grid(brain)).unwrap();

    let mut forebrain = Array3::<f32>::zeros((10, 10, 6));
    forebrain.slice_mut(s![0..5, 2..8, 1..5]).fill(1.0);
    write_volume(&root.join("masks").join("Forebrain.nii.gz"), &grid(forebrain)).unwrap();

    let mut hindbrain = Array3::<f32>::zeros((10, 10, 6));
    hindbrain.slice_mut(s![5..10, 2..8, 1..5]).fill(1.0);
    // a stray voxel the cleanup removes
    hindbrain[[0, 0, 0]] = 1.0;
    write_volume(&root.join("masks").join("Hindbrain.nii.gz"), &grid(hindbrain)).unwrap();
}

#[test]
fn registration_then_masks_then_lookup() {
    let dir = tempdir().unwrap();
    let raw = dir.path().join("raw");
    raw_atlas(&raw);
    let atlas_dir = dir.path().join("atlas");
    build_atlas(&DirectorySource::open(&raw).unwrap(), None, None, &atlas_dir).unwrap();

    let moving_path = dir.path().join("fish01").join("fish01.nii.gz");
    write_volume(
        &moving_path,
        &grid(Array3::from_shape_fn((10, 10, 6), |(i, _, _)| i as f32)),
    )
    .unwrap();
    let moving = read_volume(&moving_path).unwrap();

    let atlas = Atlas::load(&atlas_dir, Subset::All, Subset::All).unwrap();
    let fixed = atlas.label("elavl3").unwrap();
    let pair = run_registration(&IdentityToolkit, fixed, &moving, &moving_path).unwrap();
    assert!(pair.exists());

    let options = MaskOptions {
        threshold: 0.5,
        cleanup: Some(CleanupParams::from_physical(2.0, 64.0, moving.spacing()).unwrap()),
    };
    let out_dir = region_masks_dir(&moving_path);
    let content = transform_masks(&IdentityToolkit, &atlas, &moving, &pair.inverse, &options, &out_dir).unwrap();
    assert_eq!(content.len(), 2);
    assert!(out_dir.join("content.json").is_file());

    let segmentation = Segmentation::load(&out_dir, None).unwrap();
    assert_eq!(segmentation.shape(), [10, 10, 6]);
    let at = segmentation.regions_at([2, 4, 2]).unwrap();
    assert_eq!(at.into_iter().collect::<Vec<_>>(), ["Forebrain"]);
    let at = segmentation.regions_at([7, 4, 2]).unwrap();
    assert_eq!(at.into_iter().collect::<Vec<_>>(), ["Hindbrain"]);
    assert!(segmentation.regions_at([0, 0, 0]).unwrap().is_empty());
    // world (14 µm, 8 µm, 8 µm) is voxel (7, 4, 2)
    let at = segmentation.regions_at_world([14.2, 8.0, 8.0]).unwrap();
    assert!(at.contains("Hindbrain"));
    assert!(matches!(
        segmentation.regions_at([10, 0, 0]),
        Err(Error::OutOfBounds { .. })
    ));

    // a second run with fewer masks replaces the directory content
    let only = ["Forebrain".to_string()];
    let atlas = Atlas::load(&atlas_dir, Subset::Nothing, Subset::Only(&only)).unwrap();
    transform_masks(&IdentityToolkit, &atlas, &moving, &pair.inverse, &MaskOptions::default(), &out_dir).unwrap();
    let segmentation = Segmentation::load(&out_dir, None).unwrap();
    assert_eq!(segmentation.names().collect::<Vec<_>>(), ["Forebrain"]);
    assert!(!out_dir.join("Hindbrain.nii.gz").exists());
}

#[test]
fn failed_registration_leaves_nothing_to_warp_with() {
    let dir = tempdir().unwrap();
    let moving_path = dir.path().join("fish02.nii.gz");
    let volume = grid(Array3::<f32>::zeros((4, 4, 4)));
    let err = run_registration(&BrokenToolkit, &volume, &volume, &moving_path).unwrap_err();
    assert_eq!(err.exit_code(), 3);
    let pair = TransformPair::for_moving(&moving_path);
    assert!(!pair.forward.exists());
    assert!(!pair.inverse.exists());
}

#[test]
fn masks_need_the_inverse_transform() {
    let dir = tempdir().unwrap();
    let raw = dir.path().join("raw");
    raw_atlas(&raw);
    let atlas_dir = dir.path().join("atlas");
    build_atlas(&DirectorySource::open(&raw).unwrap(), None, None, &atlas_dir).unwrap();
    let atlas = Atlas::load(&atlas_dir, Subset::Nothing, Subset::All).unwrap();
    let moving = grid(Array3::<f32>::zeros((10, 10, 6)));
    let missing = dir.path().join("registration").join("fish_InverseComposite.h5");
    let err = transform_masks(
        &IdentityToolkit,
        &atlas,
        &moving,
        &missing,
        &MaskOptions::default(),
        &dir.path().join("region-masks"),
    )
    .unwrap_err();
    assert!(matches!(err, Error::MissingFile(_)));
    assert_eq!(err.exit_code(), 1);
}
