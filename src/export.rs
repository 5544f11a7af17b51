//! Per-plane export of region masks as LabelMe annotations or outline images.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::ValueEnum;
use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array2, Array3, Axis};
use serde::Serialize;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::common::VolumeAxis;
use crate::contour::{outline, polygons};
use crate::error::{Error, Result};
use crate::masks::Segmentation;
use crate::nifti_io::create_parent;
use crate::planes::{normalise, plane_file_names, to_gray_image};
use crate::volume::VolumeImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    /// One LabelMe JSON annotation per plane.
    #[value(name = "labelme")]
    LabelMe,
    /// One PNG per plane with region outlines over the image.
    Raster,
}

/// One exported region. Hemisphere splitting may turn a mask into two.
#[derive(Debug, Clone)]
pub struct Region {
    pub name: String,
    pub mask: Array3<bool>,
}

/// Picks the regions to export, split into hemispheres when `hemisphere`
/// names a region mask.
///
/// The hemisphere mask covers the right hemisphere. It is not exported
/// itself. An unknown hemisphere name is reported and the regions are
/// exported unsplit.
pub fn select_regions(
    segmentation: &Segmentation,
    names: Option<&[String]>,
    hemisphere: Option<&str>,
) -> Result<Vec<Region>> {
    let right = match hemisphere {
        Some(name) => match segmentation.mask(name) {
            Ok(mask) => Some((name, mask.data())),
            Err(_) => {
                warn!(hemisphere = name, "hemisphere mask not found, exporting regions unsplit");
                None
            }
        },
        None => None,
    };

    let mut regions = Vec::new();
    for (name, mask) in segmentation.masks() {
        if names.map_or(false, |wanted| !wanted.iter().any(|w| w == name)) {
            continue;
        }
        match right {
            Some((hemisphere_name, _)) if hemisphere_name == name => continue,
            Some((_, right)) => {
                let data = mask.data();
                regions.push(Region {
                    name: format!("{name} (right)"),
                    mask: ndarray::Zip::from(data).and(right).map_collect(|&m, &r| m && r),
                });
                regions.push(Region {
                    name: format!("{name} (left)"),
                    mask: ndarray::Zip::from(data).and(right).map_collect(|&m, &r| m && !r),
                });
            }
            None => regions.push(Region {
                name: name.to_string(),
                mask: mask.data().clone(),
            }),
        }
    }
    if let Some(wanted) = names {
        for name in wanted {
            if segmentation.mask(name).is_err() {
                warn!(region = %name, "region not found in region masks, skipping");
            }
        }
    }
    Ok(regions)
}

/// Plane `index` along `axis`, transposed so that image columns follow the
/// first remaining volume axis.
fn plane_of<T: Clone>(data: &Array3<T>, axis: VolumeAxis, index: usize) -> Array2<T> {
    data.index_axis(Axis(axis.to_usize()), index).t().to_owned()
}

#[derive(Debug, Serialize)]
struct LabelMeShape<'a> {
    label: &'a str,
    points: Vec<[f64; 2]>,
    group_id: Option<u32>,
    shape_type: &'static str,
    flags: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelMeFile<'a> {
    version: &'static str,
    flags: serde_json::Map<String, serde_json::Value>,
    shapes: Vec<LabelMeShape<'a>>,
    image_path: &'static str,
    image_data: String,
    image_height: usize,
    image_width: usize,
}

const LABELME_VERSION: &str = "4.5.6";

fn png_base64(image: &GrayImage) -> Result<String> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image.clone()).write_to(&mut buffer, ImageFormat::Png)?;
    Ok(STANDARD.encode(buffer.into_inner()))
}

const PALETTE: [[u8; 3]; 8] = [
    [230, 25, 75],
    [60, 180, 75],
    [255, 225, 25],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
];

/// Writes one file per plane of `moving` along `axis`.
///
/// # Arguments
///
/// * `moving` - Image the regions were transformed onto.
/// * `regions` - Regions on the grid of `moving`.
/// * `format` - LabelMe JSON or outline PNG.
/// * `axis` - Volume axis the planes are taken across.
/// * `output_file_format` - Path with one `{}` for the plane index.
/// * `include_holes` - Also export hole boundaries as polygons.
///
/// # Returns
///
/// The written paths, in plane order.
pub fn export_planes(
    moving: &VolumeImage,
    regions: &[Region],
    format: ExportFormat,
    axis: VolumeAxis,
    output_file_format: &str,
    include_holes: bool,
) -> Result<Vec<PathBuf>> {
    let shape = moving.shape();
    if let Some(region) = regions.iter().find(|r| r.mask.shape() != shape.as_slice()) {
        return Err(Error::invalid_parameter(
            "region masks",
            format!(
                "{} has shape {:?}, expected {:?}",
                region.name,
                region.mask.shape(),
                shape
            ),
        ));
    }
    let count = shape[axis.to_usize()];
    let paths = plane_file_names(output_file_format, count)?;
    let image = normalise(moving.data());
    info!(planes = count, regions = regions.len(), ?format, "exporting segmentation");

    for (index, path) in paths.iter().enumerate() {
        create_parent(path)?;
        let gray = to_gray_image(&plane_of(&image, axis, index));
        match format {
            ExportFormat::LabelMe => {
                let mut shapes = Vec::new();
                for region in regions {
                    let plane = plane_of(&region.mask, axis, index);
                    for polygon in polygons(&plane, include_holes) {
                        shapes.push(LabelMeShape {
                            label: &region.name,
                            points: polygon.points,
                            group_id: None,
                            shape_type: "polygon",
                            flags: serde_json::Map::new(),
                        });
                    }
                }
                let file = LabelMeFile {
                    version: LABELME_VERSION,
                    flags: serde_json::Map::new(),
                    shapes,
                    image_path: "",
                    image_data: png_base64(&gray)?,
                    image_height: gray.height() as usize,
                    image_width: gray.width() as usize,
                };
                fs::write(path, serde_json::to_string(&file)?)?;
            }
            ExportFormat::Raster => {
                let mut rgb = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
                    let v = gray.get_pixel(x, y)[0];
                    Rgb([v, v, v])
                });
                for (n, region) in regions.iter().enumerate() {
                    let colour = Rgb(PALETTE[n % PALETTE.len()]);
                    let edge = outline(&plane_of(&region.mask, axis, index));
                    for ((row, col), _) in edge.indexed_iter().filter(|(_, on)| **on) {
                        rgb.put_pixel(col as u32, row as u32, colour);
                    }
                }
                rgb.save_with_format(path, ImageFormat::Png)?;
            }
        }
        debug!(plane = index, path = %path.display(), "exported plane");
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Volume;
    use nalgebra::Matrix3;
    use ndarray::s;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn mask(fill: impl Fn(&mut Array3<bool>)) -> Volume<bool> {
        let mut data = Array3::from_elem((6, 5, 3), false);
        fill(&mut data);
        Volume::from_geometry(data, [1.0; 3], Matrix3::identity(), [0.0; 3]).unwrap()
    }

    fn segmentation() -> Segmentation {
        let mut masks = BTreeMap::new();
        masks.insert(
            "Tectum".to_string(),
            mask(|d| d.slice_mut(s![1..5, 1..4, ..]).fill(true)),
        );
        masks.insert(
            "Right hemisphere".to_string(),
            mask(|d| d.slice_mut(s![3.., .., ..]).fill(true)),
        );
        Segmentation::from_masks(masks).unwrap()
    }

    fn moving() -> VolumeImage {
        let data = Array3::from_shape_fn((6, 5, 3), |(i, j, k)| (i + j + k) as f32);
        Volume::from_geometry(data, [1.0; 3], Matrix3::identity(), [0.0; 3]).unwrap()
    }

    #[test]
    fn test_hemisphere_split() {
        let seg = segmentation();
        let regions = select_regions(&seg, None, Some("Right hemisphere")).unwrap();
        let names: Vec<&str> = regions.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Tectum (right)", "Tectum (left)"]);
        let right = regions[0].mask.iter().filter(|&&v| v).count();
        let left = regions[1].mask.iter().filter(|&&v| v).count();
        assert_eq!(right, 2 * 3 * 3);
        assert_eq!(left, 2 * 3 * 3);
    }

    #[test]
    fn test_unknown_hemisphere_exports_unsplit() {
        let seg = segmentation();
        let regions = select_regions(&seg, None, Some("Nowhere")).unwrap();
        assert_eq!(regions.len(), 2);
        let wanted = ["Tectum".to_string()];
        let regions = select_regions(&seg, Some(&wanted), None).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].name, "Tectum");
    }

    #[test]
    fn test_labelme_export() {
        let dir = tempdir().unwrap();
        let format = dir.path().join("plane_{}.json");
        let regions = select_regions(&segmentation(), None, Some("Right hemisphere")).unwrap();
        let paths = export_planes(
            &moving(),
            &regions,
            ExportFormat::LabelMe,
            VolumeAxis::Z,
            format.to_str().unwrap(),
            false,
        )
        .unwrap();
        assert_eq!(paths.len(), 3);
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths[1]).unwrap()).unwrap();
        assert_eq!(json["version"], "4.5.6");
        assert_eq!(json["imagePath"], "");
        // planes are transposed: width follows the first volume axis
        assert_eq!(json["imageWidth"], 6);
        assert_eq!(json["imageHeight"], 5);
        let shapes = json["shapes"].as_array().unwrap();
        assert_eq!(shapes.len(), 2);
        assert_eq!(shapes[0]["label"], "Tectum (right)");
        assert!(shapes[0]["group_id"].is_null());
        assert_eq!(shapes[0]["shape_type"], "polygon");
        assert_eq!(shapes[0]["points"].as_array().unwrap().len(), 4);
        let png = STANDARD.decode(json["imageData"].as_str().unwrap()).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (6, 5));
    }

    #[test]
    fn test_raster_export() {
        let dir = tempdir().unwrap();
        let format = dir.path().join("{}.png");
        let regions = select_regions(&segmentation(), None, None).unwrap();
        let paths = export_planes(
            &moving(),
            &regions,
            ExportFormat::Raster,
            VolumeAxis::X,
            format.to_str().unwrap(),
            false,
        )
        .unwrap();
        assert_eq!(paths.len(), 6);
        let image = image::open(&paths[2]).unwrap().to_rgb8();
        assert_eq!((image.width(), image.height()), (5, 3));
        assert!(image.pixels().any(|p| p.0 == PALETTE[0] || p.0 == PALETTE[1]));
    }

    #[test]
    fn test_mismatched_region_is_rejected() {
        let regions = [Region {
            name: "small".to_string(),
            mask: Array3::from_elem((2, 2, 2), true),
        }];
        let err = export_planes(&moving(), &regions, ExportFormat::Raster, VolumeAxis::Z, "{}.png", false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }
}
