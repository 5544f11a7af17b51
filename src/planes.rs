//! Plane image files: discovery, decoding and encoding.

use glob::glob;
use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma};
use ndarray::{Array, Array2, Dimension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::common::extract_number_from_filename;
use crate::error::{Error, Result};

/// Lists the plane images in `input_dir` whose names start with
/// `start_string`, ordered by the last number in their file name.
///
/// Files that are not images (such as a `stack.json` sidecar) are skipped.
pub fn discover_planes(input_dir: &Path, start_string: &str) -> Result<Vec<PathBuf>> {
    if !input_dir.is_dir() {
        return Err(Error::MissingFile(input_dir.to_path_buf()));
    }
    let pattern = input_dir.join(format!("{start_string}*"));
    let mut paths: Vec<PathBuf> = glob(&pattern.to_string_lossy())?
        .filter_map(std::result::Result::ok)
        .filter(|path| path.is_file() && ImageFormat::from_path(path).is_ok())
        .collect();
    paths.sort_by_key(|path| extract_number_from_filename(path));
    info!(count = paths.len(), dir = %input_dir.display(), "found plane images");
    Ok(paths)
}

/// Decodes an 8- or 16-bit grayscale image into a `[row, column]` array.
pub fn read_plane(path: &Path) -> Result<Array2<f32>> {
    if !path.is_file() {
        return Err(Error::MissingFile(path.to_path_buf()));
    }
    let plane = match image::open(path)? {
        DynamicImage::ImageLuma8(img) => {
            let (width, height) = img.dimensions();
            Array2::from_shape_fn((height as usize, width as usize), |(row, col)| {
                f32::from(img.get_pixel(col as u32, row as u32)[0])
            })
        }
        DynamicImage::ImageLuma16(img) => {
            let (width, height) = img.dimensions();
            Array2::from_shape_fn((height as usize, width as usize), |(row, col)| {
                f32::from(img.get_pixel(col as u32, row as u32)[0])
            })
        }
        other => {
            return Err(Error::UnsupportedImage {
                path: path.to_path_buf(),
                reason: format!(
                    "expected 8- or 16-bit grayscale, found {:?}",
                    other.color()
                ),
            })
        }
    };
    debug!(path = %path.display(), shape = ?plane.dim(), "read plane");
    Ok(plane)
}

pub fn read_planes(paths: &[PathBuf]) -> Result<Vec<Array2<f32>>> {
    paths.iter().map(|path| read_plane(path)).collect()
}

/// Output paths for `count` planes: the single `{}` of `format` is replaced
/// by the plane index, zero-padded to `ceil(log10(count))` digits.
pub fn plane_file_names(format: &str, count: usize) -> Result<Vec<PathBuf>> {
    if format.matches("{}").count() != 1 {
        return Err(Error::invalid_parameter(
            "output file format",
            format!("{format:?} must contain exactly one {{}} placeholder"),
        ));
    }
    if count == 0 {
        return Err(Error::EmptyStack);
    }
    let width = (count as f64).log10().ceil() as usize;
    Ok((0..count)
        .map(|i| PathBuf::from(format.replacen("{}", &format!("{i:0width$}"), 1)))
        .collect())
}

/// Bit depth that holds every value of a plane without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelDepth {
    Eight,
    Sixteen,
}

impl PixelDepth {
    /// `None` when some value is fractional, negative or above 65535.
    pub fn of(plane: &Array2<f32>) -> Option<Self> {
        let integral = |v: f32| v.is_finite() && v.fract() == 0.0 && v >= 0.0;
        if plane.iter().all(|&v| integral(v) && v <= f32::from(u8::MAX)) {
            Some(PixelDepth::Eight)
        } else if plane.iter().all(|&v| integral(v) && v <= f32::from(u16::MAX)) {
            Some(PixelDepth::Sixteen)
        } else {
            None
        }
    }
}

/// Writes one plane losslessly, as 8-bit when every value fits, otherwise as
/// 16-bit. `index` is reported when neither fits.
pub fn write_plane(path: &Path, plane: &Array2<f32>, index: usize) -> Result<()> {
    let (height, width) = plane.dim();
    match PixelDepth::of(plane) {
        Some(PixelDepth::Eight) => {
            let buf = GrayImage::from_fn(width as u32, height as u32, |x, y| {
                Luma([plane[[y as usize, x as usize]] as u8])
            });
            buf.save(path)?;
        }
        Some(PixelDepth::Sixteen) => {
            let buf: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
                    Luma([plane[[y as usize, x as usize]] as u16])
                });
            buf.save(path)?;
        }
        None => return Err(Error::UnsupportedPixelValues { index }),
    }
    debug!(path = %path.display(), "wrote plane");
    Ok(())
}

/// Rescales values linearly onto [0, 1]. A constant array maps to zeros.
pub fn normalise<D: Dimension>(data: &Array<f32, D>) -> Array<f32, D> {
    let min = data.iter().copied().fold(f32::INFINITY, f32::min);
    let max = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if !(range.is_finite() && range > 0.0) {
        return data.map(|_| 0.0);
    }
    data.map(|&v| (v - min) / range)
}

/// 8-bit rendering of a plane whose values lie in [0, 1].
pub fn to_gray_image(plane: &Array2<f32>) -> GrayImage {
    let (height, width) = plane.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([(plane[[y as usize, x as usize]].clamp(0.0, 1.0) * 255.0).round() as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn test_file_names_are_zero_padded() {
        let names = plane_file_names("out/plane_{}.json", 12).unwrap();
        assert_eq!(names[3], PathBuf::from("out/plane_03.json"));
        assert_eq!(names[11], PathBuf::from("out/plane_11.json"));
        assert_eq!(plane_file_names("p{}.png", 10).unwrap()[9], PathBuf::from("p9.png"));
        assert!(plane_file_names("plane.json", 4).is_err());
        assert!(plane_file_names("{}_{}.json", 4).is_err());
    }

    #[test]
    fn test_plane_depth_selection() {
        assert_eq!(PixelDepth::of(&array![[0.0, 255.0]]), Some(PixelDepth::Eight));
        assert_eq!(PixelDepth::of(&array![[0.0, 256.0]]), Some(PixelDepth::Sixteen));
        assert_eq!(PixelDepth::of(&array![[0.5, 1.0]]), None);
        assert_eq!(PixelDepth::of(&array![[-1.0, 1.0]]), None);
        assert_eq!(PixelDepth::of(&array![[70000.0]]), None);
    }

    #[test]
    fn test_write_then_read_sixteen_bit_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plane-001.png");
        let plane = Array2::from_shape_fn((3, 5), |(r, c)| (r * 1000 + c) as f32);
        write_plane(&path, &plane, 0).unwrap();
        assert_eq!(read_plane(&path).unwrap(), plane);
    }

    #[test]
    fn test_fractional_values_are_rejected() {
        let dir = tempdir().unwrap();
        let err = write_plane(&dir.path().join("p.png"), &array![[0.25]], 7).unwrap_err();
        assert!(matches!(err, Error::UnsupportedPixelValues { index: 7 }));
    }

    #[test]
    fn test_colour_images_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rgb.png");
        image::RgbImage::new(2, 2).save(&path).unwrap();
        assert!(matches!(
            read_plane(&path).unwrap_err(),
            Error::UnsupportedImage { .. }
        ));
    }

    #[test]
    fn test_discover_orders_by_number() {
        let dir = tempdir().unwrap();
        for name in ["fish_plane-10.png", "fish_plane-2.png", "fish_plane-1.png"] {
            write_plane(&dir.path().join(name), &array![[1.0]], 0).unwrap();
        }
        std::fs::write(dir.path().join("stack.json"), "{}").unwrap();
        let paths = discover_planes(dir.path(), "fish_plane").unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["fish_plane-1.png", "fish_plane-2.png", "fish_plane-10.png"]);
    }

    #[test]
    fn test_normalise() {
        let out = normalise(&array![[2.0, 4.0], [6.0, 6.0]]);
        assert_eq!(out, array![[0.0, 0.5], [1.0, 1.0]]);
        assert_eq!(normalise(&array![[3.0, 3.0]]), array![[0.0, 0.0]]);
    }
}
