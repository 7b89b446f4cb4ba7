//! Composition of the per-channel rasters into the final image.

use std::path::Path;

use image::{RgbImage, imageops};
use thiserror::Error;

/// 3x3 sharpen kernel, applied once to the composited canvas.
const SHARPEN_KERNEL: [f32; 9] = [
    -2.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
    32.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
];

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("failed to read raster {path}")]
    Read {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write composed image {path}")]
    Write {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Stacks the three rasters vertically in the given order, sharpens the
/// canvas once, and writes the final image. The canvas takes the first
/// raster's width and the sum of all three heights.
pub fn compose(rasters: [&Path; 3], out: &Path) -> Result<(), ComposeError> {
    let mut tiles = Vec::with_capacity(rasters.len());
    for path in rasters {
        let tile = image::open(path)
            .map_err(|source| ComposeError::Read {
                path: path.display().to_string(),
                source,
            })?
            .into_rgb8();
        tiles.push(tile);
    }

    let width = tiles[0].width();
    let height = tiles.iter().map(RgbImage::height).sum();
    let mut canvas = RgbImage::new(width, height);
    let mut offset: i64 = 0;
    for tile in &tiles {
        imageops::replace(&mut canvas, tile, 0, offset);
        offset += i64::from(tile.height());
    }

    let sharpened = imageops::filter3x3(&canvas, &SHARPEN_KERNEL);
    sharpened.save(out).map_err(|source| ComposeError::Write {
        path: out.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_tile(path: &Path, width: u32, height: u32, color: Rgb<u8>) {
        let mut tile = RgbImage::new(width, height);
        for pixel in tile.pixels_mut() {
            *pixel = color;
        }
        tile.save(path).unwrap();
    }

    #[test]
    fn canvas_takes_first_width_and_summed_heights() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        let c = dir.path().join("c.png");
        write_tile(&a, 120, 40, Rgb([200, 0, 0]));
        write_tile(&b, 120, 50, Rgb([0, 200, 0]));
        write_tile(&c, 120, 60, Rgb([0, 0, 200]));

        let out = dir.path().join("combined.png");
        compose([&a, &b, &c], &out).unwrap();

        let combined = image::open(&out).unwrap().into_rgb8();
        assert_eq!(combined.width(), 120);
        assert_eq!(combined.height(), 150);
        // interior pixels keep each tile's color through the sharpen pass
        assert_eq!(combined.get_pixel(60, 20), &Rgb([200, 0, 0]));
        assert_eq!(combined.get_pixel(60, 65), &Rgb([0, 200, 0]));
        assert_eq!(combined.get_pixel(60, 120), &Rgb([0, 0, 200]));
    }

    #[test]
    fn missing_tile_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        write_tile(&a, 10, 10, Rgb([1, 2, 3]));
        let absent = dir.path().join("absent.png");
        let out = dir.path().join("combined.png");
        let err = compose([&a, &absent, &a], &out).unwrap_err();
        assert!(matches!(err, ComposeError::Read { .. }));
    }
}
