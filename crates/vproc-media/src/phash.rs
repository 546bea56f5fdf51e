//! Perceptual image hashing (DCT pHash).
//!
//! The image is reduced to a 32x32 grayscale grid, transformed with a 2-D
//! DCT-II, and the top-left 8x8 low-frequency block is compared against its
//! median. Each coefficient above the median sets one bit, giving a 64-bit
//! hash rendered as 16 lowercase hex characters (row-major, MSB first).

use std::f64::consts::PI;
use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::{MediaError, MediaResult};

const GRID: usize = 32;
const BLOCK: usize = 8;

/// Hash an image file.
pub fn phash_file(path: &Path) -> MediaResult<String> {
    let img = image::open(path)
        .map_err(|e| MediaError::Hashing(format!("{}: {}", path.display(), e)))?;
    Ok(format_hash(phash_image(&img)))
}

/// Hash a decoded image.
pub fn phash_image(img: &DynamicImage) -> u64 {
    let small = img
        .grayscale()
        .resize_exact(GRID as u32, GRID as u32, FilterType::Lanczos3)
        .to_luma8();

    let mut pixels = [[0f64; GRID]; GRID];
    for (x, y, p) in small.enumerate_pixels() {
        pixels[y as usize][x as usize] = p.0[0] as f64;
    }

    let block = low_frequency_dct(&pixels);

    let mut values: Vec<f64> = block.iter().flatten().copied().collect();
    let median = median(&mut values);

    let mut hash = 0u64;
    for (i, value) in block.iter().flatten().enumerate() {
        if *value > median {
            hash |= 1 << (BLOCK * BLOCK - 1 - i);
        }
    }
    hash
}

pub fn format_hash(hash: u64) -> String {
    format!("{:016x}", hash)
}

/// 2-D DCT-II restricted to the first `BLOCK` frequencies on each axis.
fn low_frequency_dct(pixels: &[[f64; GRID]; GRID]) -> [[f64; BLOCK]; BLOCK] {
    let n = GRID as f64;

    // Columns first: cols[u][x] = sum_y pixels[y][x] * cos(pi * u * (2y + 1) / 2N)
    let mut cols = [[0f64; GRID]; BLOCK];
    for (u, row) in cols.iter_mut().enumerate() {
        for (x, out) in row.iter_mut().enumerate() {
            *out = (0..GRID)
                .map(|y| pixels[y][x] * (PI * u as f64 * (2 * y + 1) as f64 / (2.0 * n)).cos())
                .sum();
        }
    }

    let mut block = [[0f64; BLOCK]; BLOCK];
    for (u, row) in block.iter_mut().enumerate() {
        for (v, out) in row.iter_mut().enumerate() {
            *out = (0..GRID)
                .map(|x| cols[u][x] * (PI * v as f64 * (2 * x + 1) as f64 / (2.0 * n)).cos())
                .sum();
        }
    }
    block
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn texture(invert: bool) -> DynamicImage {
        let img = GrayImage::from_fn(128, 96, |x, y| {
            let v = ((x * 31 + y * 17) ^ (x * y)) % 256;
            Luma([if invert { 255 - v as u8 } else { v as u8 }])
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(phash_image(&texture(false)), phash_image(&texture(false)));
    }

    #[test]
    fn test_different_images_differ() {
        assert_ne!(phash_image(&texture(false)), phash_image(&texture(true)));
    }

    #[test]
    fn test_format_hash() {
        assert_eq!(format_hash(0), "0000000000000000");
        assert_eq!(format_hash(0xabc), "0000000000000abc");
        assert_eq!(format_hash(u64::MAX).len(), 16);
    }

    #[test]
    fn test_hash_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        texture(false).save(&path).unwrap();

        let hash = phash_file(&path).unwrap();
        assert_eq!(hash, format_hash(phash_image(&texture(false))));
    }

    #[test]
    fn test_unreadable_file_is_hashing_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(matches!(phash_file(&path), Err(MediaError::Hashing(_))));
    }
}
