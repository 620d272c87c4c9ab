//! Foreground Bounding Box
//!
//! Background-removed product shots carry a lot of empty margin. The
//! content mask is the alpha channel when there is one, luminance otherwise;
//! any non-zero mask value is content.

use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CropError {
    #[error("Image has no foreground content ({0}x{1})")]
    NoContent(u32, u32),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Inclusive pixel bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    /// Grow by `padding` on every side without leaving the image.
    pub fn padded(&self, padding: u32, image_width: u32, image_height: u32) -> Self {
        Self {
            min_x: self.min_x.saturating_sub(padding),
            min_y: self.min_y.saturating_sub(padding),
            max_x: self.max_x.saturating_add(padding).min(image_width.saturating_sub(1)),
            max_y: self.max_y.saturating_add(padding).min(image_height.saturating_sub(1)),
        }
    }
}

fn mark(hit: bool) -> Luma<u8> {
    Luma([if hit { 255 } else { 0 }])
}

/// 255 where there is content, 0 elsewhere. The test runs at the image's
/// native depth; a 16-bit alpha of 100 is content even though it rounds to
/// 0 in eight bits.
pub fn content_mask(img: &DynamicImage) -> GrayImage {
    let color = img.color();
    let (width, height) = img.dimensions();
    let alpha = color.has_alpha();

    match color.bytes_per_pixel() / color.channel_count() {
        1 if alpha => {
            let rgba = img.to_rgba8();
            GrayImage::from_fn(width, height, |x, y| mark(rgba.get_pixel(x, y)[3] > 0))
        }
        1 => {
            let luma = img.to_luma8();
            GrayImage::from_fn(width, height, |x, y| mark(luma.get_pixel(x, y)[0] > 0))
        }
        2 if alpha => {
            let rgba = img.to_rgba16();
            GrayImage::from_fn(width, height, |x, y| mark(rgba.get_pixel(x, y)[3] > 0))
        }
        2 => {
            let luma = img.to_luma16();
            GrayImage::from_fn(width, height, |x, y| mark(luma.get_pixel(x, y)[0] > 0))
        }
        _ if alpha => {
            let rgba = img.to_rgba32f();
            GrayImage::from_fn(width, height, |x, y| mark(rgba.get_pixel(x, y)[3] > 0.0))
        }
        _ => {
            let luma = img.to_luma32f();
            GrayImage::from_fn(width, height, |x, y| mark(luma.get_pixel(x, y)[0] > 0.0))
        }
    }
}

pub fn foreground_bounds(img: &DynamicImage) -> Result<BoundingBox, CropError> {
    let mask = content_mask(img);
    let mut bounds: Option<BoundingBox> = None;

    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel[0] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => BoundingBox { min_x: x, min_y: y, max_x: x, max_y: y },
            Some(b) => BoundingBox {
                min_x: b.min_x.min(x),
                min_y: b.min_y.min(y),
                max_x: b.max_x.max(x),
                max_y: b.max_y.max(y),
            },
        });
    }

    bounds.ok_or(CropError::NoContent(img.width(), img.height()))
}

/// Crop to the foreground, optionally padded. An empty image is an error,
/// never a pass-through.
pub fn crop_to_content(img: &DynamicImage, padding: u32) -> Result<(DynamicImage, BoundingBox), CropError> {
    let (width, height) = img.dimensions();
    let bounds = foreground_bounds(img)?.padded(padding, width, height);
    tracing::debug!(?bounds, width, height, "cropping to foreground");
    let cropped = img.crop_imm(bounds.min_x, bounds.min_y, bounds.width(), bounds.height());
    Ok((cropped, bounds))
}

pub fn crop_file(input: &Path, output: &Path, padding: u32) -> Result<BoundingBox, CropError> {
    let img = image::open(input)?;
    let (cropped, bounds) = crop_to_content(&img, padding)?;
    cropped.save(output)?;
    Ok(bounds)
}
