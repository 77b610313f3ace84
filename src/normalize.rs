use image::codecs::webp::{WebPEncoder, WebPQuality};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView};

use crate::{AvatarError, Result, WEBP_MIME_TYPE, WEBP_QUALITY};

/// A WebP-encoded image ready to be stored as an avatar.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    pub fn mime_type(&self) -> &'static str {
        WEBP_MIME_TYPE
    }
}

/// Decode `data`, shrink it so that its longer edge fits into
/// `max_dimension` and re-encode it as lossy WebP.
///
/// Images which already fit are re-encoded at their original size,
/// never upscaled.
pub fn normalize(data: &[u8], max_dimension: u32) -> Result<NormalizedImage> {
    if max_dimension == 0 {
        return Err(AvatarError::Validation(
            "maximum dimension must be positive".to_owned(),
        ));
    }

    let img = image::load_from_memory(data)?;
    let (width, height) = img.dimensions();
    let (target_width, target_height) =
        bounded_dimensions(width, height, max_dimension);

    log::debug!(
        "normalizing {}x{} image into {}x{}",
        width,
        height,
        target_width,
        target_height
    );

    let img = if (target_width, target_height) == (width, height) {
        img
    } else {
        img.resize_exact(target_width, target_height, FilterType::Triangle)
    };

    let bytes = encode_webp(&img)?;
    log::debug!("encoded avatar into {} bytes of WebP", bytes.len());

    Ok(NormalizedImage {
        bytes,
        width: target_width,
        height: target_height,
    })
}

/// Dimensions after clamping the longer edge to `bound`.
///
/// The shorter edge scales proportionally and is truncated, but never
/// drops below one pixel.
pub fn bounded_dimensions(width: u32, height: u32, bound: u32) -> (u32, u32) {
    let scale = |short: u32, long: u32| -> u32 {
        let scaled = u64::from(short) * u64::from(bound) / u64::from(long);
        (scaled as u32).max(1)
    };

    if width > height {
        if width > bound {
            return (bound, scale(height, width));
        }
    } else if height > bound {
        return (scale(width, height), bound);
    }
    (width, height)
}

fn encode_webp(img: &DynamicImage) -> Result<Vec<u8>> {
    let rgba = img.to_rgba8();
    let mut bytes = Vec::new();
    let quality = WebPQuality::lossy(WEBP_QUALITY);
    WebPEncoder::new_with_quality(&mut bytes, quality).encode(
        rgba.as_raw(),
        rgba.width(),
        rgba.height(),
        ColorType::Rgba8,
    )?;
    Ok(bytes)
}
