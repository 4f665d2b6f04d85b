//! RGB24 resampling to output geometry.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::{Result, VtsError};

/// Resample an RGB24 buffer to the target geometry with a Lanczos kernel.
///
/// Matching geometry is a zero-copy passthrough.
pub fn scale_rgb24(
    rgb: Vec<u8>,
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
) -> Result<Vec<u8>> {
    if rgb.len() != src_w as usize * src_h as usize * 3 {
        return Err(VtsError::Internal(format!(
            "RGB buffer is {} bytes, expected {} for {}x{}",
            rgb.len(),
            src_w as usize * src_h as usize * 3,
            src_w,
            src_h
        )));
    }
    if src_w == dst_w && src_h == dst_h {
        return Ok(rgb);
    }

    let img = RgbImage::from_raw(src_w, src_h, rgb)
        .ok_or_else(|| VtsError::Internal("RGB buffer rejected by scaler".into()))?;
    let resized = imageops::resize(&img, dst_w, dst_h, FilterType::Lanczos3);
    Ok(resized.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_when_geometry_matches() {
        let rgb = vec![7u8; 4 * 4 * 3];
        let out = scale_rgb24(rgb.clone(), 4, 4, 4, 4).unwrap();
        assert_eq!(out, rgb);
    }

    #[test]
    fn output_length_matches_target() {
        let rgb = vec![0u8; 8 * 8 * 3];
        let out = scale_rgb24(rgb, 8, 8, 720, 486).unwrap();
        assert_eq!(out.len(), 720 * 486 * 3);
    }

    #[test]
    fn solid_color_survives_resampling() {
        let rgb = vec![100u8; 16 * 16 * 3];
        let out = scale_rgb24(rgb, 16, 16, 32, 32).unwrap();
        for &b in &out {
            assert!((b as i16 - 100).abs() <= 1, "got {}", b);
        }
    }

    #[test]
    fn geometry_mismatch_is_internal_error() {
        let err = scale_rgb24(vec![0u8; 10], 4, 4, 8, 8).unwrap_err();
        assert_eq!(err.code(), 500);
    }
}
