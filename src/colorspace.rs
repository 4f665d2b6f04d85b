//! RGB24 to broadcast colorspace conversion.
//!
//! BT.601 coefficients throughout, which is what standard-definition
//! equipment expects. Quantization is round-half-to-even with clamping
//! to [0, 255].

use crate::error::{Result, VtsError};
use crate::formats::ColorSpace;

/// Per-pixel BT.601 transform, unquantized.
#[inline]
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.169 * r - 0.331 * g + 0.500 * b + 128.0;
    let v = 0.500 * r - 0.419 * g - 0.081 * b + 128.0;
    (y, u, v)
}

#[inline]
fn quant(x: f32) -> u8 {
    x.round_ties_even().clamp(0.0, 255.0) as u8
}

fn check_geometry(rgb: &[u8], width: usize, height: usize) -> Result<()> {
    let expected = width * height * 3;
    if rgb.len() != expected {
        return Err(VtsError::Internal(format!(
            "RGB buffer is {} bytes, expected {} for {}x{}",
            rgb.len(),
            expected,
            width,
            height
        )));
    }
    Ok(())
}

/// Duplicate the right-most column, returning a (width+1)-wide buffer.
fn pad_right_column(rgb: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity((width + 1) * height * 3);
    for row in rgb.chunks_exact(width * 3) {
        out.extend_from_slice(row);
        out.extend_from_slice(&row[(width - 1) * 3..]);
    }
    out
}

/// Convert an RGB24 buffer to the requested colorspace.
///
/// RGB24 is the identity and hands the input back untouched.
pub fn convert(rgb: Vec<u8>, width: usize, height: usize, cs: ColorSpace) -> Result<Vec<u8>> {
    match cs {
        ColorSpace::RGB24 => {
            check_geometry(&rgb, width, height)?;
            Ok(rgb)
        }
        ColorSpace::YUV422 => rgb24_to_uyvy(&rgb, width, height),
        ColorSpace::YUV420P => rgb24_to_yuv420p(&rgb, width, height),
    }
}

/// Pack RGB24 into 4:2:2 UYVY: `U0 Y0 V0 Y1` per pixel pair.
///
/// Chroma for a pair is the mean of the pair's chroma samples. An odd
/// width gets its right-most pixel duplicated first.
pub fn rgb24_to_uyvy(rgb: &[u8], width: usize, height: usize) -> Result<Vec<u8>> {
    check_geometry(rgb, width, height)?;
    if width % 2 != 0 {
        let padded = pad_right_column(rgb, width, height);
        return rgb24_to_uyvy(&padded, width + 1, height);
    }

    let mut out = Vec::with_capacity(width * height * 2);
    for row in rgb.chunks_exact(width * 3) {
        for pair in row.chunks_exact(6) {
            let (y0, u0, v0) = rgb_to_yuv(pair[0], pair[1], pair[2]);
            let (y1, u1, v1) = rgb_to_yuv(pair[3], pair[4], pair[5]);
            out.push(quant((u0 + u1) / 2.0));
            out.push(quant(y0));
            out.push(quant((v0 + v1) / 2.0));
            out.push(quant(y1));
        }
    }
    Ok(out)
}

/// Convert RGB24 to planar 4:2:0: full-resolution Y plane followed by
/// half-resolution U then V planes.
///
/// Chroma for each 2x2 block is the mean over its four pixels. Odd
/// dimensions get the right-most column / bottom row duplicated first.
pub fn rgb24_to_yuv420p(rgb: &[u8], width: usize, height: usize) -> Result<Vec<u8>> {
    check_geometry(rgb, width, height)?;
    if width % 2 != 0 {
        let padded = pad_right_column(rgb, width, height);
        return rgb24_to_yuv420p(&padded, width + 1, height);
    }
    if height % 2 != 0 {
        let mut padded = rgb.to_vec();
        padded.extend_from_slice(&rgb[(height - 1) * width * 3..]);
        return rgb24_to_yuv420p(&padded, width, height + 1);
    }

    let chroma_w = width / 2;
    let chroma_h = height / 2;
    let mut out = vec![0u8; width * height + chroma_w * chroma_h * 2];
    let (y_plane, uv) = out.split_at_mut(width * height);
    let (u_plane, v_plane) = uv.split_at_mut(chroma_w * chroma_h);

    let mut u_acc = vec![0f32; chroma_w * chroma_h];
    let mut v_acc = vec![0f32; chroma_w * chroma_h];

    for (row_idx, row) in rgb.chunks_exact(width * 3).enumerate() {
        for (col_idx, px) in row.chunks_exact(3).enumerate() {
            let (y, u, v) = rgb_to_yuv(px[0], px[1], px[2]);
            y_plane[row_idx * width + col_idx] = quant(y);
            let ci = (row_idx / 2) * chroma_w + col_idx / 2;
            u_acc[ci] += u;
            v_acc[ci] += v;
        }
    }

    for (dst, acc) in u_plane.iter_mut().zip(&u_acc) {
        *dst = quant(acc / 4.0);
    }
    for (dst, acc) in v_plane.iter_mut().zip(&v_acc) {
        *dst = quant(acc / 4.0);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(r: u8, g: u8, b: u8, width: usize, height: usize) -> Vec<u8> {
        let mut v = Vec::with_capacity(width * height * 3);
        for _ in 0..width * height {
            v.extend_from_slice(&[r, g, b]);
        }
        v
    }

    #[test]
    fn black_is_neutral_chroma() {
        let uyvy = rgb24_to_uyvy(&solid(0, 0, 0, 4, 2), 4, 2).unwrap();
        assert_eq!(uyvy.len(), 4 * 2 * 2);
        for group in uyvy.chunks_exact(4) {
            assert_eq!(group, [128, 0, 128, 0]);
        }
    }

    #[test]
    fn white_is_full_luma() {
        let uyvy = rgb24_to_uyvy(&solid(255, 255, 255, 2, 2), 2, 2).unwrap();
        for group in uyvy.chunks_exact(4) {
            assert_eq!(group[1], 255);
            assert_eq!(group[3], 255);
            assert_eq!(group[0], 128);
            assert_eq!(group[2], 128);
        }
    }

    #[test]
    fn uyvy_byte_order_and_pair_chroma() {
        // One red pixel next to one blue pixel. Expected values computed
        // from the BT.601 coefficients by hand.
        let rgb = vec![255, 0, 0, 0, 0, 255];
        let uyvy = rgb24_to_uyvy(&rgb, 2, 1).unwrap();
        // red:  Y 76.245,  U 84.905,  V 255.5
        // blue: Y 29.07,   U 255.5,   V 107.345
        assert_eq!(uyvy, vec![170, 76, 181, 29]);
    }

    #[test]
    fn saturated_red_clamps_v() {
        // V of pure red is 255.5; round-half-even gives 256, clamped to 255.
        let uyvy = rgb24_to_uyvy(&solid(255, 0, 0, 2, 1), 2, 1).unwrap();
        assert_eq!(uyvy[2], 255);
    }

    #[test]
    fn round_half_to_even() {
        assert_eq!(quant(126.5), 126);
        assert_eq!(quant(127.5), 128);
        assert_eq!(quant(128.5), 128);
        assert_eq!(quant(-3.0), 0);
        assert_eq!(quant(300.0), 255);
    }

    #[test]
    fn odd_width_duplicates_last_pixel() {
        // 3 wide becomes 4 wide; the final pair is the last pixel twice,
        // so its chroma is unaveraged.
        let rgb = vec![0, 0, 0, 0, 0, 0, 255, 0, 0];
        let uyvy = rgb24_to_uyvy(&rgb, 3, 1).unwrap();
        assert_eq!(uyvy.len(), 8);
        assert_eq!(&uyvy[4..], [85, 76, 255, 76]);
    }

    #[test]
    fn yuv420p_plane_layout() {
        let out = rgb24_to_yuv420p(&solid(0, 0, 0, 4, 4), 4, 4).unwrap();
        assert_eq!(out.len(), 16 + 4 + 4);
        assert!(out[..16].iter().all(|&b| b == 0));
        assert!(out[16..].iter().all(|&b| b == 128));
    }

    #[test]
    fn yuv420p_block_mean() {
        // 2x2 block of two reds over two blues: chroma is the 4-pixel mean.
        let mut rgb = Vec::new();
        rgb.extend_from_slice(&[255, 0, 0, 255, 0, 0]);
        rgb.extend_from_slice(&[0, 0, 255, 0, 0, 255]);
        let out = rgb24_to_yuv420p(&rgb, 2, 2).unwrap();
        assert_eq!(out.len(), 6);
        assert_eq!(out[0], 76);
        assert_eq!(out[2], 29);
        // U mean (84.905 + 255.5) / 2 = 170.2025, V mean (255.5 + 107.345) / 2
        assert_eq!(out[4], 170);
        assert_eq!(out[5], 181);
    }

    #[test]
    fn odd_height_duplicates_bottom_row() {
        let out = rgb24_to_yuv420p(&solid(10, 20, 30, 2, 3), 2, 3).unwrap();
        // Padded to 2x4: Y plane 8, chroma planes 2 each.
        assert_eq!(out.len(), 8 + 2 + 2);
    }

    #[test]
    fn geometry_mismatch_is_internal_error() {
        let err = rgb24_to_uyvy(&[0u8; 10], 4, 2).unwrap_err();
        assert_eq!(err.code(), 500);
    }

    #[test]
    fn ntsc_payload_sizes() {
        let rgb = solid(1, 2, 3, 720, 486);
        assert_eq!(rgb24_to_uyvy(&rgb, 720, 486).unwrap().len(), 699_840);
        assert_eq!(rgb24_to_yuv420p(&rgb, 720, 486).unwrap().len(), 524_880);
    }

    #[test]
    fn identity_passthrough() {
        let rgb = solid(9, 8, 7, 2, 2);
        let out = convert(rgb.clone(), 2, 2, ColorSpace::RGB24).unwrap();
        assert_eq!(out, rgb);
    }
}
