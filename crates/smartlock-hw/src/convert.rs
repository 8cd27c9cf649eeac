//! Raw buffer to RGB conversion for the supported pixel formats.

use image::{ImageFormat, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range
/// coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share
/// the chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width as usize) * (height as usize) * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(expected / 2 * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

/// Replicate an 8-bit grey plane into all three channels.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width as usize) * (height as usize);
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }

    let rgb = grey[..expected].iter().flat_map(|&g| [g, g, g]).collect();
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: grey.len(),
    })
}

/// Decode one Motion-JPEG frame.
pub fn mjpg_to_rgb(jpeg: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.to_rgb8())
}

fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let c = 1.164 * (y as f32 - 16.0);
    let d = cb as f32 - 128.0;
    let e = cr as f32 - 128.0;
    let clamp = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    [
        clamp(c + 1.596 * e),
        clamp(c - 0.392 * d - 0.813 * e),
        clamp(c + 2.017 * d),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_yuyv_black_and_white() {
        // Two pixels: Y=16 (black) and Y=235 (white), neutral chroma.
        let img = yuyv_to_rgb(&[16, 128, 235, 128], 2, 1).unwrap();
        assert_eq!(*img.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(1, 0), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_red_dominant() {
        // Strong Cr pushes red up and green down.
        let img = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        let Rgb([r, g, b]) = *img.get_pixel(0, 0);
        assert!(r > 200 && g < 60 && b < 60, "got {r},{g},{b}");
    }

    #[test]
    fn test_yuyv_short_buffer() {
        let err = yuyv_to_rgb(&[0u8; 10], 4, 2).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 16, actual: 10 }));
    }

    #[test]
    fn test_grey_replicates_channels() {
        let img = grey_to_rgb(&[0, 77, 200, 255], 2, 2).unwrap();
        assert_eq!(*img.get_pixel(1, 0), Rgb([77, 77, 77]));
        assert_eq!(*img.get_pixel(1, 1), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_grey_ignores_trailing_padding() {
        let img = grey_to_rgb(&[9u8; 12], 2, 2).unwrap();
        assert_eq!(img.dimensions(), (2, 2));
    }

    #[test]
    fn test_mjpg_decode() {
        let src = RgbImage::from_pixel(16, 8, Rgb([120, 120, 120]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(src)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();
        let img = mjpg_to_rgb(&jpeg).unwrap();
        assert_eq!(img.dimensions(), (16, 8));
        let Rgb([r, _, _]) = *img.get_pixel(4, 4);
        assert!((r as i32 - 120).abs() <= 3);
    }

    #[test]
    fn test_mjpg_garbage_is_error() {
        assert!(matches!(mjpg_to_rgb(&[0, 1, 2, 3]), Err(FrameError::Decode(_))));
    }
}
