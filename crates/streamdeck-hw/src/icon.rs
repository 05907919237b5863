//! Key icon preparation: file decoding, letterboxing and solid colors.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use std::path::Path;
use tracing::debug;

use crate::{Result, ICON_SIZE};

/// Decodes an image file into a 72x72 RGBA buffer.
pub fn load_icon<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let image = image::open(path.as_ref())?;
    debug!(
        "Decoded {} ({}x{})",
        path.as_ref().display(),
        image.width(),
        image.height()
    );
    Ok(fit_icon(&image).into_raw())
}

/// Scales an image to fit inside the key, centered on a transparent background.
pub fn fit_icon(image: &DynamicImage) -> RgbaImage {
    let size = ICON_SIZE as u32;
    let source = image.to_rgba8();
    if source.width() == size && source.height() == size {
        return source;
    }

    let scale = f64::min(
        size as f64 / source.width().max(1) as f64,
        size as f64 / source.height().max(1) as f64,
    );
    let width = ((source.width() as f64 * scale).round() as u32).clamp(1, size);
    let height = ((source.height() as f64 * scale).round() as u32).clamp(1, size);
    let resized = imageops::resize(&source, width, height, FilterType::Triangle);

    let mut canvas = RgbaImage::new(size, size);
    let x = (size - width) / 2;
    let y = (size - height) / 2;
    imageops::replace(&mut canvas, &resized, x as i64, y as i64);
    canvas
}

/// Splits a 24-bit `0xRRGGBB` value into components.
#[inline]
pub fn rgb_components(color: u32) -> (u8, u8, u8) {
    (
        ((color >> 16) & 0xFF) as u8,
        ((color >> 8) & 0xFF) as u8,
        (color & 0xFF) as u8,
    )
}

/// Builds a 72x72 RGB buffer filled with one color.
pub fn solid_rgb(color: u32) -> Vec<u8> {
    let (r, g, b) = rgb_components(color);
    [r, g, b].repeat(ICON_SIZE * ICON_SIZE)
}

/// Parses a hex color string (`#RRGGBB` or `RRGGBB`) to `0xRRGGBB`.
pub fn parse_hex_color(hex: &str) -> Option<u32> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// Resampling may round channels by a step, so compare loosely.
    fn close_to(actual: &[u8], expected: [u8; 4]) -> bool {
        actual
            .iter()
            .zip(expected.iter())
            .all(|(&a, &e)| a.abs_diff(e) <= 2)
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#FF0000"), Some(0xFF0000));
        assert_eq!(parse_hex_color("00ff00"), Some(0x00FF00));
        assert_eq!(parse_hex_color("#000000"), Some(0));
        assert_eq!(parse_hex_color("#FFF"), None);
        assert_eq!(parse_hex_color("invalid"), None);
    }

    #[test]
    fn test_solid_rgb() {
        let pixels = solid_rgb(0x112233);
        assert_eq!(pixels.len(), ICON_SIZE * ICON_SIZE * 3);
        assert!(pixels.chunks_exact(3).all(|p| p == [0x11, 0x22, 0x33]));
    }

    #[test]
    fn test_fit_icon_letterboxes_wide_image() {
        let wide = RgbaImage::from_pixel(144, 72, Rgba([255, 0, 0, 255]));
        let fitted = fit_icon(&DynamicImage::ImageRgba8(wide));
        assert_eq!(fitted.dimensions(), (72, 72));

        // Scaled to 72x36, centered vertically
        assert_eq!(fitted.get_pixel(36, 0), &Rgba([0, 0, 0, 0]));
        assert!(close_to(&fitted.get_pixel(36, 36).0, [255, 0, 0, 255]));
        assert_eq!(fitted.get_pixel(36, 71), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_fit_icon_upscales_small_image() {
        let small = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 255]));
        let fitted = fit_icon(&DynamicImage::ImageRgba8(small));
        assert!(close_to(&fitted.get_pixel(0, 0).0, [0, 0, 255, 255]));
        assert!(close_to(&fitted.get_pixel(71, 71).0, [0, 0, 255, 255]));
    }

    #[test]
    fn test_load_icon_from_png() {
        let path =
            std::env::temp_dir().join(format!("streamdeck-hw-icon-{}.png", std::process::id()));
        RgbaImage::from_pixel(36, 36, Rgba([0, 255, 0, 255]))
            .save(&path)
            .unwrap();

        let pixels = load_icon(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(pixels.len(), ICON_SIZE * ICON_SIZE * 4);
        assert!(close_to(&pixels[..4], [0, 255, 0, 255]));
    }

    #[test]
    fn test_load_icon_missing_file() {
        assert!(load_icon("/nonexistent/icon.png").is_err());
    }
}
