//! Stream Deck (original, 15-key) protocol definitions.
//!
//! Protocol structure:
//! - Key images: two 7819-byte output reports per key ("pages")
//! - Page 1: 70-byte header (including a 72x72 24-bit BMP header) + 7749 pixel bytes
//! - Page 2: 16-byte header + 7803 pixel bytes
//! - Byte 5 of both headers carries the raw key number
//! - Reset and brightness: 17-byte feature reports
//! - Input report 0x01: one byte per raw key, 1 = pressed

use crate::{Error, Result};

/// Length of every image output report.
pub const REPORT_LENGTH: usize = 7819;

/// Offset of the raw key number in both page headers.
pub const KEY_INDEX_OFFSET: usize = 5;

/// Pixel bytes carried by page 1 (2583 BGR pixels).
pub const PAGE_1_PIXEL_BYTES: usize = 2583 * 3;

/// Page 1 header: report 0x02, command 0x01, page 1, followed by a BMP header.
pub const PAGE_1_HEADER: [u8; 70] = [
    0x02, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x42, 0x4D, 0xF6, 0x3C, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x36, 0x00, 0x00, 0x00, 0x28, 0x00,
    0x00, 0x00, 0x48, 0x00, 0x00, 0x00, 0x48, 0x00, 0x00, 0x00, 0x01, 0x00, 0x18, 0x00, 0x00, 0x00,
    0x00, 0x00, 0xC0, 0x3C, 0x00, 0x00, 0xC4, 0x0E, 0x00, 0x00, 0xC4, 0x0E, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Page 2 header: report 0x02, command 0x01, page 2, last-page flag.
pub const PAGE_2_HEADER: [u8; 16] = [
    0x02, 0x01, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Length of the reset and brightness feature reports.
pub const FEATURE_REPORT_LENGTH: usize = 17;

/// Reset feature report: clears all keys and shows the logo.
pub const RESET_REPORT: [u8; FEATURE_REPORT_LENGTH] = [
    0x0B, 0x63, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00,
];

/// Brightness feature report prefix; the level goes at [`BRIGHTNESS_OFFSET`].
pub const BRIGHTNESS_REPORT: [u8; FEATURE_REPORT_LENGTH] = [
    0x05, 0x55, 0xAA, 0xD1, 0x01, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00,
];

/// Offset of the brightness level in [`BRIGHTNESS_REPORT`].
pub const BRIGHTNESS_OFFSET: usize = 5;

/// Maximum brightness level.
pub const MAX_BRIGHTNESS: u8 = 100;

/// Report ID of inbound key state reports.
pub const BUTTON_STATE_REPORT_ID: u8 = 0x01;

/// Size of the buffer used to read one inbound report.
pub const INPUT_REPORT_LENGTH: usize = 17;

/// Builds the reset feature report.
pub fn build_reset_report() -> [u8; FEATURE_REPORT_LENGTH] {
    RESET_REPORT
}

/// Builds a brightness feature report.
///
/// Levels of 7 and below turn the backlight off; 90 and above is full brightness.
pub fn build_brightness_report(brightness: u8) -> Result<[u8; FEATURE_REPORT_LENGTH]> {
    if brightness > MAX_BRIGHTNESS {
        return Err(Error::InvalidBrightness(brightness));
    }
    let mut report = BRIGHTNESS_REPORT;
    report[BRIGHTNESS_OFFSET] = brightness;
    Ok(report)
}
