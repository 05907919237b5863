//! Error types for the Stream Deck hardware library.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when encoding for or talking to the device.
#[derive(Error, Debug)]
pub enum Error {
    /// No Stream Deck found or it could not be opened.
    #[error("Stream Deck not found (VID:PID 0FD9:0060)")]
    DeviceNotFound,

    /// USB HID communication error.
    #[error("USB HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// Pixel buffer length does not match the icon resolution.
    #[error(
        "image buffer must be a 72x72 image, expected buffer length: {expected}, got: {actual}"
    )]
    Format { expected: usize, actual: usize },

    /// Button index outside 1-15.
    #[error("Invalid button index (must be 1-15): {0}")]
    InvalidIndex(u8),

    /// Read or write past the end of a fixed-size buffer.
    #[error("Buffer access out of range: offset {offset}, length {len}")]
    OutOfRange { offset: usize, len: usize },

    /// Brightness above 100.
    #[error("Invalid brightness (must be 0-100): {0}")]
    InvalidBrightness(u8),

    /// Button state report too short to hold every key.
    #[error("Button report too short: expected at least {expected} bytes, got {actual}")]
    ReportTooShort { expected: usize, actual: usize },

    /// Image decoding error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}
