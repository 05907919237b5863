//! Stream Deck Hardware Library
//!
//! Drives the original 15-key Elgato Stream Deck over USB HID: encodes key
//! images into the device's two-page report format, sends reset and
//! brightness commands, and turns key state reports into press/release events.

pub mod buttons;
pub mod cursor;
pub mod device;
pub mod error;
pub mod icon;
pub mod input;
pub mod page;
pub mod protocol;
pub mod registry;

pub use buttons::{button_to_raw, raw_to_button};
pub use device::{StreamDeck, Transport};
pub use error::{Error, Result};
pub use input::{
    ButtonEvent, ButtonReport, ButtonStates, EventKind, ListenerOptions, SubscriptionId, Throttle,
};
pub use page::{EncodedPage, PageEncoder, PixelFormat};
pub use registry::{list_devices, DeckInfo, DeviceRegistry};

/// Key icon side length in pixels.
pub const ICON_SIZE: usize = 72;

/// Number of keys (5 columns x 3 rows).
pub const BUTTON_COUNT: usize = 15;

/// USB VID:PID for the Stream Deck
pub const VENDOR_ID: u16 = 0x0FD9;
pub const PRODUCT_ID: u16 = 0x0060;

/// Re-exported so callers can open devices without depending on hidapi.
pub use hidapi::HidApi;
