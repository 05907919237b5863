//! Discovery of connected Stream Decks.

use hidapi::HidApi;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::device::StreamDeck;
use crate::{Error, Result, PRODUCT_ID, VENDOR_ID};

/// A Stream Deck visible on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckInfo {
    /// HID path.
    pub path: String,
    /// Serial number, if the device reports one.
    pub serial_number: Option<String>,
    /// Product string, if the device reports one.
    pub product: Option<String>,
}

/// Lists every Stream Deck known to `api`.
pub fn list_devices(api: &HidApi) -> Vec<DeckInfo> {
    api.device_list()
        .filter(|d| d.vendor_id() == VENDOR_ID && d.product_id() == PRODUCT_ID)
        .map(|d| DeckInfo {
            path: d.path().to_string_lossy().into_owned(),
            serial_number: d.serial_number().map(str::to_string),
            product: d.product_string().map(str::to_string),
        })
        .collect()
}

/// Keeps one open session per connected Stream Deck.
pub struct DeviceRegistry {
    api: HidApi,
    decks: Vec<Arc<StreamDeck>>,
}

impl DeviceRegistry {
    /// Initializes HID access. No devices are opened until [`refresh`](Self::refresh).
    pub fn new() -> Result<Self> {
        Ok(Self {
            api: HidApi::new()?,
            decks: Vec::new(),
        })
    }

    /// Re-enumerates the bus and opens any Stream Deck not already known.
    pub fn refresh(&mut self) -> Result<&[Arc<StreamDeck>]> {
        self.api.refresh_devices()?;

        for info in list_devices(&self.api) {
            if self.decks.iter().any(|d| d.path() == Some(info.path.as_str())) {
                continue;
            }
            match StreamDeck::open_path(&self.api, &info.path) {
                Ok(deck) => {
                    info!("Registered Stream Deck at {}", info.path);
                    self.decks.push(Arc::new(deck));
                }
                Err(e) => warn!("Failed to open Stream Deck at {}: {}", info.path, e),
            }
        }

        debug!("{} Stream Deck(s) registered", self.decks.len());
        Ok(&self.decks)
    }

    /// Sessions opened so far.
    pub fn stream_decks(&self) -> &[Arc<StreamDeck>] {
        &self.decks
    }

    /// Refreshes and returns the first Stream Deck.
    pub fn first(&mut self) -> Result<Arc<StreamDeck>> {
        self.refresh()?
            .first()
            .cloned()
            .ok_or(Error::DeviceNotFound)
    }

    /// Devices currently visible on the bus, opened or not.
    pub fn available(&self) -> Vec<DeckInfo> {
        list_devices(&self.api)
    }
}
