//! Translation between the device's key numbering and the logical layout.
//!
//! The hardware scans each row right-to-left:
//!
//! ```text
//! [  5,  4,  3,  2,  1 ]
//! [ 10,  9,  8,  7,  6 ]
//! [ 15, 14, 13, 12, 11 ]
//! ```
//!
//! Callers see left-to-right, top-to-bottom numbering instead:
//!
//! ```text
//! [  1,  2,  3,  4,  5 ]
//! [  6,  7,  8,  9, 10 ]
//! [ 11, 12, 13, 14, 15 ]
//! ```

use crate::{Error, Result, BUTTON_COUNT};

/// Logical button number for each raw key (index 0 is raw key 1).
const RAW_TO_BUTTON: [u8; BUTTON_COUNT] = [5, 4, 3, 2, 1, 10, 9, 8, 7, 6, 15, 14, 13, 12, 11];

/// Raw key number for each logical button (index 0 is button 1).
const BUTTON_TO_RAW: [u8; BUTTON_COUNT] = [5, 4, 3, 2, 1, 10, 9, 8, 7, 6, 15, 14, 13, 12, 11];

fn lookup(table: &[u8; BUTTON_COUNT], index: u8) -> Result<u8> {
    (index as usize)
        .checked_sub(1)
        .and_then(|i| table.get(i))
        .copied()
        .ok_or(Error::InvalidIndex(index))
}

/// Converts a raw (hardware scan order) key number to a logical button.
pub fn raw_to_button(raw: u8) -> Result<u8> {
    lookup(&RAW_TO_BUTTON, raw)
}

/// Converts a logical button number to the raw key number.
pub fn button_to_raw(button: u8) -> Result<u8> {
    lookup(&BUTTON_TO_RAW, button)
}

/// Validates a logical button number.
pub fn check_button(button: u8) -> Result<u8> {
    if (1..=BUTTON_COUNT as u8).contains(&button) {
        Ok(button)
    } else {
        Err(Error::InvalidIndex(button))
    }
}
