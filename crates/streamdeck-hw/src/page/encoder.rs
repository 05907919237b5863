//! BGR page encoding for key images.

use std::sync::Arc;
use tracing::debug;

use super::cache::{content_hash, PageCache};
use crate::buttons::button_to_raw;
use crate::cursor::{ByteReader, ByteWriter};
use crate::protocol::{
    KEY_INDEX_OFFSET, PAGE_1_HEADER, PAGE_1_PIXEL_BYTES, PAGE_2_HEADER, REPORT_LENGTH,
};
use crate::{Error, Result, ICON_SIZE};

/// Bytes in one row of the encoded BGR image.
const ROW_BYTES: usize = ICON_SIZE * 3;

/// Total encoded BGR bytes for one key.
const BGR_BYTES: usize = ICON_SIZE * ICON_SIZE * 3;

/// Layout of a source pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 3 bytes per pixel.
    Rgb,
    /// 4 bytes per pixel; alpha is discarded.
    #[default]
    Rgba,
}

impl PixelFormat {
    /// Picks the format from an alpha flag.
    pub fn from_alpha(has_alpha: bool) -> Self {
        if has_alpha {
            PixelFormat::Rgba
        } else {
            PixelFormat::Rgb
        }
    }

    /// Bytes per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }

    /// Required buffer length for a full icon.
    pub fn expected_len(&self) -> usize {
        ICON_SIZE * ICON_SIZE * self.bytes_per_pixel()
    }

    /// Checks a buffer length against this format.
    pub fn validate(&self, len: usize) -> Result<()> {
        let expected = self.expected_len();
        if len != expected {
            return Err(Error::Format {
                expected,
                actual: len,
            });
        }
        Ok(())
    }
}

/// The two output reports that draw one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPage {
    page1: Vec<u8>,
    page2: Vec<u8>,
}

impl EncodedPage {
    #[cfg(test)]
    pub(crate) fn blank() -> Self {
        Self {
            page1: vec![0; REPORT_LENGTH],
            page2: vec![0; REPORT_LENGTH],
        }
    }

    /// First report (BMP header and the first 2583 pixels).
    pub fn page1(&self) -> &[u8] {
        &self.page1
    }

    /// Second report (remaining pixels).
    pub fn page2(&self) -> &[u8] {
        &self.page2
    }

    /// Raw key number both reports are addressed to.
    pub fn raw_key(&self) -> u8 {
        self.page1[KEY_INDEX_OFFSET]
    }

    /// Pixel payload of page 1 (everything after its header).
    pub fn page1_pixels(&self) -> &[u8] {
        &self.page1[PAGE_1_HEADER.len()..]
    }

    /// Pixel payload of page 2 (everything after its header).
    pub fn page2_pixels(&self) -> &[u8] {
        &self.page2[PAGE_2_HEADER.len()..]
    }

    /// Returns a copy addressed to `raw_key`.
    fn addressed_to(&self, raw_key: u8) -> Self {
        let mut page = self.clone();
        page.page1[KEY_INDEX_OFFSET] = raw_key;
        page.page2[KEY_INDEX_OFFSET] = raw_key;
        page
    }
}

/// Encodes pixel buffers into key reports, reusing work for repeated images.
#[derive(Debug)]
pub struct PageEncoder {
    /// Scratch BGR buffer, rewritten on every cache miss.
    bgr: ByteWriter,
    cache: PageCache,
}

impl Default for PageEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PageEncoder {
    /// Creates an encoder with the default cache capacity.
    pub fn new() -> Self {
        Self::with_cache(PageCache::default())
    }

    /// Creates an encoder with a cache of the given capacity.
    pub fn with_cache_capacity(capacity: usize) -> Self {
        Self::with_cache(PageCache::new(capacity))
    }

    fn with_cache(cache: PageCache) -> Self {
        Self {
            bgr: ByteWriter::new(BGR_BYTES),
            cache,
        }
    }

    /// Returns the page cache.
    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Encodes `pixels` for logical `button`.
    ///
    /// The returned page is always a fresh copy; cached entries are never
    /// patched in place.
    pub fn encode(
        &mut self,
        pixels: &[u8],
        button: u8,
        format: PixelFormat,
    ) -> Result<EncodedPage> {
        let raw_key = button_to_raw(button)?;
        format.validate(pixels.len())?;

        let key = content_hash(pixels);
        let template = match self.cache.get(key) {
            Some(page) => {
                debug!("Page cache hit {:016x} for button {}", key, button);
                page
            }
            None => {
                debug!("Page cache miss {:016x}, encoding", key);
                let page = Arc::new(self.build_pages(pixels, format)?);
                self.cache.insert(key, page.clone());
                page
            }
        };

        Ok(template.addressed_to(raw_key))
    }

    /// Converts a validated buffer to mirrored BGR rows and splits it into pages.
    fn build_pages(&mut self, pixels: &[u8], format: PixelFormat) -> Result<EncodedPage> {
        let mut reader = ByteReader::new(pixels);
        let mut row = [0u8; ROW_BYTES];
        self.bgr.set_position(0)?;

        while reader.has_remaining() {
            // The panel stores each row mirrored
            for column in (0..ICON_SIZE).rev() {
                let r = reader.read_byte()?;
                let g = reader.read_byte()?;
                let b = reader.read_byte()?;
                if format == PixelFormat::Rgba {
                    reader.skip(1)?;
                }
                let offset = column * 3;
                row[offset..offset + 3].copy_from_slice(&[b, g, r]);
            }
            self.bgr.write_all(&row)?;
        }

        let mut page1 = vec![0u8; REPORT_LENGTH];
        page1[..PAGE_1_HEADER.len()].copy_from_slice(&PAGE_1_HEADER);
        self.bgr
            .copy_into(&mut page1, PAGE_1_HEADER.len(), 0, PAGE_1_PIXEL_BYTES)?;

        let mut page2 = vec![0u8; REPORT_LENGTH];
        page2[..PAGE_2_HEADER.len()].copy_from_slice(&PAGE_2_HEADER);
        self.bgr.copy_into(
            &mut page2,
            PAGE_2_HEADER.len(),
            PAGE_1_PIXEL_BYTES,
            self.bgr.len(),
        )?;

        Ok(EncodedPage { page1, page2 })
    }
}
