//! Key image encoding.
//!
//! Converts 72x72 RGB/RGBA pixel buffers into the two output reports the
//! device expects for one key, caching the encoded reports by content.

mod cache;
mod encoder;

pub use cache::{content_hash, PageCache, DEFAULT_CACHE_CAPACITY};
pub use encoder::{EncodedPage, PageEncoder, PixelFormat};
