//! Sequential byte cursors over fixed-size buffers.
//!
//! Every access past the end of the buffer is reported as
//! [`Error::OutOfRange`]; nothing is truncated or wrapped.

use crate::{Error, Result};

/// Read cursor over a borrowed byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader positioned at the start of `buffer`.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Reads one byte and advances.
    pub fn read_byte(&mut self) -> Result<u8> {
        let byte = *self.buffer.get(self.position).ok_or(Error::OutOfRange {
            offset: self.position,
            len: self.buffer.len(),
        })?;
        self.position += 1;
        Ok(byte)
    }

    /// Skips `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        let len = self.buffer.len();
        let end = self
            .position
            .checked_add(count)
            .filter(|&end| end <= len)
            .ok_or(Error::OutOfRange {
                offset: self.position.saturating_add(count),
                len,
            })?;
        self.position = end;
        Ok(())
    }

    /// Returns true while unread bytes remain.
    pub fn has_remaining(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Write cursor over an owned, zero-filled buffer of fixed capacity.
#[derive(Debug, Clone)]
pub struct ByteWriter {
    buffer: Vec<u8>,
    position: usize,
}

impl ByteWriter {
    /// Allocates a zero-filled writer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            position: 0,
        }
    }

    /// Writes one byte at the cursor and advances.
    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        let len = self.buffer.len();
        let slot = self
            .buffer
            .get_mut(self.position)
            .ok_or(Error::OutOfRange {
                offset: self.position,
                len,
            })?;
        *slot = byte;
        self.position += 1;
        Ok(())
    }

    /// Writes a run of bytes at the cursor and advances.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let len = self.buffer.len();
        let end = self
            .position
            .checked_add(bytes.len())
            .filter(|&end| end <= len)
            .ok_or(Error::OutOfRange {
                offset: self.position.saturating_add(bytes.len()),
                len,
            })?;
        self.buffer[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    /// Returns a read-only view of `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> Result<&[u8]> {
        self.buffer.get(start..end).ok_or(Error::OutOfRange {
            offset: end.max(start),
            len: self.buffer.len(),
        })
    }

    /// Copies `source_start..source_end` into `target` at `target_offset`.
    ///
    /// Returns the number of bytes copied.
    pub fn copy_into(
        &self,
        target: &mut [u8],
        target_offset: usize,
        source_start: usize,
        source_end: usize,
    ) -> Result<usize> {
        let source = self.slice(source_start, source_end)?;
        let target_len = target.len();
        let dest = target_offset
            .checked_add(source.len())
            .and_then(|target_end| target.get_mut(target_offset..target_end))
            .ok_or(Error::OutOfRange {
                offset: target_offset.saturating_add(source.len()),
                len: target_len,
            })?;
        dest.copy_from_slice(source);
        Ok(source.len())
    }

    /// Moves the cursor so the buffer can be rewritten without reallocating.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.buffer.len() {
            return Err(Error::OutOfRange {
                offset: position,
                len: self.buffer.len(),
            });
        }
        self.position = position;
        Ok(())
    }

    /// Current write position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the whole underlying buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Capacity of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true for a zero-capacity writer.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
