//! Raw volume access
//!
//! The engine reads sectors through the [`BlockDevice`] trait and never
//! manages the underlying handle itself: the caller opens the volume (or
//! image file), hands it to [`crate::scan`], and closes it by dropping it.
//! Raw volume reads must be issued in whole sectors at sector-aligned
//! offsets; the engine only ever asks for sector multiples.

use crate::error::{MftScanError, Result};
use std::io::{Read, Seek, SeekFrom};

/// Source of raw volume bytes.
///
/// A short read is an error, never a partial success: every structure the
/// engine decodes is useless when truncated.
pub trait BlockDevice {
    /// Fill `buf` from the absolute byte offset `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

/// Any seekable reader works as a device: an opened raw volume, a disk
/// image `File`, or an in-memory `Cursor` in tests.
impl<T: Read + Seek> BlockDevice for T {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(MftScanError::ShortRead {
                    offset,
                    got: filled,
                    expected: buf.len(),
                });
            }
            filled += n;
        }
        Ok(())
    }
}
