//! MFT usage bitmap
//!
//! The MFT's own record carries a BITMAP stream with one bit per record
//! slot. Reading it up front lets the scan skip unused slots without
//! touching the disk, which is most of the win on sparsely filled
//! volumes.

use crate::device::BlockDevice;
use crate::error::{MftScanError, Result};
use crate::ntfs::runs::{find_stream, Stream};
use crate::ntfs::structs::{AttributeType, VolumeGeometry};

/// The set of in-use MFT record indices, decoded from the MFT's BITMAP
/// stream. Bit `i` (little-endian bit order within each byte) is set iff
/// record `i` is in use.
#[derive(Debug, Clone)]
pub struct UsageBitmap {
    data: Vec<u8>,
}

impl UsageBitmap {
    /// Read the bitmap stream of the MFT, given record 0's streams.
    ///
    /// Each real fragment is read in one device call, placed at its
    /// RealVcn byte offset in the destination; virtual fragments leave
    /// zeroes (no record behind them is in use).
    pub fn read<D: BlockDevice>(
        device: &mut D,
        geometry: &VolumeGeometry,
        mft_streams: &[Stream],
    ) -> Result<Self> {
        let bitmap_stream = find_stream(mft_streams, AttributeType::Bitmap, None)
            .ok_or(MftScanError::MissingStream("$MFT bitmap"))?;

        let bytes_per_cluster = geometry.bytes_per_cluster();

        let mut vcn = 0u64;
        let mut total_bytes = 0u64;
        for fragment in &bitmap_stream.fragments {
            if !fragment.is_virtual() {
                total_bytes += (fragment.next_vcn - vcn) * bytes_per_cluster;
            }
            vcn = fragment.next_vcn;
        }

        let mut data = vec![0u8; total_bytes as usize];

        let mut vcn = 0u64;
        let mut real_vcn = 0u64;
        for fragment in &bitmap_stream.fragments {
            if !fragment.is_virtual() {
                let length = ((fragment.next_vcn - vcn) * bytes_per_cluster) as usize;
                let dst = (real_vcn * bytes_per_cluster) as usize;
                device.read_at(
                    fragment.lcn * bytes_per_cluster,
                    &mut data[dst..dst + length],
                )?;
                real_vcn += fragment.next_vcn - vcn;
            }
            vcn = fragment.next_vcn;
        }

        Ok(Self { data })
    }

    /// Wrap raw bitmap bytes
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Is MFT record `index` in use?
    pub fn is_in_use(&self, index: u64) -> bool {
        let byte = (index >> 3) as usize;
        byte < self.data.len() && self.data[byte] & (1 << (index & 7)) != 0
    }

    /// Number of indices the bitmap can describe
    pub fn max_index(&self) -> u64 {
        self.data.len() as u64 * 8
    }

    /// Total records marked in use
    pub fn in_use_count(&self) -> u64 {
        self.data.iter().map(|b| b.count_ones() as u64).sum()
    }

    /// The raw bitmap bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
