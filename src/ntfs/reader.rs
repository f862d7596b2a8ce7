//! Chunked MFT reading
//!
//! The MFT's data stream may be fragmented across the volume. This reader
//! maps record indices to physical offsets through the fragment list and
//! reads whole blocks of consecutive records per device call, clipping
//! each block to the owning fragment so a read never crosses a fragment
//! boundary. It owns the single reusable chunk buffer; indices must be
//! requested in non-decreasing order.

use crate::device::BlockDevice;
use crate::error::Result;
use crate::ntfs::runs::{Fragment, Stream};
use crate::ntfs::structs::VolumeGeometry;
use log::trace;

/// Default chunk size. 64 KiB was the sweet spot on old NT kernels;
/// 256 KiB wins on anything current.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug)]
pub struct ChunkedMftReader {
    bytes_per_record: u64,
    bytes_per_cluster: u64,
    records_per_chunk: u64,
    /// Records the MFT data stream declares
    total_records: u64,
    fragments: Vec<Fragment>,
    buffer: Vec<u8>,
    // Cursor state: the buffered block and the fragment walk position
    block_start: u64,
    block_end: u64,
    vcn: u64,
    real_vcn: u64,
    fragment_index: usize,
}

impl ChunkedMftReader {
    pub fn new(geometry: &VolumeGeometry, mft_data: &Stream, chunk_size: usize) -> Self {
        let bytes_per_record = geometry.bytes_per_mft_record();
        let records_per_chunk = (chunk_size as u64 / bytes_per_record).max(1);

        Self {
            bytes_per_record,
            bytes_per_cluster: geometry.bytes_per_cluster(),
            records_per_chunk,
            total_records: mft_data.size / bytes_per_record,
            fragments: mft_data.fragments.clone(),
            buffer: vec![0u8; (records_per_chunk * bytes_per_record) as usize],
            block_start: 0,
            block_end: 0,
            vcn: 0,
            real_vcn: 0,
            fragment_index: 0,
        }
    }

    /// Records the MFT data stream declares it holds
    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// The raw (not yet fixed-up) buffer slice holding record `index`,
    /// reading its chunk from the device if it is not the buffered one.
    /// `Ok(None)` once the index cannot be resolved to a remaining
    /// fragment: the end of the MFT stream.
    pub fn record<D: BlockDevice>(
        &mut self,
        device: &mut D,
        index: u64,
    ) -> Result<Option<&mut [u8]>> {
        if index >= self.block_end && !self.read_chunk(device, index)? {
            return Ok(None);
        }

        let offset = ((index - self.block_start) * self.bytes_per_record) as usize;
        Ok(Some(
            &mut self.buffer[offset..offset + self.bytes_per_record as usize],
        ))
    }

    /// Read the block of consecutive records containing `index`.
    fn read_chunk<D: BlockDevice>(&mut self, device: &mut D, index: u64) -> Result<bool> {
        if index >= self.total_records {
            return Ok(false);
        }

        // Advance the fragment cursor until a real fragment covers the
        // index. Virtual fragments advance Vcn only: no records hide in
        // logical space with no disk behind it.
        let covering_end = loop {
            let Some(fragment) = self.fragments.get(self.fragment_index) else {
                return Ok(false);
            };

            if !fragment.is_virtual() {
                let span = fragment.next_vcn - self.vcn;
                let end_records =
                    (self.real_vcn + span) * self.bytes_per_cluster / self.bytes_per_record;
                if index < end_records {
                    break end_records;
                }
                self.real_vcn += span;
            }
            self.vcn = fragment.next_vcn;
            self.fragment_index += 1;
        };

        let fragment = self.fragments[self.fragment_index];

        self.block_start = index;
        self.block_end = (index + self.records_per_chunk)
            .min(self.total_records)
            .min(covering_end);

        // Lcn may sit below the accumulated RealVcn; the difference is
        // signed even though the final position is not.
        let position = ((fragment.lcn as i64 - self.real_vcn as i64)
            * self.bytes_per_cluster as i64
            + (self.block_start * self.bytes_per_record) as i64) as u64;
        let length = ((self.block_end - self.block_start) * self.bytes_per_record) as usize;

        trace!(
            "mft chunk: records {}..{} at byte {}",
            self.block_start,
            self.block_end,
            position
        );

        device.read_at(position, &mut self.buffer[..length])?;
        Ok(true)
    }
}
