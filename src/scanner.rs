//! Scan orchestration
//!
//! Ties the pieces together: boot sector to geometry, record 0 to the
//! MFT's own fragment map, the usage bitmap, and then a lazy pass over
//! every in-use record. Initialization failures are fatal; failures
//! inside a single record during the pass only skip that record.

use crate::device::BlockDevice;
use crate::error::{MftScanError, Result};
use crate::ntfs::bitmap::UsageBitmap;
use crate::ntfs::mft::{self, Node, RecordParser};
use crate::ntfs::reader::{ChunkedMftReader, DEFAULT_CHUNK_SIZE};
use crate::ntfs::runs::find_stream;
use crate::ntfs::structs::{AttributeType, VolumeGeometry};
use log::{debug, warn};

// ============================================================================
// Scan options
// ============================================================================

/// What to decode for each node beyond the basics.
/// Timestamps and fragments cost memory per node; leave them off unless
/// they are actually consumed.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Capture creation/modification/access FILETIMEs from
    /// STANDARD_INFORMATION
    pub include_timestamps: bool,
    /// Collect each node's streams with decoded fragment lists
    pub include_fragments: bool,
    /// Size of the reusable MFT chunk buffer
    pub chunk_size: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include_timestamps: false,
            include_fragments: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Start a scan of an NTFS volume.
///
/// Reads the boot sector, the MFT's own record and the usage bitmap, then
/// returns the lazy node sequence. The caller keeps ownership of the
/// device lifecycle; dropping the returned scan at any point is the way
/// to cancel it.
pub fn scan<D: BlockDevice>(mut device: D, options: ScanOptions) -> Result<MftScan<D>> {
    let mut boot = [0u8; 512];
    device.read_at(0, &mut boot)?;
    let geometry = VolumeGeometry::parse(&boot)?;

    debug!(
        "ntfs geometry: {} B/sector, {} sectors/cluster, {} B/record, mft at lcn {}",
        geometry.bytes_per_sector,
        geometry.sectors_per_cluster,
        geometry.bytes_per_mft_record(),
        geometry.mft_start_lcn
    );

    // Record 0 describes the MFT itself; without it nothing else can be
    // located, so every failure here ends the scan before it starts.
    let parser = RecordParser::new(options.include_timestamps, options.include_fragments);

    let mut record0 = vec![0u8; geometry.bytes_per_mft_record() as usize];
    device.read_at(geometry.mft_byte_offset(), &mut record0)?;
    if !mft::apply_fixup(&mut record0, geometry.bytes_per_sector, 0)? {
        return Err(MftScanError::CorruptMft(
            0,
            "MFT record 0 is not a FILE record".to_string(),
        ));
    }
    let mft_node = parser.parse_record(0, &record0, true)?.ok_or_else(|| {
        MftScanError::CorruptMft(0, "MFT record 0 cannot be interpreted".to_string())
    })?;

    let bitmap = UsageBitmap::read(&mut device, &geometry, &mft_node.streams)?;
    debug!(
        "mft bitmap: {} bytes, {} records in use",
        bitmap.as_bytes().len(),
        bitmap.in_use_count()
    );

    let data_stream = find_stream(&mft_node.streams, AttributeType::Data, None)
        .ok_or(MftScanError::MissingStream("$MFT data"))?;

    // The scan range is bounded by whichever is shorter: what the bitmap
    // can describe or what the data stream declares.
    let max_index = bitmap
        .max_index()
        .min(data_stream.size / geometry.bytes_per_mft_record());

    let reader = ChunkedMftReader::new(&geometry, data_stream, options.chunk_size);

    Ok(MftScan {
        device,
        geometry,
        parser,
        bitmap,
        reader,
        next_index: 1,
        max_index,
        skipped_records: 0,
        fatal_error: None,
        done: false,
    })
}

// ============================================================================
// The lazy node sequence
// ============================================================================

/// A single-pass scan over all in-use MFT records, yielding nodes in
/// ascending index order.
///
/// All cursor state lives here: the chunk buffer (inside the reader), the
/// fragment walk position and the bitmap. The sequence is not
/// restartable; scanning again means calling [`scan`] again.
#[derive(Debug)]
pub struct MftScan<D: BlockDevice> {
    device: D,
    geometry: VolumeGeometry,
    parser: RecordParser,
    bitmap: UsageBitmap,
    reader: ChunkedMftReader,
    next_index: u64,
    max_index: u64,
    skipped_records: u64,
    fatal_error: Option<MftScanError>,
    done: bool,
}

impl<D: BlockDevice> MftScan<D> {
    /// The volume geometry decoded during initialization
    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// The raw usage bitmap, fully read before the first node is yielded.
    /// Useful for total-usage statistics ahead of the full pass.
    pub fn volume_bitmap(&self) -> &[u8] {
        self.bitmap.as_bytes()
    }

    /// Records marked in use by the bitmap
    pub fn in_use_count(&self) -> u64 {
        self.bitmap.in_use_count()
    }

    /// In-use records visited so far that produced no node: corrupt
    /// records, unsupported references, extension records, nameless
    /// entries. Callers wanting to tell a clean volume from a battered
    /// one can watch this instead of a diagnostic callback.
    pub fn skipped_records(&self) -> u64 {
        self.skipped_records
    }

    /// The error that ended the sequence early, if any. Device failures
    /// are never retried: the sequence ends and the cause lands here.
    pub fn fatal_error(&self) -> Option<&MftScanError> {
        self.fatal_error.as_ref()
    }
}

impl<D: BlockDevice> Iterator for MftScan<D> {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        if self.done {
            return None;
        }

        while self.next_index < self.max_index {
            let index = self.next_index;
            self.next_index += 1;

            if !self.bitmap.is_in_use(index) {
                continue;
            }

            let record = match self.reader.record(&mut self.device, index) {
                Ok(Some(slice)) => slice,
                Ok(None) => {
                    // The stream ran out of fragments before the bitmap
                    // ran out of bits; there is nothing left to read.
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    warn!("mft read failed at record {}: {}", index, e);
                    self.fatal_error = Some(e);
                    self.done = true;
                    return None;
                }
            };

            // Fix up in place within the chunk buffer; each record is
            // visited at most once.
            match mft::apply_fixup(record, self.geometry.bytes_per_sector, index) {
                Ok(true) => {}
                Ok(false) => {
                    // Bitmap said in use, slot says otherwise; nothing to
                    // report for it.
                    self.skipped_records += 1;
                    continue;
                }
                Err(e) => {
                    debug!("skipping record {}: {}", index, e);
                    self.skipped_records += 1;
                    continue;
                }
            }

            match self.parser.parse_record(index as u32, record, false) {
                Ok(Some(node)) if !node.name.is_empty() => return Some(node),
                Ok(_) => {
                    // Valid but unreportable: extension record, freed
                    // since the bitmap was read, or no long name.
                    self.skipped_records += 1;
                }
                Err(e) if e.is_recoverable() => {
                    debug!("skipping record {}: {}", index, e);
                    self.skipped_records += 1;
                }
                Err(e) => {
                    warn!("scan aborted at record {}: {}", index, e);
                    self.fatal_error = Some(e);
                    self.done = true;
                    return None;
                }
            }
        }

        self.done = true;
        None
    }
}
