//! Data run (cluster run) decoding
//!
//! Non-resident attribute contents live in "data runs": a packed byte
//! stream of (length, offset) pairs. Each run's header byte carries two
//! nibbles, the low one giving the byte width of the unsigned run length
//! and the high one the byte width of the signed run offset. A header of
//! 0x00 terminates the list. Offsets are deltas from the previous run's
//! Lcn; a width-0 offset marks a virtual run with no backing clusters.
//!
//! Every read is bounds-checked against the supplied slice. A hostile or
//! damaged run list must fail with [`MftScanError::CorruptData`] instead
//! of reading out of bounds; this is the corruption guard the rest of the
//! engine relies on.

use crate::device::BlockDevice;
use crate::error::{MftScanError, Result};
use crate::ntfs::structs::{AttributeType, VolumeGeometry, LCN_VIRTUAL};

// ============================================================================
// Fragments and Streams
// ============================================================================

/// One contiguous cluster run of a stream.
///
/// `lcn` is the physical cluster the run starts at, or [`LCN_VIRTUAL`] for
/// sparse/compressed filler with no disk backing. `next_vcn` is the
/// exclusive end virtual cluster number; runs are stored in ascending Vcn
/// order and never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub lcn: u64,
    pub next_vcn: u64,
}

impl Fragment {
    pub fn is_virtual(&self) -> bool {
        self.lcn == LCN_VIRTUAL
    }
}

/// A named, typed data stream of one file record: the default unnamed
/// DATA stream, the MFT's BITMAP stream, or an alternate stream.
#[derive(Debug, Clone)]
pub struct Stream {
    pub name: Option<String>,
    pub stream_type: AttributeType,
    /// Total bytes in the stream
    pub size: u64,
    /// Total clusters allocated by real (non-virtual) runs
    pub clusters: u64,
    pub fragments: Vec<Fragment>,
}

impl Stream {
    pub fn new(name: Option<String>, stream_type: AttributeType, size: u64) -> Self {
        Self {
            name,
            stream_type,
            size,
            clusters: 0,
            fragments: Vec::new(),
        }
    }
}

/// Find a stream by type, and optionally by name. The number of streams
/// per record is small, so O(n) is fine.
pub fn find_stream<'a>(
    streams: &'a [Stream],
    stream_type: AttributeType,
    name: Option<&str>,
) -> Option<&'a Stream> {
    streams
        .iter()
        .find(|s| s.stream_type == stream_type && s.name.as_deref() == name)
}

// ============================================================================
// Run list decoding
// ============================================================================

fn corrupt(message: &str) -> MftScanError {
    MftScanError::CorruptData(message.to_string())
}

/// Read an unsigned little-endian integer of `width` bytes at the cursor.
/// A width of zero yields zero without consuming anything.
fn read_run_length(run_data: &[u8], pos: &mut usize, width: usize) -> Result<u64> {
    if width > 8 {
        return Err(corrupt("run length field wider than 8 bytes"));
    }
    let mut value = 0u64;
    for i in 0..width {
        let byte = *run_data
            .get(*pos)
            .ok_or_else(|| corrupt("run list is longer than the buffer"))?;
        value |= (byte as u64) << (i * 8);
        *pos += 1;
    }
    Ok(value)
}

/// Read a signed little-endian integer of `width` bytes at the cursor,
/// sign-extending by replicating the top bit of the most-significant byte.
/// A width of zero yields zero: the marker for a virtual run.
fn read_run_offset(run_data: &[u8], pos: &mut usize, width: usize) -> Result<i64> {
    if width > 8 {
        return Err(corrupt("run offset field wider than 8 bytes"));
    }
    let mut bytes = [0u8; 8];
    for i in 0..width {
        bytes[i] = *run_data
            .get(*pos)
            .ok_or_else(|| corrupt("run list is longer than the buffer"))?;
        *pos += 1;
    }
    if width > 0 && width < 8 && bytes[width - 1] & 0x80 != 0 {
        for byte in bytes.iter_mut().skip(width) {
            *byte = 0xFF;
        }
    }
    Ok(i64::from_le_bytes(bytes))
}

/// Decode a run list into `stream`'s fragment list, accumulating the
/// cluster total over real runs. `starting_vcn` is the attribute header's
/// StartingVcn (nonzero for continuation pieces of a split attribute).
pub fn decode_runs(run_data: &[u8], starting_vcn: u64, stream: &mut Stream) -> Result<()> {
    let mut pos = 0usize;
    let mut lcn = 0i64;
    let mut vcn = starting_vcn as i64;

    loop {
        let header = *run_data
            .get(pos)
            .ok_or_else(|| corrupt("run list is missing its terminator"))?;
        if header == 0 {
            return Ok(());
        }
        pos += 1;

        let length_width = (header & 0x0F) as usize;
        let offset_width = (header >> 4) as usize;

        let run_length = read_run_length(run_data, &mut pos, length_width)?;
        let run_offset = read_run_offset(run_data, &mut pos, offset_width)?;

        lcn += run_offset;
        vcn += run_length as i64;

        // Virtual runs occupy logical space but no clusters on disk
        if run_offset != 0 {
            stream.clusters += run_length;
        }

        stream.fragments.push(Fragment {
            lcn: if run_offset == 0 { LCN_VIRTUAL } else { lcn as u64 },
            next_vcn: vcn as u64,
        });
    }
}

// ============================================================================
// Windowed extent reads
// ============================================================================

/// Read `wanted_length` bytes starting `offset` bytes into the logical
/// stream described by `run_data`, touching only the extents that
/// intersect the window. Used to fetch attribute-list continuation
/// records without materializing the whole stream.
///
/// The requested length is rounded up to a whole sector first: raw volume
/// reads can only be issued in whole sectors. Virtual extents and extents
/// entirely outside the window are skipped, so untouched parts of the
/// returned buffer stay zeroed.
pub fn read_non_resident<D: BlockDevice>(
    device: &mut D,
    geometry: &VolumeGeometry,
    run_data: &[u8],
    offset: u64,
    wanted_length: u64,
) -> Result<Vec<u8>> {
    if run_data.is_empty() {
        return Err(corrupt("empty run list"));
    }
    if wanted_length >= u32::MAX as u64 {
        return Err(corrupt("extent read too large"));
    }

    let bytes_per_sector = geometry.bytes_per_sector as u64;
    let mut wanted = wanted_length;
    if wanted % bytes_per_sector > 0 {
        wanted += bytes_per_sector - (wanted % bytes_per_sector);
    }

    let bytes_per_cluster = geometry.bytes_per_cluster();
    let mut buffer = vec![0u8; wanted as usize];

    let mut pos = 0usize;
    let mut lcn = 0i64;
    let mut vcn = 0i64;

    loop {
        let header = *run_data
            .get(pos)
            .ok_or_else(|| corrupt("run list is missing its terminator"))?;
        if header == 0 {
            break;
        }
        pos += 1;

        let length_width = (header & 0x0F) as usize;
        let offset_width = (header >> 4) as usize;

        let run_length = read_run_length(run_data, &mut pos, length_width)?;
        let run_offset = read_run_offset(run_data, &mut pos, offset_width)?;

        // Virtual or degenerate extents contribute no readable bytes
        if run_offset == 0 || run_length == 0 {
            vcn += run_length as i64;
            continue;
        }

        lcn += run_offset;
        vcn += run_length as i64;

        let mut extent_vcn = (vcn as u64 - run_length) * bytes_per_cluster;
        let mut extent_lcn = lcn as u64 * bytes_per_cluster;
        let mut extent_length = run_length * bytes_per_cluster;

        // Clip the extent to [offset, offset + wanted)
        if offset >= extent_vcn + extent_length {
            continue;
        }
        if offset > extent_vcn {
            extent_lcn += offset - extent_vcn;
            extent_length -= offset - extent_vcn;
            extent_vcn = offset;
        }
        if offset + wanted <= extent_vcn {
            continue;
        }
        if offset + wanted < extent_vcn + extent_length {
            extent_length = offset + wanted - extent_vcn;
        }
        if extent_length == 0 {
            continue;
        }

        let dst = (extent_vcn - offset) as usize;
        device.read_at(
            extent_lcn,
            &mut buffer[dst..dst + extent_length as usize],
        )?;
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntfs::structs::AttributeType;
    use std::io::Cursor;

    fn empty_stream() -> Stream {
        Stream::new(None, AttributeType::Data, 0)
    }

    /// Encode one run the way NTFS lays it out, for round-trip checks
    fn encode_run(out: &mut Vec<u8>, length: u64, offset: Option<i64>) {
        let length_bytes = length.to_le_bytes();
        let length_width = (8 - (length.leading_zeros() / 8) as usize).max(1);

        let (offset_width, offset_bytes) = match offset {
            None => (0usize, [0u8; 8]),
            Some(delta) => {
                // Smallest width that still round-trips the sign
                let mut width = 1;
                while width < 8 {
                    let truncated = (delta << (64 - width * 8)) >> (64 - width * 8);
                    if truncated == delta {
                        break;
                    }
                    width += 1;
                }
                (width, delta.to_le_bytes())
            }
        };

        out.push(((offset_width as u8) << 4) | length_width as u8);
        out.extend_from_slice(&length_bytes[..length_width]);
        out.extend_from_slice(&offset_bytes[..offset_width]);
    }

    #[test]
    fn decodes_contiguous_runs() {
        // 8 clusters at lcn 100, then 4 clusters at lcn 100+20=120
        let mut data = Vec::new();
        encode_run(&mut data, 8, Some(100));
        encode_run(&mut data, 4, Some(20));
        data.push(0);

        let mut stream = empty_stream();
        decode_runs(&data, 0, &mut stream).unwrap();

        assert_eq!(
            stream.fragments,
            vec![
                Fragment { lcn: 100, next_vcn: 8 },
                Fragment { lcn: 120, next_vcn: 12 },
            ]
        );
        assert_eq!(stream.clusters, 12);
    }

    #[test]
    fn negative_offsets_walk_backwards() {
        let mut data = Vec::new();
        encode_run(&mut data, 2, Some(1000));
        encode_run(&mut data, 2, Some(-900));
        data.push(0);

        let mut stream = empty_stream();
        decode_runs(&data, 0, &mut stream).unwrap();
        assert_eq!(stream.fragments[1].lcn, 100);
        assert_eq!(stream.fragments[1].next_vcn, 4);
    }

    #[test]
    fn one_byte_offset_0x80_is_minus_128() {
        // Hand-built: header 0x11, length 1, offset byte 0x80
        let data = [0x11, 0x01, 0x80, 0x00];
        let mut stream = empty_stream();
        decode_runs(&data, 0, &mut stream).unwrap();
        // First run: lcn = 0 + (-128) as u64
        assert_eq!(stream.fragments[0].lcn, (-128i64) as u64);
    }

    #[test]
    fn sign_extension_across_widths() {
        for (bytes, expected) in [
            (vec![0xFFu8], -1i64),
            (vec![0x00, 0x80], -32768),
            (vec![0xFF, 0xFF, 0xFF, 0x7F], 0x7FFF_FFFF),
        ] {
            let mut data = vec![(bytes.len() as u8) << 4 | 0x01, 0x01];
            data.extend_from_slice(&bytes);
            data.push(0);

            let mut stream = empty_stream();
            decode_runs(&data, 0, &mut stream).unwrap();
            assert_eq!(stream.fragments[0].lcn, expected as u64, "width {}", bytes.len());
        }
    }

    #[test]
    fn zero_width_offset_is_virtual() {
        let mut data = Vec::new();
        encode_run(&mut data, 16, Some(50));
        encode_run(&mut data, 8, None); // sparse filler
        encode_run(&mut data, 4, Some(10));
        data.push(0);

        let mut stream = empty_stream();
        decode_runs(&data, 0, &mut stream).unwrap();

        assert!(stream.fragments[1].is_virtual());
        assert_eq!(stream.fragments[1].next_vcn, 24);
        // Virtual run does not advance the lcn accumulator
        assert_eq!(stream.fragments[2].lcn, 60);
        // ...and contributes nothing to the cluster total
        assert_eq!(stream.clusters, 20);
    }

    #[test]
    fn truncated_list_is_corrupt_at_every_cut() {
        let mut data = Vec::new();
        encode_run(&mut data, 8, Some(100));
        encode_run(&mut data, 4, Some(-20));
        data.push(0);

        for cut in 0..data.len() - 1 {
            let mut stream = empty_stream();
            let result = decode_runs(&data[..cut], 0, &mut stream);
            assert!(
                matches!(result, Err(MftScanError::CorruptData(_))),
                "cut at {} should be corrupt",
                cut
            );
        }
    }

    #[test]
    fn missing_terminator_is_corrupt() {
        let mut data = Vec::new();
        encode_run(&mut data, 8, Some(100));
        // no 0x00 terminator
        let mut stream = empty_stream();
        assert!(decode_runs(&data, 0, &mut stream).is_err());
    }

    #[test]
    fn starting_vcn_offsets_the_fragment_chain() {
        let mut data = Vec::new();
        encode_run(&mut data, 4, Some(7));
        data.push(0);

        let mut stream = empty_stream();
        decode_runs(&data, 100, &mut stream).unwrap();
        assert_eq!(stream.fragments[0].next_vcn, 104);
    }

    fn test_geometry() -> VolumeGeometry {
        let mut data = vec![0u8; 512];
        data[0x03..0x0B].copy_from_slice(b"NTFS    ");
        data[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
        data[0x0D] = 2; // 1024-byte clusters
        data[0x28..0x30].copy_from_slice(&1024u64.to_le_bytes());
        data[0x40] = 0xF6;
        VolumeGeometry::parse(&data).unwrap()
    }

    #[test]
    fn windowed_read_skips_extents_outside_the_window() {
        let geometry = test_geometry();
        let cluster = geometry.bytes_per_cluster() as usize;

        // Backing image: clusters 4..6 hold 'A', clusters 8..10 hold 'B'
        let mut image = vec![0u8; 16 * cluster];
        image[4 * cluster..6 * cluster].fill(b'A');
        image[8 * cluster..10 * cluster].fill(b'B');
        let mut device = Cursor::new(image);

        // Logical stream: 2 clusters at lcn 4, then 2 clusters at lcn 8
        let mut run_data = Vec::new();
        encode_run(&mut run_data, 2, Some(4));
        encode_run(&mut run_data, 2, Some(4));
        run_data.push(0);

        // Window: second logical cluster through third => 'A' then 'B'
        let buffer = read_non_resident(
            &mut device,
            &geometry,
            &run_data,
            cluster as u64,
            2 * cluster as u64,
        )
        .unwrap();

        assert_eq!(buffer.len(), 2 * cluster);
        assert!(buffer[..cluster].iter().all(|&b| b == b'A'));
        assert!(buffer[cluster..].iter().all(|&b| b == b'B'));
    }

    #[test]
    fn windowed_read_rounds_up_to_whole_sectors() {
        let geometry = test_geometry();
        let cluster = geometry.bytes_per_cluster() as usize;

        let image = vec![b'X'; 8 * cluster];
        let mut device = Cursor::new(image);

        let mut run_data = Vec::new();
        encode_run(&mut run_data, 4, Some(2));
        run_data.push(0);

        let buffer = read_non_resident(&mut device, &geometry, &run_data, 0, 100).unwrap();
        assert_eq!(buffer.len(), 512);
        assert!(buffer.iter().all(|&b| b == b'X'));
    }
}
