//! MFT record parsing
//!
//! Handles update-sequence fixup of raw records and the attribute walk
//! that turns a fixed-up record into a [`Node`].

use crate::error::{MftScanError, Result};
use crate::ntfs::runs::{self, Stream};
use crate::ntfs::structs::*;
use log::trace;

// ============================================================================
// Decoded file-system entry
// ============================================================================

/// Standard timestamps as raw 64-bit FILETIME ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub creation: u64,
    pub modification: u64,
    pub access: u64,
}

/// One decoded file-system entry.
///
/// Built up while a record's attributes are walked, then handed to the
/// caller as a finished value; the engine keeps nothing once it is
/// yielded.
#[derive(Debug, Clone)]
pub struct Node {
    /// This record's MFT index
    pub index: u32,
    /// Parent directory's MFT index (root directory when no FILE_NAME said otherwise)
    pub parent_index: u32,
    /// DOS-style attribute flags, merged from the record header and
    /// STANDARD_INFORMATION
    pub attributes: u32,
    /// Byte size of the primary data stream
    pub size: u64,
    /// First long-namespace name found for this record
    pub name: String,
    /// Standard timestamps, when the scan opted in
    pub timestamps: Option<Timestamps>,
    /// Collected streams with fragment lists, when the scan opted in
    pub streams: Vec<Stream>,
}

impl Node {
    fn new(index: u32) -> Self {
        Self {
            index,
            parent_index: ROOT_DIRECTORY_INDEX,
            attributes: 0,
            size: 0,
            name: String::new(),
            timestamps: None,
            streams: Vec::new(),
        }
    }

    pub fn is_directory(&self) -> bool {
        (self.attributes & file_attributes::DIRECTORY) != 0
    }

    pub fn is_hidden(&self) -> bool {
        (self.attributes & file_attributes::HIDDEN) != 0
    }

    pub fn is_system(&self) -> bool {
        (self.attributes & file_attributes::SYSTEM) != 0
    }

    pub fn is_reparse_point(&self) -> bool {
        (self.attributes & file_attributes::REPARSE_POINT) != 0
    }
}

// ============================================================================
// Update sequence fixup
// ============================================================================

/// Verify and undo the per-sector update sequence footer of a raw record.
///
/// On disk the last two bytes of every sector of a record are replaced by
/// the update sequence number; the true values live in the update sequence
/// array. Returns `Ok(false)` without touching the buffer when the slot
/// does not hold a FILE record at all (free slots are normal, not an
/// error). A USN mismatch means a torn write: the record cannot be
/// trusted and parsing it would produce garbage.
pub fn apply_fixup(buffer: &mut [u8], bytes_per_sector: u16, record_index: u64) -> Result<bool> {
    if buffer.len() < 8 {
        return Ok(false);
    }

    let signature = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
    if signature != MFT_RECORD_SIGNATURE {
        return Ok(false);
    }

    let usa_offset = u16::from_le_bytes([buffer[4], buffer[5]]) as usize;
    let usa_count = u16::from_le_bytes([buffer[6], buffer[7]]) as usize;

    if usa_count == 0 || usa_offset + usa_count * 2 > buffer.len() {
        return Err(MftScanError::CorruptMft(
            record_index,
            "update sequence array extends past the record".to_string(),
        ));
    }

    let usn = [buffer[usa_offset], buffer[usa_offset + 1]];
    let sector = bytes_per_sector as usize;

    for i in 1..usa_count {
        let sector_end = i * sector - 2;
        if sector_end + 2 > buffer.len() {
            return Err(MftScanError::CorruptMft(
                record_index,
                "update sequence array indicates data is missing".to_string(),
            ));
        }

        if buffer[sector_end] != usn[0] || buffer[sector_end + 1] != usn[1] {
            return Err(MftScanError::CorruptMft(
                record_index,
                "fixup word does not match the update sequence number".to_string(),
            ));
        }

        buffer[sector_end] = buffer[usa_offset + i * 2];
        buffer[sector_end + 1] = buffer[usa_offset + i * 2 + 1];
    }

    Ok(true)
}

// ============================================================================
// Record parser
// ============================================================================

/// Walks the attributes of fixed-up records, populating Nodes.
#[derive(Debug)]
pub struct RecordParser {
    include_timestamps: bool,
    include_fragments: bool,
}

impl RecordParser {
    pub fn new(include_timestamps: bool, include_fragments: bool) -> Self {
        Self {
            include_timestamps,
            include_fragments,
        }
    }

    /// Parse one fixed-up record buffer.
    ///
    /// `Ok(None)` means the slot is validly skippable: not a FILE record,
    /// not in use, or an extension record addressed by another record's
    /// attribute list. Corruption inside the record is an error scoped to
    /// this record; the caller decides whether that aborts anything.
    pub fn parse_record(
        &self,
        index: u32,
        buffer: &[u8],
        is_mft_record: bool,
    ) -> Result<Option<Node>> {
        let header = FileRecordHeader::from_bytes(buffer).ok_or_else(|| {
            MftScanError::CorruptMft(index as u64, "record shorter than its header".to_string())
        })?;

        if !header.is_file_record() || !header.is_in_use() {
            return Ok(None);
        }

        // Extension records carry attribute continuations for some other
        // record; they are never emitted on their own.
        if !header.is_base_record() {
            return Ok(None);
        }

        if header.attribute_offset as usize >= buffer.len() {
            return Err(MftScanError::CorruptMft(
                index as u64,
                "attribute table starts outside the record".to_string(),
            ));
        }
        if header.bytes_in_use as usize > buffer.len() {
            return Err(MftScanError::CorruptMft(
                index as u64,
                "record claims more bytes than its buffer holds".to_string(),
            ));
        }

        let mut node = Node::new(index);
        if header.is_directory() {
            node.attributes |= file_attributes::DIRECTORY;
        }

        let collect_streams = is_mft_record || self.include_fragments;
        let mut streams: Vec<Stream> = Vec::new();

        self.process_attributes(
            &mut node,
            &buffer[header.attribute_offset as usize..],
            None,
            collect_streams.then_some(&mut streams),
        )?;

        // The primary stream's declared size wins over whatever a resident
        // or secondary DATA attribute reported.
        if let Some(first) = streams.first() {
            node.size = first.size;
        }
        node.streams = streams;

        Ok(Some(node))
    }

    /// Walk the attribute table of a record.
    ///
    /// `instance` restricts the walk to one attribute id, the filter an
    /// attribute-list continuation would use; `None` processes them all.
    /// `streams` collects non-resident streams (with fragments) when
    /// present.
    pub fn process_attributes(
        &self,
        node: &mut Node,
        buf: &[u8],
        instance: Option<u16>,
        mut streams: Option<&mut Vec<Stream>>,
    ) -> Result<()> {
        let record_index = node.index as u64;
        let mut offset = 0usize;

        loop {
            if offset >= buf.len() {
                break;
            }
            if offset + 4 <= buf.len()
                && buf[offset..offset + 4] == ATTRIBUTE_END_MARKER.to_le_bytes()
            {
                break;
            }

            let attr = AttributeHeader::from_bytes(&buf[offset..]).ok_or_else(|| {
                MftScanError::CorruptMft(
                    record_index,
                    "truncated attribute header".to_string(),
                )
            })?;

            let length = attr.length as usize;
            if length < ATTRIBUTE_HEADER_LEN || offset + length > buf.len() {
                return Err(MftScanError::CorruptMft(
                    record_index,
                    "attribute is bigger than the record".to_string(),
                ));
            }

            let attr_data = &buf[offset..offset + length];
            offset += length;

            let Some(attr_type) = AttributeType::from_u32(attr.attribute_type) else {
                continue;
            };

            // Attribute continuation in other records is not expanded;
            // the extension records themselves are skipped by the
            // base-record check during the scan.
            if attr_type == AttributeType::AttributeList {
                trace!(
                    "record {}: skipping attribute list (multi-record attributes not merged)",
                    record_index
                );
                continue;
            }

            if let Some(wanted) = instance {
                if wanted != attr.attribute_id {
                    continue;
                }
            }

            if !attr.non_resident {
                self.process_resident(node, attr_type, attr_data)?;
            } else {
                self.process_non_resident(
                    node,
                    attr_type,
                    attr_data,
                    streams.as_deref_mut(),
                )?;
            }
        }

        Ok(())
    }

    fn process_resident(
        &self,
        node: &mut Node,
        attr_type: AttributeType,
        attr_data: &[u8],
    ) -> Result<()> {
        let record_index = node.index as u64;

        // Only a handful of resident attributes carry anything we report
        if !matches!(
            attr_type,
            AttributeType::StandardInformation | AttributeType::FileName | AttributeType::Data
        ) {
            return Ok(());
        }

        let resident = ResidentAttributeHeader::from_bytes(attr_data).ok_or_else(|| {
            MftScanError::CorruptMft(record_index, "truncated resident attribute".to_string())
        })?;

        match attr_type {
            AttributeType::StandardInformation => {
                let value = resident.value(attr_data).ok_or_else(|| {
                    MftScanError::CorruptMft(
                        record_index,
                        "standard information value out of bounds".to_string(),
                    )
                })?;
                if let Some(info) = StandardInformation::from_bytes(value) {
                    node.attributes |= info.file_attributes;
                    if self.include_timestamps {
                        node.timestamps = Some(Timestamps {
                            creation: info.creation_time,
                            modification: info.modification_time,
                            access: info.access_time,
                        });
                    }
                }
            }
            AttributeType::FileName => {
                let value = resident.value(attr_data).ok_or_else(|| {
                    MftScanError::CorruptMft(
                        record_index,
                        "file name value out of bounds".to_string(),
                    )
                })?;
                if let Some(file_name) = FileNameAttribute::from_bytes(value) {
                    // Keeping record references at 32 bits halves the
                    // per-node footprint; volumes needing the high part
                    // are rejected rather than silently mis-linked.
                    if file_name.parent_record_high > 0 {
                        return Err(MftScanError::Unsupported(record_index));
                    }
                    node.parent_index = file_name.parent_record_low;

                    if file_name.namespace.is_long() && node.name.is_empty() {
                        node.name = file_name.name;
                    }
                }
            }
            AttributeType::Data => {
                node.size = resident.value_length as u64;
            }
            _ => unreachable!(),
        }

        Ok(())
    }

    fn process_non_resident(
        &self,
        node: &mut Node,
        attr_type: AttributeType,
        attr_data: &[u8],
        streams: Option<&mut Vec<Stream>>,
    ) -> Result<()> {
        let record_index = node.index as u64;

        let non_resident = NonResidentAttributeHeader::from_bytes(attr_data).ok_or_else(|| {
            MftScanError::CorruptMft(record_index, "truncated non-resident attribute".to_string())
        })?;

        if attr_type == AttributeType::Data && node.size == 0 {
            node.size = non_resident.data_size;
        }

        let Some(streams) = streams else {
            return Ok(());
        };

        let name = non_resident.base.name(attr_data);

        let position = streams
            .iter()
            .position(|s| s.stream_type == attr_type && s.name == name);
        let stream = match position {
            Some(i) => &mut streams[i],
            None => {
                streams.push(Stream::new(name, attr_type, non_resident.data_size));
                streams.last_mut().expect("just pushed")
            }
        };
        if stream.size == 0 {
            stream.size = non_resident.data_size;
        }

        let run_offset = non_resident.run_array_offset as usize;
        if run_offset > attr_data.len() {
            return Err(MftScanError::CorruptMft(
                record_index,
                "run array starts outside the attribute".to_string(),
            ));
        }
        runs::decode_runs(
            &attr_data[run_offset..],
            non_resident.starting_vcn,
            stream,
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntfs::structs::AttributeType;

    // ------------------------------------------------------------------
    // Record building helpers
    // ------------------------------------------------------------------

    const ATTR_TABLE_OFFSET: usize = 56;

    /// Start a 1024-byte record with a plain header and no fixup pressure
    /// (usa_count = 1 leaves no sectors to verify).
    fn record_shell(flags: u16, base_record_low: u32) -> Vec<u8> {
        let mut rec = vec![0u8; 1024];
        rec[0..4].copy_from_slice(b"FILE");
        rec[4..6].copy_from_slice(&48u16.to_le_bytes()); // usa offset
        rec[6..8].copy_from_slice(&1u16.to_le_bytes()); // usa count
        rec[20..22].copy_from_slice(&(ATTR_TABLE_OFFSET as u16).to_le_bytes());
        rec[22..24].copy_from_slice(&flags.to_le_bytes());
        rec[24..28].copy_from_slice(&400u32.to_le_bytes()); // bytes in use
        rec[32..36].copy_from_slice(&base_record_low.to_le_bytes());
        rec
    }

    fn push_resident_attr(rec: &mut Vec<u8>, cursor: &mut usize, type_code: u32, value: &[u8]) {
        let value_offset = 24u16;
        let mut length = value_offset as usize + value.len();
        length = (length + 7) & !7;

        let at = *cursor;
        rec[at..at + 4].copy_from_slice(&type_code.to_le_bytes());
        rec[at + 4..at + 8].copy_from_slice(&(length as u32).to_le_bytes());
        rec[at + 8] = 0; // resident
        rec[at + 16..at + 20].copy_from_slice(&(value.len() as u32).to_le_bytes());
        rec[at + 20..at + 22].copy_from_slice(&value_offset.to_le_bytes());
        rec[at + 24..at + 24 + value.len()].copy_from_slice(value);
        *cursor += length;
    }

    fn push_non_resident_attr(
        rec: &mut Vec<u8>,
        cursor: &mut usize,
        type_code: u32,
        data_size: u64,
        run_data: &[u8],
    ) {
        let run_offset = 64u16;
        let mut length = run_offset as usize + run_data.len();
        length = (length + 7) & !7;

        let at = *cursor;
        rec[at..at + 4].copy_from_slice(&type_code.to_le_bytes());
        rec[at + 4..at + 8].copy_from_slice(&(length as u32).to_le_bytes());
        rec[at + 8] = 1; // non-resident
        rec[at + 32..at + 34].copy_from_slice(&run_offset.to_le_bytes());
        rec[at + 48..at + 56].copy_from_slice(&data_size.to_le_bytes());
        rec[at + 64..at + 64 + run_data.len()].copy_from_slice(run_data);
        *cursor += length;
    }

    fn push_end_marker(rec: &mut Vec<u8>, cursor: &mut usize) {
        rec[*cursor..*cursor + 4].copy_from_slice(&0xFFFFFFFFu32.to_le_bytes());
    }

    fn file_name_value(parent: u32, namespace: u8, name: &str) -> Vec<u8> {
        let mut value = vec![0u8; 66];
        value[0..4].copy_from_slice(&parent.to_le_bytes());
        value[64] = name.encode_utf16().count() as u8;
        value[65] = namespace;
        for unit in name.encode_utf16() {
            value.extend_from_slice(&unit.to_le_bytes());
        }
        value
    }

    fn standard_information_value(file_attributes: u32, times: [u64; 4]) -> Vec<u8> {
        let mut value = vec![0u8; 48];
        for (i, t) in times.iter().enumerate() {
            value[i * 8..i * 8 + 8].copy_from_slice(&t.to_le_bytes());
        }
        value[32..36].copy_from_slice(&file_attributes.to_le_bytes());
        value
    }

    // ------------------------------------------------------------------
    // Fixup
    // ------------------------------------------------------------------

    #[test]
    fn fixup_restores_sector_tails() {
        let mut rec = record_shell(0x0001, 0);
        rec[6..8].copy_from_slice(&3u16.to_le_bytes()); // usa count: usn + 2 sectors
        rec[48..50].copy_from_slice(&0x0042u16.to_le_bytes()); // usn
        rec[50..52].copy_from_slice(&[0xAA, 0xBB]); // true tail of sector 1
        rec[52..54].copy_from_slice(&[0xCC, 0xDD]); // true tail of sector 2
        rec[510..512].copy_from_slice(&0x0042u16.to_le_bytes());
        rec[1022..1024].copy_from_slice(&0x0042u16.to_le_bytes());

        assert!(apply_fixup(&mut rec, 512, 7).unwrap());
        assert_eq!(&rec[510..512], &[0xAA, 0xBB]);
        assert_eq!(&rec[1022..1024], &[0xCC, 0xDD]);
    }

    #[test]
    fn fixup_mismatch_is_corrupt() {
        let mut rec = record_shell(0x0001, 0);
        rec[6..8].copy_from_slice(&3u16.to_le_bytes());
        rec[48..50].copy_from_slice(&0x0042u16.to_le_bytes());
        rec[510..512].copy_from_slice(&0x0042u16.to_le_bytes());
        rec[1022..1024].copy_from_slice(&0x0041u16.to_le_bytes()); // torn write

        let err = apply_fixup(&mut rec, 512, 7).unwrap_err();
        assert!(matches!(err, MftScanError::CorruptMft(7, _)));
    }

    #[test]
    fn non_file_slot_is_not_an_error() {
        let mut rec = vec![0u8; 1024];
        rec[0..4].copy_from_slice(b"BAAD");
        assert!(!apply_fixup(&mut rec, 512, 3).unwrap());
    }

    // ------------------------------------------------------------------
    // Attribute walk
    // ------------------------------------------------------------------

    #[test]
    fn parses_a_regular_file_record() {
        let mut rec = record_shell(0x0001, 0);
        let mut cursor = ATTR_TABLE_OFFSET;
        push_resident_attr(
            &mut rec,
            &mut cursor,
            0x10,
            &standard_information_value(file_attributes::ARCHIVE, [111, 222, 333, 444]),
        );
        push_resident_attr(&mut rec, &mut cursor, 0x30, &file_name_value(5, 1, "a.txt"));
        push_resident_attr(&mut rec, &mut cursor, 0x80, &[0u8; 10]);
        push_end_marker(&mut rec, &mut cursor);

        let parser = RecordParser::new(true, false);
        let node = parser.parse_record(6, &rec, false).unwrap().unwrap();

        assert_eq!(node.index, 6);
        assert_eq!(node.parent_index, 5);
        assert_eq!(node.name, "a.txt");
        assert_eq!(node.size, 10);
        assert!(!node.is_directory());
        assert_eq!(
            node.timestamps,
            Some(Timestamps {
                creation: 111,
                modification: 222,
                access: 444,
            })
        );
    }

    #[test]
    fn timestamps_are_policy_gated() {
        let mut rec = record_shell(0x0001, 0);
        let mut cursor = ATTR_TABLE_OFFSET;
        push_resident_attr(
            &mut rec,
            &mut cursor,
            0x10,
            &standard_information_value(0, [1, 2, 3, 4]),
        );
        push_resident_attr(&mut rec, &mut cursor, 0x30, &file_name_value(5, 1, "x"));
        push_end_marker(&mut rec, &mut cursor);

        let parser = RecordParser::new(false, false);
        let node = parser.parse_record(6, &rec, false).unwrap().unwrap();
        assert!(node.timestamps.is_none());
    }

    #[test]
    fn first_long_name_wins_over_later_ones() {
        let mut rec = record_shell(0x0001, 0);
        let mut cursor = ATTR_TABLE_OFFSET;
        push_resident_attr(&mut rec, &mut cursor, 0x30, &file_name_value(5, 2, "AGRE~1.TXT"));
        push_resident_attr(&mut rec, &mut cursor, 0x30, &file_name_value(5, 3, "agreeable.txt"));
        push_resident_attr(&mut rec, &mut cursor, 0x30, &file_name_value(5, 1, "other.txt"));
        push_end_marker(&mut rec, &mut cursor);

        let parser = RecordParser::new(false, false);
        let node = parser.parse_record(9, &rec, false).unwrap().unwrap();
        // DOS 8.3 alias never names the node; the first long name sticks
        assert_eq!(node.name, "agreeable.txt");
    }

    #[test]
    fn extended_parent_reference_is_unsupported() {
        let mut value = file_name_value(5, 1, "big");
        value[4..6].copy_from_slice(&1u16.to_le_bytes()); // parent high part

        let mut rec = record_shell(0x0001, 0);
        let mut cursor = ATTR_TABLE_OFFSET;
        push_resident_attr(&mut rec, &mut cursor, 0x30, &value);
        push_end_marker(&mut rec, &mut cursor);

        let parser = RecordParser::new(false, false);
        let err = parser.parse_record(9, &rec, false).unwrap_err();
        assert!(matches!(err, MftScanError::Unsupported(9)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn extension_records_are_skipped() {
        let rec = record_shell(0x0001, 42); // base record reference set
        let parser = RecordParser::new(false, false);
        assert!(parser.parse_record(6, &rec, false).unwrap().is_none());
    }

    #[test]
    fn records_not_in_use_are_skipped() {
        let rec = record_shell(0x0000, 0);
        let parser = RecordParser::new(false, false);
        assert!(parser.parse_record(6, &rec, false).unwrap().is_none());
    }

    #[test]
    fn oversized_attribute_is_corrupt() {
        let mut rec = record_shell(0x0001, 0);
        let at = ATTR_TABLE_OFFSET;
        rec[at..at + 4].copy_from_slice(&0x10u32.to_le_bytes());
        rec[at + 4..at + 8].copy_from_slice(&100_000u32.to_le_bytes());

        let parser = RecordParser::new(false, false);
        let err = parser.parse_record(6, &rec, false).unwrap_err();
        assert!(matches!(err, MftScanError::CorruptMft(6, _)));
    }

    #[test]
    fn undersized_attribute_length_is_corrupt() {
        let mut rec = record_shell(0x0001, 0);
        let at = ATTR_TABLE_OFFSET;
        rec[at..at + 4].copy_from_slice(&0x10u32.to_le_bytes());
        rec[at + 4..at + 8].copy_from_slice(&8u32.to_le_bytes()); // below header size

        let parser = RecordParser::new(false, false);
        assert!(parser.parse_record(6, &rec, false).is_err());
    }

    #[test]
    fn directory_flag_comes_from_the_record_header() {
        let mut rec = record_shell(0x0003, 0); // in use + directory
        let mut cursor = ATTR_TABLE_OFFSET;
        push_resident_attr(&mut rec, &mut cursor, 0x30, &file_name_value(5, 1, "sub"));
        push_end_marker(&mut rec, &mut cursor);

        let parser = RecordParser::new(false, false);
        let node = parser.parse_record(7, &rec, false).unwrap().unwrap();
        assert!(node.is_directory());
        assert_eq!(node.name, "sub");
    }

    #[test]
    fn mft_record_collects_streams_and_canonicalizes_size() {
        // DATA: 4 clusters at lcn 2; BITMAP: 1 cluster at lcn 10
        let data_runs = [0x11, 0x04, 0x02, 0x00];
        let bitmap_runs = [0x11, 0x01, 0x0A, 0x00];

        let mut rec = record_shell(0x0001, 0);
        let mut cursor = ATTR_TABLE_OFFSET;
        push_resident_attr(&mut rec, &mut cursor, 0x30, &file_name_value(5, 3, "$MFT"));
        push_non_resident_attr(&mut rec, &mut cursor, 0x80, 4096, &data_runs);
        push_non_resident_attr(&mut rec, &mut cursor, 0xB0, 1024, &bitmap_runs);
        push_end_marker(&mut rec, &mut cursor);

        let parser = RecordParser::new(false, false);
        let node = parser.parse_record(0, &rec, true).unwrap().unwrap();

        assert_eq!(node.streams.len(), 2);
        let data = runs::find_stream(&node.streams, AttributeType::Data, None).unwrap();
        assert_eq!(data.size, 4096);
        assert_eq!(data.clusters, 4);
        assert_eq!(data.fragments.len(), 1);
        assert_eq!(data.fragments[0].lcn, 2);

        let bitmap = runs::find_stream(&node.streams, AttributeType::Bitmap, None).unwrap();
        assert_eq!(bitmap.fragments[0].lcn, 10);

        // Size canonicalized to the first collected stream
        assert_eq!(node.size, 4096);
    }

    #[test]
    fn corrupt_run_list_in_attribute_fails_the_record() {
        // Header promises an 8-byte offset field that is not there
        let bad_runs = [0x81, 0x01];

        let mut rec = record_shell(0x0001, 0);
        let mut cursor = ATTR_TABLE_OFFSET;
        push_non_resident_attr(&mut rec, &mut cursor, 0x80, 4096, &bad_runs);
        push_end_marker(&mut rec, &mut cursor);

        let parser = RecordParser::new(false, false);
        let err = parser.parse_record(0, &rec, true).unwrap_err();
        assert!(err.is_recoverable());
    }
}
