//! NTFS on-disk structures and constants
//!
//! Every structure is decoded from a bounds-checked byte slice; nothing is
//! aliased in place. Field offsets follow the NTFS on-disk layout and must
//! not drift: a single wrong offset silently desyncs every later read.

use crate::error::{MftScanError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

// ============================================================================
// NTFS Constants
// ============================================================================

/// MFT record signature "FILE"
pub const MFT_RECORD_SIGNATURE: u32 = 0x454C4946; // "FILE" in little-endian

/// End of attributes marker
pub const ATTRIBUTE_END_MARKER: u32 = 0xFFFFFFFF;

/// Minimum length of an attribute header (common part)
pub const ATTRIBUTE_HEADER_LEN: usize = 16;

/// Sentinel Lcn for fragments with no backing clusters (sparse/compressed)
pub const LCN_VIRTUAL: u64 = u64::MAX;

/// Well-known MFT index of the root directory
pub const ROOT_DIRECTORY_INDEX: u32 = 5;

// MFT Record Flags
pub const MFT_RECORD_IN_USE: u16 = 0x0001;
pub const MFT_RECORD_IS_DIRECTORY: u16 = 0x0002;

// ============================================================================
// Attribute Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AttributeType {
    StandardInformation = 0x10,
    AttributeList = 0x20,
    FileName = 0x30,
    ObjectId = 0x40,
    SecurityDescriptor = 0x50,
    VolumeName = 0x60,
    VolumeInformation = 0x70,
    Data = 0x80,
    IndexRoot = 0x90,
    IndexAllocation = 0xA0,
    Bitmap = 0xB0,
    ReparsePoint = 0xC0,
    EaInformation = 0xD0,
    Ea = 0xE0,
    LoggedUtilityStream = 0x100,
}

impl AttributeType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x10 => Some(Self::StandardInformation),
            0x20 => Some(Self::AttributeList),
            0x30 => Some(Self::FileName),
            0x40 => Some(Self::ObjectId),
            0x50 => Some(Self::SecurityDescriptor),
            0x60 => Some(Self::VolumeName),
            0x70 => Some(Self::VolumeInformation),
            0x80 => Some(Self::Data),
            0x90 => Some(Self::IndexRoot),
            0xA0 => Some(Self::IndexAllocation),
            0xB0 => Some(Self::Bitmap),
            0xC0 => Some(Self::ReparsePoint),
            0xD0 => Some(Self::EaInformation),
            0xE0 => Some(Self::Ea),
            0x100 => Some(Self::LoggedUtilityStream),
            _ => None,
        }
    }
}

// ============================================================================
// Filename Namespace
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FilenameNamespace {
    Posix = 0,
    Win32 = 1,
    Dos = 2,
    Win32AndDos = 3,
}

impl FilenameNamespace {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Posix),
            1 => Some(Self::Win32),
            2 => Some(Self::Dos),
            3 => Some(Self::Win32AndDos),
            _ => None,
        }
    }

    /// A long name as opposed to a pure-DOS 8.3 alias
    pub fn is_long(&self) -> bool {
        matches!(self, Self::Win32 | Self::Win32AndDos)
    }
}

// ============================================================================
// Volume Geometry (from the boot sector)
// ============================================================================

/// Sizing constants decoded once from the 512-byte NTFS boot sector.
/// All derived values are pure functions of these fields.
#[derive(Debug, Clone)]
pub struct VolumeGeometry {
    /// Bytes per sector (offset 0x0B, typically 512)
    pub bytes_per_sector: u16,
    /// Sectors per cluster (offset 0x0D, typically 8 -> 4096 byte clusters)
    pub sectors_per_cluster: u8,
    /// Total sectors on volume (offset 0x28)
    pub total_sectors: u64,
    /// MFT starting cluster number / LCN (offset 0x30)
    pub mft_start_lcn: u64,
    /// MFT mirror starting cluster number (offset 0x38)
    pub mft_mirror_lcn: u64,
    /// Clusters per MFT record (offset 0x40, signed)
    /// If negative, record size = 2^|value| bytes
    /// If positive, record size = value * bytes_per_cluster
    pub clusters_per_mft_record: i8,
    /// Clusters per index block (offset 0x44, signed, same encoding)
    pub clusters_per_index_block: i8,
    /// Volume serial number (offset 0x48)
    pub volume_serial_number: u64,
}

impl VolumeGeometry {
    /// Parse and validate a raw 512-byte boot sector.
    ///
    /// The 8-byte OEM field at offset 0x03 must read "NTFS    " for the
    /// rest of the sector to mean anything; everything else in the engine
    /// builds on these constants.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 0x50 || &data[0x03..0x0B] != b"NTFS    " {
            return Err(MftScanError::NotNtfs);
        }

        let bytes_per_sector = u16::from_le_bytes([data[0x0B], data[0x0C]]);
        let sectors_per_cluster = data[0x0D];

        if bytes_per_sector < 256
            || !bytes_per_sector.is_power_of_two()
            || sectors_per_cluster == 0
            || !sectors_per_cluster.is_power_of_two()
        {
            return Err(MftScanError::NotNtfs);
        }

        let mut cursor = Cursor::new(&data[0x28..]);
        let total_sectors = cursor.read_u64::<LittleEndian>()?;
        let mft_start_lcn = cursor.read_u64::<LittleEndian>()?;
        let mft_mirror_lcn = cursor.read_u64::<LittleEndian>()?;

        let clusters_per_mft_record = data[0x40] as i8;
        let clusters_per_index_block = data[0x44] as i8;
        let volume_serial_number = u64::from_le_bytes([
            data[0x48], data[0x49], data[0x4A], data[0x4B],
            data[0x4C], data[0x4D], data[0x4E], data[0x4F],
        ]);

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            mft_start_lcn,
            mft_mirror_lcn,
            clusters_per_mft_record,
            clusters_per_index_block,
            volume_serial_number,
        })
    }

    /// Calculate bytes per cluster
    pub fn bytes_per_cluster(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    /// Total clusters on the volume
    pub fn total_clusters(&self) -> u64 {
        self.total_sectors / self.sectors_per_cluster as u64
    }

    /// Calculate bytes per MFT record
    /// If clusters_per_mft_record is negative, size = 2^|value|
    /// If positive, size = value * bytes_per_cluster
    pub fn bytes_per_mft_record(&self) -> u64 {
        if self.clusters_per_mft_record < 0 {
            1u64 << (-(self.clusters_per_mft_record as i32) as u32)
        } else {
            self.clusters_per_mft_record as u64 * self.bytes_per_cluster()
        }
    }

    /// Byte offset of the start of the MFT on the volume
    pub fn mft_byte_offset(&self) -> u64 {
        self.mft_start_lcn * self.bytes_per_cluster()
    }
}

// ============================================================================
// File Record Header
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FileRecordHeader {
    pub signature: u32,
    pub usa_offset: u16,
    pub usa_count: u16,
    pub log_sequence_number: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub attribute_offset: u16,
    pub flags: u16,
    pub bytes_in_use: u32,
    pub bytes_allocated: u32,
    pub base_record_low: u32,
    pub base_record_high: u16,
    pub base_record_sequence: u16,
    pub next_attribute_id: u16,
}

impl FileRecordHeader {
    /// Parse a file record header from raw bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 42 {
            return None;
        }

        let mut cursor = Cursor::new(data);

        Some(Self {
            signature: cursor.read_u32::<LittleEndian>().ok()?,
            usa_offset: cursor.read_u16::<LittleEndian>().ok()?,
            usa_count: cursor.read_u16::<LittleEndian>().ok()?,
            log_sequence_number: cursor.read_u64::<LittleEndian>().ok()?,
            sequence_number: cursor.read_u16::<LittleEndian>().ok()?,
            hard_link_count: cursor.read_u16::<LittleEndian>().ok()?,
            attribute_offset: cursor.read_u16::<LittleEndian>().ok()?,
            flags: cursor.read_u16::<LittleEndian>().ok()?,
            bytes_in_use: cursor.read_u32::<LittleEndian>().ok()?,
            bytes_allocated: cursor.read_u32::<LittleEndian>().ok()?,
            base_record_low: cursor.read_u32::<LittleEndian>().ok()?,
            base_record_high: cursor.read_u16::<LittleEndian>().ok()?,
            base_record_sequence: cursor.read_u16::<LittleEndian>().ok()?,
            next_attribute_id: cursor.read_u16::<LittleEndian>().ok()?,
        })
    }

    /// Check if this buffer slot holds a FILE record at all
    pub fn is_file_record(&self) -> bool {
        self.signature == MFT_RECORD_SIGNATURE
    }

    /// Check if this record is in use
    pub fn is_in_use(&self) -> bool {
        (self.flags & MFT_RECORD_IN_USE) != 0
    }

    /// Check if this record represents a directory
    pub fn is_directory(&self) -> bool {
        (self.flags & MFT_RECORD_IS_DIRECTORY) != 0
    }

    /// Check if this is a base record (not an extension belonging to
    /// another record's attribute list)
    pub fn is_base_record(&self) -> bool {
        self.base_record_low == 0 && self.base_record_high == 0
    }
}

// ============================================================================
// Attribute Headers
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AttributeHeader {
    pub attribute_type: u32,
    pub length: u32,
    pub non_resident: bool,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    pub attribute_id: u16,
}

#[derive(Debug, Clone)]
pub struct ResidentAttributeHeader {
    pub base: AttributeHeader,
    pub value_length: u32,
    pub value_offset: u16,
    pub indexed_flag: u8,
}

#[derive(Debug, Clone)]
pub struct NonResidentAttributeHeader {
    pub base: AttributeHeader,
    pub starting_vcn: u64,
    pub last_vcn: u64,
    pub run_array_offset: u16,
    pub compression_unit: u8,
    pub allocated_size: u64,
    pub data_size: u64,
    pub initialized_size: u64,
}

impl AttributeHeader {
    /// Parse the common attribute header from raw bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < ATTRIBUTE_HEADER_LEN {
            return None;
        }

        let mut cursor = Cursor::new(data);

        Some(Self {
            attribute_type: cursor.read_u32::<LittleEndian>().ok()?,
            length: cursor.read_u32::<LittleEndian>().ok()?,
            non_resident: cursor.read_u8().ok()? != 0,
            name_length: cursor.read_u8().ok()?,
            name_offset: cursor.read_u16::<LittleEndian>().ok()?,
            flags: cursor.read_u16::<LittleEndian>().ok()?,
            attribute_id: cursor.read_u16::<LittleEndian>().ok()?,
        })
    }

    /// Decode the attribute's UTF-16 name, if it has one.
    /// `data` is the attribute record starting at its own header.
    pub fn name(&self, data: &[u8]) -> Option<String> {
        if self.name_length == 0 {
            return None;
        }
        let start = self.name_offset as usize;
        let len = self.name_length as usize * 2;
        if start + len > data.len() {
            return None;
        }
        Some(decode_utf16le(&data[start..start + len]))
    }
}

impl ResidentAttributeHeader {
    /// Parse a resident attribute header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let base = AttributeHeader::from_bytes(data)?;
        if base.non_resident || data.len() < 24 {
            return None;
        }

        let mut cursor = Cursor::new(&data[16..]);

        Some(Self {
            base,
            value_length: cursor.read_u32::<LittleEndian>().ok()?,
            value_offset: cursor.read_u16::<LittleEndian>().ok()?,
            indexed_flag: cursor.read_u8().ok()?,
        })
    }

    /// The attribute's resident value bytes, bounds-checked against the
    /// attribute record slice.
    pub fn value<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        let start = self.value_offset as usize;
        let end = start.checked_add(self.value_length as usize)?;
        data.get(start..end)
    }
}

impl NonResidentAttributeHeader {
    /// Parse a non-resident attribute header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let base = AttributeHeader::from_bytes(data)?;
        if !base.non_resident || data.len() < 64 {
            return None;
        }

        let mut cursor = Cursor::new(&data[16..]);

        let starting_vcn = cursor.read_u64::<LittleEndian>().ok()?;
        let last_vcn = cursor.read_u64::<LittleEndian>().ok()?;
        let run_array_offset = cursor.read_u16::<LittleEndian>().ok()?;
        let compression_unit = cursor.read_u8().ok()?;
        let mut padding = [0u8; 5];
        cursor.read_exact(&mut padding).ok()?;
        let allocated_size = cursor.read_u64::<LittleEndian>().ok()?;
        let data_size = cursor.read_u64::<LittleEndian>().ok()?;
        let initialized_size = cursor.read_u64::<LittleEndian>().ok()?;

        Some(Self {
            base,
            starting_vcn,
            last_vcn,
            run_array_offset,
            compression_unit,
            allocated_size,
            data_size,
            initialized_size,
        })
    }
}

// ============================================================================
// Standard Information Attribute
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct StandardInformation {
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_modification_time: u64,
    pub access_time: u64,
    pub file_attributes: u32,
}

impl StandardInformation {
    /// Parse from resident attribute content
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 36 {
            return None;
        }

        let mut cursor = Cursor::new(data);

        Some(Self {
            creation_time: cursor.read_u64::<LittleEndian>().ok()?,
            modification_time: cursor.read_u64::<LittleEndian>().ok()?,
            mft_modification_time: cursor.read_u64::<LittleEndian>().ok()?,
            access_time: cursor.read_u64::<LittleEndian>().ok()?,
            file_attributes: cursor.read_u32::<LittleEndian>().ok()?,
        })
    }
}

// ============================================================================
// File Name Attribute
// ============================================================================

#[derive(Debug, Clone)]
pub struct FileNameAttribute {
    pub parent_record_low: u32,
    pub parent_record_high: u16,
    pub parent_sequence: u16,
    pub creation_time: u64,
    pub change_time: u64,
    pub write_time: u64,
    pub access_time: u64,
    pub allocated_size: u64,
    pub data_size: u64,
    pub file_attributes: u32,
    pub namespace: FilenameNamespace,
    pub name: String,
}

impl FileNameAttribute {
    /// Parse from resident attribute content
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 66 {
            return None;
        }

        let mut cursor = Cursor::new(data);

        let parent_record_low = cursor.read_u32::<LittleEndian>().ok()?;
        let parent_record_high = cursor.read_u16::<LittleEndian>().ok()?;
        let parent_sequence = cursor.read_u16::<LittleEndian>().ok()?;
        let creation_time = cursor.read_u64::<LittleEndian>().ok()?;
        let change_time = cursor.read_u64::<LittleEndian>().ok()?;
        let write_time = cursor.read_u64::<LittleEndian>().ok()?;
        let access_time = cursor.read_u64::<LittleEndian>().ok()?;
        let allocated_size = cursor.read_u64::<LittleEndian>().ok()?;
        let data_size = cursor.read_u64::<LittleEndian>().ok()?;
        let file_attributes = cursor.read_u32::<LittleEndian>().ok()?;
        let _reserved = cursor.read_u32::<LittleEndian>().ok()?;
        let name_length = cursor.read_u8().ok()?;
        let namespace = FilenameNamespace::from_u8(cursor.read_u8().ok()?)?;

        // Filename is UTF-16LE right after the fixed part
        let name_bytes = name_length as usize * 2;
        if data.len() < 66 + name_bytes {
            return None;
        }
        let name = decode_utf16le(&data[66..66 + name_bytes]);

        Some(Self {
            parent_record_low,
            parent_record_high,
            parent_sequence,
            creation_time,
            change_time,
            write_time,
            access_time,
            allocated_size,
            data_size,
            file_attributes,
            namespace,
            name,
        })
    }
}

/// Decode a UTF-16LE byte region into a String, lossily
pub fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

// ============================================================================
// FILETIME conversion utilities
// ============================================================================

/// Convert Windows FILETIME (100-nanosecond intervals since 1601) to Unix timestamp
pub fn filetime_to_unix(filetime: u64) -> i64 {
    // Difference between 1601 and 1970 in 100-nanosecond intervals
    const EPOCH_DIFF: u64 = 116444736000000000;

    if filetime < EPOCH_DIFF {
        return 0;
    }

    ((filetime - EPOCH_DIFF) / 10_000_000) as i64
}

/// Convert Windows FILETIME to chrono DateTime
pub fn filetime_to_datetime(filetime: u64) -> chrono::DateTime<chrono::Utc> {
    use chrono::{TimeZone, Utc};
    let unix_ts = filetime_to_unix(filetime);
    Utc.timestamp_opt(unix_ts, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap())
}

// ============================================================================
// File Attributes
// ============================================================================

pub mod file_attributes {
    pub const READONLY: u32 = 0x00000001;
    pub const HIDDEN: u32 = 0x00000002;
    pub const SYSTEM: u32 = 0x00000004;
    pub const DIRECTORY: u32 = 0x00000010;
    pub const ARCHIVE: u32 = 0x00000020;
    pub const DEVICE: u32 = 0x00000040;
    pub const NORMAL: u32 = 0x00000080;
    pub const TEMPORARY: u32 = 0x00000100;
    pub const SPARSE_FILE: u32 = 0x00000200;
    pub const REPARSE_POINT: u32 = 0x00000400;
    pub const COMPRESSED: u32 = 0x00000800;
    pub const OFFLINE: u32 = 0x00001000;
    pub const NOT_CONTENT_INDEXED: u32 = 0x00002000;
    pub const ENCRYPTED: u32 = 0x00004000;
}
