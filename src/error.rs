//! Error types for MftScan
//!
//! One error enum covers the whole engine. Geometry, record-0 and bitmap
//! failures are fatal for a scan; per-record failures during the main
//! enumeration are recoverable and only skip the affected record.

use thiserror::Error;

/// Main error type for MftScan operations
#[derive(Error, Debug)]
pub enum MftScanError {
    #[error("Not an NTFS volume: boot sector signature mismatch")]
    NotNtfs,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Short read at offset {offset}: got {got} bytes, expected {expected}")]
    ShortRead {
        offset: u64,
        got: usize,
        expected: usize,
    },

    #[error("Corrupt MFT record {0}: {1}")]
    CorruptMft(u64, String),

    #[error("Corrupt data run list: {0}")]
    CorruptData(String),

    #[error("Required stream missing: {0}")]
    MissingStream(&'static str),

    #[error("Record {0} uses a 48-bit extended record reference, which is not supported")]
    Unsupported(u64),
}

/// Result type alias for MftScan operations
pub type Result<T> = std::result::Result<T, MftScanError>;

impl MftScanError {
    /// Check if this error is recoverable (scan can continue with the next record)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MftScanError::CorruptMft(_, _)
                | MftScanError::CorruptData(_)
                | MftScanError::Unsupported(_)
        )
    }
}
