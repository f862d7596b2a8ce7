//! MftScan - NTFS volume enumeration straight from the Master File Table
//!
//! Reads the metadata of every file and directory on an NTFS volume by
//! decoding the raw MFT, bypassing directory-traversal APIs entirely.
//! On volumes with millions of entries this is orders of magnitude
//! faster than a recursive walk: the whole MFT is pulled in large
//! sequential reads and decoded in memory.
//!
//! # Features
//!
//! - **Boot sector decoding**: sector/cluster/record sizing straight from disk
//! - **Fixup verification**: torn-write detection on every record
//! - **Data run decoding**: fragmented and sparse streams, bounds-checked
//! - **Usage bitmap**: unused record slots are never read
//! - **Lazy enumeration**: nodes stream out one at a time, O(1) state
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use mftscan::{scan, ScanOptions};
//!
//! fn main() -> mftscan::Result<()> {
//!     // Any Read + Seek works: a raw volume handle or an image file
//!     let device = File::open("/dev/sdb1")?;
//!
//!     let options = ScanOptions {
//!         include_timestamps: true,
//!         ..Default::default()
//!     };
//!
//!     let mut nodes = scan(device, options)?;
//!     println!("{} records in use", nodes.in_use_count());
//!
//!     for node in &mut nodes {
//!         println!("{:>10}  {}  (parent {})", node.size, node.name, node.parent_index);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! The caller opens and closes the device; dropping the scan mid-way is
//! the supported way to cancel. One scan owns its device and buffers:
//! concurrent scans need their own device sessions.

pub mod device;
pub mod error;
pub mod ntfs;
pub mod scanner;

// Re-export main types
pub use device::BlockDevice;
pub use error::{MftScanError, Result};
pub use scanner::{scan, MftScan, ScanOptions};

// Re-export NTFS types that users might need
pub use ntfs::{
    AttributeType, Fragment, Node, Stream, Timestamps, UsageBitmap, VolumeGeometry,
};
pub use ntfs::structs::{filetime_to_datetime, filetime_to_unix, ROOT_DIRECTORY_INDEX};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
