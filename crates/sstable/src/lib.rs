//! # SSTable — Sorted String Table
//!
//! Immutable, on-disk storage files for the SiltKV storage engine.
//!
//! When the in-memory [`memtable::MemTable`] exceeds its size threshold the
//! engine flushes it to disk as an SSTable. SSTables are **write-once,
//! read-many** — once published they are never modified, only deleted by
//! compaction.
//!
//! ## File layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │ ENTRY REGION (sorted cells)                         │
//! │                                                     │
//! │ key_len (u32) | key | timestamp (i64)               │
//! │ value_len (u32) | value        -- live entries only │
//! │                                                     │
//! │ ... repeated for each entry ...                     │
//! ├─────────────────────────────────────────────────────┤
//! │ OFFSETS REGION                                      │
//! │                                                     │
//! │ entry start offset (u64), one per entry, in order   │
//! ├─────────────────────────────────────────────────────┤
//! │ FOOTER (always last 4 bytes)                        │
//! │                                                     │
//! │ rows (u32)                                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. A negative timestamp marks a tombstone whose
//! true timestamp is the absolute value; tombstones carry no value bytes.
//! Entries are stored in strictly ascending key order.

mod format;
mod reader;
mod writer;

use std::io;
use thiserror::Error;

pub use format::{FOOTER_BYTES, OFFSET_BYTES};
pub use reader::{SSTable, SSTableIter};
pub use writer::SSTableWriter;

#[derive(Debug, Error)]
pub enum SSTableError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed sstable: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, SSTableError>;
