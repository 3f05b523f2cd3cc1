//! Binary layout constants and footer read/write helpers.
//!
//! The footer is always the **last 4 bytes** of an SSTable file:
//!
//! ```text
//! [rows: u32 BE]
//! ```
//!
//! Immediately before it sit `rows` big-endian `u64` entry offsets.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Result as IoResult, Seek, SeekFrom, Write};

/// Size of the footer in bytes: a single `u32` row count.
pub const FOOTER_BYTES: u64 = 4;

/// Size of one entry in the offsets region.
pub const OFFSET_BYTES: u64 = 8;

/// Returns the byte offset where the footer starts: `filesize - 4`.
///
/// Uses [`u64::saturating_sub`] so files smaller than the footer return 0
/// rather than underflowing.
pub fn footer_pos(filesize: u64) -> u64 {
    filesize.saturating_sub(FOOTER_BYTES)
}

/// Returns the file position of the offsets-region slot for `row`.
///
/// Slot *i* of `rows` lives at `filesize - 4 - 8 * (rows - i)`.
pub fn offset_pos(filesize: u64, rows: u32, row: u32) -> u64 {
    debug_assert!(row < rows);
    filesize - FOOTER_BYTES - OFFSET_BYTES * u64::from(rows - row)
}

/// Writes the footer (row count) to `w`.
pub fn write_footer<W: Write>(w: &mut W, rows: u32) -> IoResult<()> {
    w.write_u32::<BigEndian>(rows)
}

/// Reads the footer from `r`, returning `(filesize, rows)`.
///
/// The reader is seeked to the end to determine file size, then to the footer
/// position. After this call the cursor is at the end of the file.
pub fn read_footer<R: Read + Seek>(r: &mut R) -> IoResult<(u64, u32)> {
    let filesize = r.seek(SeekFrom::End(0))?;
    r.seek(SeekFrom::Start(footer_pos(filesize)))?;
    let rows = r.read_u32::<BigEndian>()?;
    Ok((filesize, rows))
}
