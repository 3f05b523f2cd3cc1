use byteorder::{BigEndian, WriteBytesExt};
use memtable::Cell;
use std::fs::OpenOptions;
use std::io::{Seek, Write};
use std::path::Path;

use crate::format::write_footer;
use crate::Result;

/// Serializes an ordered cell stream into an immutable SSTable file.
///
/// The writer is stateless — all work happens inside the single static method
/// [`write`](SSTableWriter::write). Atomic publication is the caller's job:
/// the engine serializes into a `.tmp` path and renames it into place once
/// this method has returned and the file handle is released.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Writes `rows` cells to a new file at `path`.
    ///
    /// Entries are streamed in iteration order while their start offsets are
    /// recorded in memory; the offsets region and footer follow the final
    /// entry. The file is fsynced and the handle dropped before returning, so
    /// the caller may rename immediately.
    ///
    /// The caller guarantees that `cells` yields exactly `rows` cells in
    /// strictly ascending key order.
    ///
    /// # Errors
    ///
    /// Returns an error on any I/O failure.
    pub fn write<I>(path: &Path, cells: I, rows: u32) -> Result<()>
    where
        I: IntoIterator<Item = Cell>,
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut offsets: Vec<u64> = Vec::with_capacity(rows as usize);
        for cell in cells {
            offsets.push(file.stream_position()?);

            file.write_u32::<BigEndian>(cell.key.len() as u32)?;
            file.write_all(&cell.key)?;

            let timestamp = cell.value.timestamp() as i64;
            debug_assert!(timestamp > 0, "timestamps must be positive and fit in i64");
            match cell.value.payload() {
                Some(payload) => {
                    file.write_i64::<BigEndian>(timestamp)?;
                    file.write_u32::<BigEndian>(payload.len() as u32)?;
                    file.write_all(payload)?;
                }
                // The sign bit tags tombstones; no value bytes follow.
                None => file.write_i64::<BigEndian>(-timestamp)?,
            }
        }
        debug_assert_eq!(offsets.len(), rows as usize);

        for offset in &offsets {
            file.write_u64::<BigEndian>(*offset)?;
        }
        write_footer(&mut file, rows)?;

        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}
