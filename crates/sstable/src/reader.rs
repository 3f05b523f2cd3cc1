use byteorder::{BigEndian, ReadBytesExt};
use memtable::{Cell, Value};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::format::{footer_pos, offset_pos, FOOTER_BYTES, OFFSET_BYTES};
use crate::{Result, SSTableError};

/// An immutable, random-access sorted run on disk.
///
/// The table owns one read-mode file handle from [`open`](SSTable::open)
/// until [`close`](SSTable::close) (or drop). Rows are resolved through the
/// offsets region at the tail of the file; a lower-bound binary search over
/// the row keys backs [`iter`](SSTable::iter), so positioning costs
/// `O(log rows)` key reads.
///
/// The handle's seek position is interior state (`RefCell`) so that reads and
/// iterators work through `&self`; the engine's single-writer contract means
/// the borrow is never contended.
pub struct SSTable {
    file: RefCell<File>,
    file_size: u64,
    rows: u32,
}

impl SSTable {
    /// Opens an SSTable file and validates its framing.
    ///
    /// # Errors
    ///
    /// [`SSTableError::Malformed`] when the file is shorter than the footer
    /// or the footer row count cannot fit in the file;
    /// [`SSTableError::Io`] on any read failure.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < FOOTER_BYTES {
            return Err(SSTableError::Malformed(format!(
                "file is {file_size} bytes, shorter than the footer"
            )));
        }

        file.seek(SeekFrom::Start(footer_pos(file_size)))?;
        let rows = file.read_u32::<BigEndian>()?;
        let tail = FOOTER_BYTES + OFFSET_BYTES * u64::from(rows);
        if tail > file_size {
            return Err(SSTableError::Malformed(format!(
                "footer declares {rows} rows but the file is {file_size} bytes"
            )));
        }

        Ok(Self {
            file: RefCell::new(file),
            file_size,
            rows,
        })
    }

    /// Number of entries in the file.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Total size of the file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Releases the file handle.
    pub fn close(self) -> Result<()> {
        drop(self.file.into_inner());
        Ok(())
    }

    fn offset(&self, row: u32) -> Result<u64> {
        debug_assert!(row < self.rows);
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset_pos(self.file_size, self.rows, row)))?;
        Ok(file.read_u64::<BigEndian>()?)
    }

    fn key(&self, row: u32) -> Result<Vec<u8>> {
        let offset = self.offset(row)?;
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))?;
        let key_len = file.read_u32::<BigEndian>()? as usize;
        let mut key = vec![0u8; key_len];
        file.read_exact(&mut key)?;
        Ok(key)
    }

    fn cell(&self, row: u32) -> Result<Cell> {
        let offset = self.offset(row)?;
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))?;

        let key_len = file.read_u32::<BigEndian>()? as usize;
        let mut key = vec![0u8; key_len];
        file.read_exact(&mut key)?;

        let timestamp = file.read_i64::<BigEndian>()?;
        let value = match timestamp.cmp(&0) {
            Ordering::Greater => {
                let value_len = file.read_u32::<BigEndian>()? as usize;
                let mut payload = vec![0u8; value_len];
                file.read_exact(&mut payload)?;
                Value::live(timestamp as u64, payload)
            }
            Ordering::Less => Value::tombstone(timestamp.unsigned_abs()),
            Ordering::Equal => {
                return Err(SSTableError::Malformed(format!(
                    "zero timestamp at row {row}"
                )))
            }
        };
        Ok(Cell::new(key, value))
    }

    /// Lower-bound binary search over the row keys.
    ///
    /// Returns the index of `from` when present, otherwise the index of the
    /// first strictly greater key (`rows` when every key is smaller).
    pub fn binary_search(&self, from: &[u8]) -> Result<u32> {
        let mut left = 0u32;
        let mut right = self.rows;
        while left < right {
            let middle = left + (right - left) / 2;
            match self.key(middle)?.as_slice().cmp(from) {
                Ordering::Less => left = middle + 1,
                Ordering::Equal => return Ok(middle),
                Ordering::Greater => right = middle,
            }
        }
        Ok(left)
    }

    /// Forward cursor over cells with key ≥ `from`, in ascending key order.
    ///
    /// Positioning performs the binary search eagerly, so construction can
    /// fail with `Io`. An error during iteration is yielded once, after which
    /// the cursor is exhausted; cells already yielded remain valid.
    pub fn iter(&self, from: &[u8]) -> Result<SSTableIter<'_>> {
        let next = self.binary_search(from)?;
        Ok(SSTableIter {
            table: self,
            next,
            done: false,
        })
    }
}

/// Forward cursor over an [`SSTable`].
pub struct SSTableIter<'a> {
    table: &'a SSTable,
    next: u32,
    done: bool,
}

impl Iterator for SSTableIter<'_> {
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next >= self.table.rows {
            return None;
        }
        match self.table.cell(self.next) {
            Ok(cell) => {
                self.next += 1;
                Some(Ok(cell))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
