use memtable::{Cell, MemTable, MemTableIter};
use sstable::{SSTable, SSTableIter};

use crate::error::{Result, StoreError};

/// Uniform view over the two table kinds the engine routes between: the
/// mutable in-memory write buffer and the immutable on-disk runs.
///
/// Mutations through a [`Table::Disk`] fail with
/// [`StoreError::NotSupported`]; SSTables are write-once.
pub enum Table {
    Mem(MemTable),
    Disk(SSTable),
}

impl Table {
    /// Cursor over cells with key ≥ `from`, ascending.
    pub fn iter(&self, from: &[u8]) -> Result<TableIter<'_>> {
        match self {
            Table::Mem(mem) => Ok(TableIter::Mem(mem.iter(from))),
            Table::Disk(sst) => Ok(TableIter::Disk(sst.iter(from)?)),
        }
    }

    pub fn upsert(&mut self, key: Vec<u8>, payload: Vec<u8>) -> Result<()> {
        match self {
            Table::Mem(mem) => {
                mem.upsert(key, payload);
                Ok(())
            }
            Table::Disk(_) => Err(StoreError::NotSupported("upsert")),
        }
    }

    pub fn remove(&mut self, key: Vec<u8>) -> Result<()> {
        match self {
            Table::Mem(mem) => {
                mem.remove(key);
                Ok(())
            }
            Table::Disk(_) => Err(StoreError::NotSupported("remove")),
        }
    }

    /// Entry count: buffered entries for Mem, rows for Disk.
    pub fn len(&self) -> usize {
        match self {
            Table::Mem(mem) => mem.len(),
            Table::Disk(sst) => sst.rows() as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked bytes for Mem, file size for Disk.
    pub fn size_in_bytes(&self) -> u64 {
        match self {
            Table::Mem(mem) => mem.size_in_bytes(),
            Table::Disk(sst) => sst.file_size(),
        }
    }

    /// Releases resources. A memory table has none; an on-disk table drops
    /// its file handle.
    pub fn close(self) -> Result<()> {
        match self {
            Table::Mem(_) => Ok(()),
            Table::Disk(sst) => Ok(sst.close()?),
        }
    }
}

/// The common cursor type over either table kind.
pub enum TableIter<'a> {
    Mem(MemTableIter<'a>),
    Disk(SSTableIter<'a>),
}

impl Iterator for TableIter<'_> {
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            TableIter::Mem(iter) => iter.next().map(Ok),
            TableIter::Disk(iter) => iter.next().map(|r| r.map_err(StoreError::from)),
        }
    }
}
