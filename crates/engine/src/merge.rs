//! K-way merge of sorted cell streams.
//!
//! [`MergeCells`] merges N sorted [`TableIter`] sources into one stream
//! ordered by (key ascending, timestamp descending, source index ascending).
//! The source tie-break resolves equal-timestamp duplicates to the freshest
//! source; by convention the engine passes the memtable as source 0 followed
//! by SSTables in descending generation.
//!
//! [`CollapseFresh`] then reduces runs of equal keys to their first (and
//! therefore freshest) cell. Tombstone filtering and projection to records
//! happen in the engine's scan wrapper, because compaction needs the
//! collapsed stream before any record projection.

use memtable::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Result, StoreError};
use crate::table::TableIter;

struct HeapEntry {
    cell: Cell,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    /// Inverted so `BinaryHeap` (a max-heap) pops the smallest key first,
    /// freshest timestamp and lowest source index winning ties.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cell
            .key
            .cmp(&self.cell.key)
            .then_with(|| {
                self.cell
                    .value
                    .timestamp()
                    .cmp(&other.cell.value.timestamp())
            })
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges N sorted cell cursors into a single sorted stream.
pub struct MergeCells<'a> {
    sources: Vec<TableIter<'a>>,
    heap: BinaryHeap<HeapEntry>,
    pending: Option<StoreError>,
    done: bool,
}

impl<'a> MergeCells<'a> {
    /// Primes the heap with the head of every source. Construction can fail
    /// if reading a head cell fails.
    pub fn new(sources: Vec<TableIter<'a>>) -> Result<Self> {
        let mut merge = Self {
            sources,
            heap: BinaryHeap::new(),
            pending: None,
            done: false,
        };
        for source in 0..merge.sources.len() {
            merge.advance(source)?;
        }
        Ok(merge)
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(cell) = self.sources[source].next() {
            self.heap.push(HeapEntry {
                cell: cell?,
                source,
            });
        }
        Ok(())
    }
}

impl Iterator for MergeCells<'_> {
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(e) = self.pending.take() {
            self.done = true;
            return Some(Err(e));
        }
        let entry = match self.heap.pop() {
            Some(entry) => entry,
            None => {
                self.done = true;
                return None;
            }
        };
        // Refill from the source that produced this cell; an error is held
        // back so the cell itself is still delivered.
        if let Err(e) = self.advance(entry.source) {
            self.pending = Some(e);
        }
        Some(Ok(entry.cell))
    }
}

/// Collapses runs of equal keys to their first cell, which the merge ordering
/// guarantees is the freshest.
pub struct CollapseFresh<'a> {
    inner: MergeCells<'a>,
    last_key: Option<Vec<u8>>,
}

impl<'a> CollapseFresh<'a> {
    pub fn new(inner: MergeCells<'a>) -> Self {
        Self {
            inner,
            last_key: None,
        }
    }
}

impl Iterator for CollapseFresh<'_> {
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let cell = match self.inner.next()? {
                Ok(cell) => cell,
                Err(e) => return Some(Err(e)),
            };
            if self.last_key.as_deref() == Some(cell.key.as_slice()) {
                continue;
            }
            self.last_key = Some(cell.key.clone());
            return Some(Ok(cell));
        }
    }
}
