//! # MemTable
//!
//! An in-memory, sorted, mutable write buffer for the SiltKV storage engine.
//!
//! The memtable is the first point of contact for every write operation. It
//! buffers recent upserts and deletes in a sorted structure (`BTreeMap`)
//! before the engine flushes them to an immutable on-disk SSTable.
//!
//! ## Key properties
//! - **Sorted order**: entries are always in ascending key order (required for
//!   SSTable flush and for merged range scans).
//! - **Timestamped**: every write is stamped with milliseconds from an
//!   injectable clock; the freshest timestamp wins when runs are merged.
//! - **Tombstone support**: deletes are recorded as `Value` entries with no
//!   payload and shadow older values during reads.
//! - **Byte-accurate size tracking**: tracks key + payload bytes so the engine
//!   can decide when to flush.
//!
//! ## Example
//! ```rust
//! use memtable::MemTable;
//!
//! let mut m = MemTable::new();
//! m.upsert(b"hello".to_vec(), b"world".to_vec());
//! assert_eq!(m.len(), 1);
//!
//! m.remove(b"hello".to_vec());
//! assert_eq!(m.len(), 1); // the tombstone stays until flush
//! ```

use std::cmp::Ordering;
use std::collections::btree_map::Range;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond timestamp supplier.
///
/// Must be monotonically nondecreasing across calls within a process and must
/// never return zero (the on-disk encoding reuses the sign bit to tag
/// tombstones). Tests inject a deterministic counter here.
pub type Clock = fn() -> u64;

/// Default [`Clock`]: wall-clock milliseconds since the Unix epoch.
pub fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(1, |d| d.as_millis() as u64)
        .max(1)
}

/// A timestamped payload: live bytes or a tombstone.
///
/// `payload == Some(bytes)` is a live value; `payload == None` records a
/// deletion. Tombstones are retained in the memtable and written to SSTables
/// so that older values in older generations are correctly shadowed during
/// reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    timestamp: u64,
    payload: Option<Vec<u8>>,
}

impl Value {
    /// Creates a live value stamped at `timestamp`.
    pub fn live(timestamp: u64, payload: Vec<u8>) -> Self {
        debug_assert!(timestamp > 0, "timestamps must be strictly positive");
        Self {
            timestamp,
            payload: Some(payload),
        }
    }

    /// Creates a deletion marker stamped at `timestamp`.
    pub fn tombstone(timestamp: u64) -> Self {
        debug_assert!(timestamp > 0, "timestamps must be strictly positive");
        Self {
            timestamp,
            payload: None,
        }
    }

    /// Returns `true` if this value records a deletion.
    pub fn is_removed(&self) -> bool {
        self.payload.is_none()
    }

    /// Milliseconds stamped at write time; breaks ties between entries with
    /// equal keys (larger wins).
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The live bytes, or `None` for a tombstone.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Consumes the value, returning the live bytes if any.
    pub fn into_payload(self) -> Option<Vec<u8>> {
        self.payload
    }
}

/// A `(key, Value)` pair, the unit flowing through the merge path and into
/// SSTable serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub key: Vec<u8>,
    pub value: Value,
}

impl Cell {
    pub fn new(key: Vec<u8>, value: Value) -> Self {
        debug_assert!(!key.is_empty(), "keys must be nonempty");
        Self { key, value }
    }

    /// Canonical merge ordering: ascending by key, then descending by
    /// timestamp, so that of two cells sharing a key the fresher sorts first.
    pub fn freshness_cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.value.timestamp().cmp(&self.value.timestamp()))
    }
}

/// An ordered, in-memory write buffer backed by a `BTreeMap`.
///
/// Tracks the exact byte size of keys + payloads (a tombstone contributes only
/// its key) so the engine can flush once a threshold is exceeded. The counter
/// is deterministic and testable; it does not model `BTreeMap` node overhead.
#[derive(Debug)]
pub struct MemTable {
    map: BTreeMap<Vec<u8>, Value>,
    size_in_bytes: u64,
    clock: Clock,
}

impl MemTable {
    /// Creates an empty memtable stamped by the wall clock.
    pub fn new() -> Self {
        Self::with_clock(wall_clock_millis)
    }

    /// Creates an empty memtable with an injected timestamp supplier.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            map: BTreeMap::new(),
            size_in_bytes: 0,
            clock,
        }
    }

    /// Inserts or replaces `key` with a live value stamped now.
    ///
    /// Size delta: a new key adds `key.len() + payload.len()`; replacing a
    /// live entry adds `payload.len() - previous.len()`; replacing a tombstone
    /// adds `payload.len()`.
    pub fn upsert(&mut self, key: Vec<u8>, payload: Vec<u8>) {
        let key_len = key.len() as u64;
        let payload_len = payload.len() as u64;
        let previous = self.map.insert(key, Value::live((self.clock)(), payload));
        match previous {
            None => self.size_in_bytes += key_len + payload_len,
            Some(prev) => {
                let prev_len = prev.payload().map_or(0, |p| p.len() as u64);
                self.size_in_bytes = self.size_in_bytes + payload_len - prev_len;
            }
        }
    }

    /// Installs a tombstone for `key` stamped now.
    ///
    /// Size delta: a new key adds `key.len()`; replacing a live entry
    /// subtracts the previous payload length; replacing a tombstone is free.
    pub fn remove(&mut self, key: Vec<u8>) {
        let key_len = key.len() as u64;
        let previous = self.map.insert(key, Value::tombstone((self.clock)()));
        match previous {
            None => self.size_in_bytes += key_len,
            Some(prev) => {
                if let Some(p) = prev.payload() {
                    self.size_in_bytes -= p.len() as u64;
                }
            }
        }
    }

    /// Returns a cursor over cells in ascending key order, starting at the
    /// first key ≥ `from`. Tombstones are included. Restart by constructing a
    /// new iterator.
    pub fn iter(&self, from: &[u8]) -> MemTableIter<'_> {
        MemTableIter {
            inner: self
                .map
                .range::<[u8], _>((Bound::Included(from), Bound::Unbounded)),
        }
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the memtable contains zero entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Tracked bytes: Σ `key.len() + payload.len()` over entries, where a
    /// tombstone contributes only its key.
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward cursor over a [`MemTable`], yielding owned [`Cell`]s.
pub struct MemTableIter<'a> {
    inner: Range<'a, Vec<u8>, Value>,
}

impl Iterator for MemTableIter<'_> {
    type Item = Cell;

    fn next(&mut self) -> Option<Cell> {
        self.inner
            .next()
            .map(|(key, value)| Cell::new(key.clone(), value.clone()))
    }
}
