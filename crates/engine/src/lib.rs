//! # Engine
//!
//! The LSM orchestrator for the SiltKV storage engine.
//!
//! Writes land in a [`memtable::MemTable`]; once its tracked byte size
//! exceeds the flush threshold it is serialized as a new [`sstable::SSTable`]
//! generation and replaced with a fresh buffer. Reads merge the memtable with
//! every on-disk generation (newest first), collapse each key to its freshest
//! entry, drop tombstones, and yield live [`Record`]s in ascending key order.
//!
//! A store is single-writer by contract; `&mut self` on every mutating
//! operation makes that contract a compile-time fact.
//!
//! ## Example
//! ```no_run
//! use engine::LsmStore;
//!
//! let mut store = LsmStore::open("./data", 1 << 20)?;
//! store.upsert(b"k".to_vec(), b"v".to_vec())?;
//! for record in store.iterator(b"")? {
//!     let record = record?;
//!     println!("{:?} -> {:?}", record.key, record.payload);
//! }
//! store.close()?;
//! # Ok::<(), engine::StoreError>(())
//! ```

mod error;
mod merge;
mod table;

pub use error::{Result, StoreError};
pub use merge::{CollapseFresh, MergeCells};
pub use table::{Table, TableIter};

use memtable::{Cell, Clock, MemTable};
use sstable::{SSTable, SSTableWriter};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DATA_SUFFIX: &str = "dat";
const TEMP_SUFFIX: &str = "tmp";

/// The external view of a live key: no timestamps, no tombstones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

/// An embedded, ordered key–value store over one directory of sorted runs.
pub struct LsmStore {
    storage_dir: PathBuf,
    flush_threshold: u64,
    mem: Table,
    tables: BTreeMap<u64, Table>,
    next_generation: u64,
    clock: Clock,
}

impl LsmStore {
    /// Opens a store rooted at `storage_dir`, flushing the write buffer once
    /// its tracked size strictly exceeds `flush_threshold` bytes.
    ///
    /// The directory must already exist. Files named `{generation}.dat` are
    /// opened as sorted runs; per-file failures (unreadable, truncated,
    /// inconsistent footer) are logged and skipped rather than failing the
    /// open. Everything else, stale `.tmp` files from interrupted flushes
    /// included, is ignored.
    pub fn open<P: AsRef<Path>>(storage_dir: P, flush_threshold: u64) -> Result<Self> {
        Self::open_with_clock(storage_dir, flush_threshold, memtable::wall_clock_millis)
    }

    /// [`open`](LsmStore::open) with an injected timestamp supplier. The
    /// supplier must be monotonically nondecreasing and never return zero.
    pub fn open_with_clock<P: AsRef<Path>>(
        storage_dir: P,
        flush_threshold: u64,
        clock: Clock,
    ) -> Result<Self> {
        assert!(flush_threshold > 0, "flush threshold must be positive");
        let storage_dir = storage_dir.as_ref().to_path_buf();

        let mut tables = BTreeMap::new();
        let mut next_generation = 0u64;
        for entry in fs::read_dir(&storage_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DATA_SUFFIX) {
                continue;
            }
            let Some(generation) = parse_generation(&path) else {
                debug!(file = %path.display(), "ignoring data file with non-generation name");
                continue;
            };
            // A skipped file still claims its generation number, so a later
            // flush can never rename over it.
            next_generation = next_generation.max(generation + 1);
            match SSTable::open(&path) {
                Ok(sst) => {
                    tables.insert(generation, Table::Disk(sst));
                }
                Err(e) => warn!(file = %path.display(), error = %e, "skipping unreadable sstable"),
            }
        }
        info!(
            dir = %storage_dir.display(),
            generations = tables.len(),
            next_generation,
            "opened store"
        );

        Ok(Self {
            storage_dir,
            flush_threshold,
            mem: Table::Mem(MemTable::with_clock(clock)),
            tables,
            next_generation,
            clock,
        })
    }

    /// Inserts or replaces `key`, flushing if the buffer overflows.
    pub fn upsert(&mut self, key: Vec<u8>, payload: Vec<u8>) -> Result<()> {
        self.mem.upsert(key, payload)?;
        if self.mem.size_in_bytes() > self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Records a deletion of `key`, flushing if the buffer overflows.
    ///
    /// The tombstone itself occupies buffer space, so a removal can trigger a
    /// flush like any other write.
    pub fn remove(&mut self, key: Vec<u8>) -> Result<()> {
        self.mem.remove(key)?;
        if self.mem.size_in_bytes() > self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Streams live records with key ≥ `from` in ascending key order.
    ///
    /// The scan merges the write buffer with every on-disk generation,
    /// newest first, keeps the freshest entry per key, and drops tombstones.
    /// An I/O error is yielded once, after which the scan is exhausted;
    /// records already yielded remain valid.
    pub fn iterator(&self, from: &[u8]) -> Result<Scan<'_>> {
        Ok(Scan {
            inner: self.merged(from)?,
            done: false,
        })
    }

    /// Merges every generation plus the memtable into a single new run.
    ///
    /// The merged-and-collapsed live view is serialized to a temporary file;
    /// every published run is then closed and deleted, the new run is renamed
    /// to generation 0, and the store resumes with a single generation and an
    /// empty buffer. Tombstones are dropped here: nothing older survives the
    /// same operation, so there is no shadowed state left to resurrect.
    pub fn compact(&mut self) -> Result<()> {
        let temp = self.table_path(self.next_generation, TEMP_SUFFIX);

        let mut cells: Vec<Cell> = Vec::new();
        for cell in self.merged(b"")? {
            let cell = cell?;
            if !cell.value.is_removed() {
                cells.push(cell);
            }
        }
        let rows = cells.len() as u32;
        SSTableWriter::write(&temp, cells, rows)?;

        for (generation, table) in std::mem::take(&mut self.tables) {
            table.close()?;
            fs::remove_file(self.table_path(generation, DATA_SUFFIX))?;
        }

        let dest = self.table_path(0, DATA_SUFFIX);
        fs::rename(&temp, &dest)?;
        let sst = SSTable::open(&dest)?;
        info!(rows, bytes = sst.file_size(), "compacted into generation 0");

        self.tables = BTreeMap::from([(0, Table::Disk(sst))]);
        self.next_generation = 1;
        self.mem = Table::Mem(MemTable::with_clock(self.clock));
        Ok(())
    }

    /// Flushes a nonempty buffer, then releases every file handle.
    ///
    /// Every handle is released even when an intermediate step fails; the
    /// first error is surfaced and the rest are logged.
    pub fn close(mut self) -> Result<()> {
        let mut first_err = None;
        if !self.mem.is_empty() {
            if let Err(e) = self.flush() {
                warn!(error = %e, "flush on close failed");
                first_err = Some(e);
            }
        }
        for (generation, table) in std::mem::take(&mut self.tables) {
            if let Err(e) = table.close() {
                warn!(generation, error = %e, "closing sstable failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Serializes the write buffer as the next generation and replaces it
    /// with a fresh one.
    ///
    /// The run is written to `{generation}.tmp` and atomically renamed to
    /// `{generation}.dat`; a sorted run becomes visible only as a complete
    /// file, never partially.
    fn flush(&mut self) -> Result<()> {
        let generation = self.next_generation;
        let temp = self.table_path(generation, TEMP_SUFFIX);

        let Table::Mem(mem) = &self.mem else {
            return Err(StoreError::NotSupported("flush"));
        };
        SSTableWriter::write(&temp, mem.iter(b""), mem.len() as u32)?;

        let dest = self.table_path(generation, DATA_SUFFIX);
        fs::rename(&temp, &dest)?;

        let sst = SSTable::open(&dest)?;
        debug!(generation, rows = sst.rows(), bytes = sst.file_size(), "flushed write buffer");
        self.tables.insert(generation, Table::Disk(sst));
        self.mem = Table::Mem(MemTable::with_clock(self.clock));
        self.next_generation += 1;
        Ok(())
    }

    /// The collapsed merge of the memtable and every generation, newest
    /// first, tombstones still included.
    fn merged(&self, from: &[u8]) -> Result<CollapseFresh<'_>> {
        let mut sources = Vec::with_capacity(self.tables.len() + 1);
        sources.push(self.mem.iter(from)?);
        for table in self.tables.values().rev() {
            sources.push(table.iter(from)?);
        }
        Ok(CollapseFresh::new(MergeCells::new(sources)?))
    }

    fn table_path(&self, generation: u64, suffix: &str) -> PathBuf {
        self.storage_dir.join(format!("{generation}.{suffix}"))
    }
}

/// Parses `{generation}.dat` file names: pure digits, no leading zeros.
fn parse_generation(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if stem != "0" && stem.starts_with('0') {
        return None;
    }
    stem.parse().ok()
}

/// Streaming scan over live records, produced by [`LsmStore::iterator`].
pub struct Scan<'a> {
    inner: CollapseFresh<'a>,
    done: bool,
}

impl Iterator for Scan<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let cell = match self.inner.next()? {
                Ok(cell) => cell,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            let Cell { key, value } = cell;
            match value.into_payload() {
                Some(payload) => return Some(Ok(Record { key, payload })),
                None => continue, // tombstone
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
    use tempfile::{tempdir, TempDir};

    fn tick() -> u64 {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        NEXT.fetch_add(1, AtomicOrdering::Relaxed)
    }

    fn open(dir: &TempDir, threshold: u64) -> Result<LsmStore> {
        Ok(LsmStore::open_with_clock(dir.path(), threshold, tick)?)
    }

    fn scan(store: &LsmStore, from: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let records: Vec<Record> = store.iterator(from)?.collect::<crate::Result<_>>()?;
        Ok(records.into_iter().map(|r| (r.key, r.payload)).collect())
    }

    fn pairs(expected: &[(&[u8], &[u8])]) -> Vec<(Vec<u8>, Vec<u8>)> {
        expected
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect()
    }

    fn dat_files(dir: &TempDir) -> Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".dat"))
            .collect();
        names.sort();
        Ok(names)
    }

    // -------------------- End-to-end scenarios --------------------

    #[test]
    fn scan_over_fresh_writes() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1 << 20)?;
        store.upsert(b"a".to_vec(), b"1".to_vec())?;
        store.upsert(b"b".to_vec(), b"2".to_vec())?;
        assert_eq!(scan(&store, b"")?, pairs(&[(b"a", b"1"), (b"b", b"2")]));
        Ok(())
    }

    #[test]
    fn second_upsert_wins() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1 << 20)?;
        store.upsert(b"a".to_vec(), b"1".to_vec())?;
        store.upsert(b"a".to_vec(), b"2".to_vec())?;
        assert_eq!(scan(&store, b"")?, pairs(&[(b"a", b"2")]));
        Ok(())
    }

    #[test]
    fn remove_hides_key() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1 << 20)?;
        store.upsert(b"a".to_vec(), b"1".to_vec())?;
        store.remove(b"a".to_vec())?;
        assert_eq!(scan(&store, b"")?, pairs(&[]));
        Ok(())
    }

    #[test]
    fn tiny_threshold_flushes_every_write() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1)?;
        store.upsert(b"c".to_vec(), b"3".to_vec())?;
        store.upsert(b"a".to_vec(), b"1".to_vec())?;
        store.upsert(b"b".to_vec(), b"2".to_vec())?;

        assert_eq!(
            scan(&store, b"")?,
            pairs(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")])
        );
        assert_eq!(dat_files(&dir)?, vec!["0.dat", "1.dat", "2.dat"]);
        Ok(())
    }

    #[test]
    fn remove_shadows_flushed_value_and_survives_reopen() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1)?;
        store.upsert(b"c".to_vec(), b"3".to_vec())?;
        store.upsert(b"a".to_vec(), b"1".to_vec())?;
        store.upsert(b"b".to_vec(), b"2".to_vec())?;
        store.remove(b"b".to_vec())?;
        assert_eq!(scan(&store, b"")?, pairs(&[(b"a", b"1"), (b"c", b"3")]));

        store.close()?;
        let store = open(&dir, 1)?;
        assert_eq!(scan(&store, b"")?, pairs(&[(b"a", b"1"), (b"c", b"3")]));
        Ok(())
    }

    #[test]
    fn compact_leaves_single_generation() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1)?;
        store.upsert(b"c".to_vec(), b"3".to_vec())?;
        store.upsert(b"a".to_vec(), b"1".to_vec())?;
        store.upsert(b"b".to_vec(), b"2".to_vec())?;
        store.remove(b"b".to_vec())?;
        store.close()?;

        let mut store = open(&dir, 1)?;
        store.compact()?;
        assert_eq!(dat_files(&dir)?, vec!["0.dat"]);
        assert_eq!(scan(&store, b"")?, pairs(&[(b"a", b"1"), (b"c", b"3")]));
        Ok(())
    }

    // -------------------- Merged reads --------------------

    #[test]
    fn compact_merges_buffer_and_every_generation() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1)?;
        store.upsert(b"a".to_vec(), b"disk-a".to_vec())?; // flushed
        store.upsert(b"b".to_vec(), b"disk-b".to_vec())?; // flushed
        store.close()?;

        // Keys only on disk must survive a compaction triggered while the
        // buffer holds unrelated fresh writes.
        let mut store = open(&dir, 1 << 20)?;
        store.upsert(b"c".to_vec(), b"mem-c".to_vec())?;
        store.compact()?;

        assert_eq!(dat_files(&dir)?, vec!["0.dat"]);
        assert_eq!(
            scan(&store, b"")?,
            pairs(&[(b"a", b"disk-a"), (b"b", b"disk-b"), (b"c", b"mem-c")])
        );
        Ok(())
    }

    #[test]
    fn freshest_generation_shadows_older() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1)?;
        store.upsert(b"k".to_vec(), b"v1".to_vec())?; // generation 0
        store.upsert(b"k".to_vec(), b"v2".to_vec())?; // generation 1
        store.upsert(b"k".to_vec(), b"v3".to_vec())?; // generation 2
        assert_eq!(scan(&store, b"")?, pairs(&[(b"k", b"v3")]));
        Ok(())
    }

    #[test]
    fn buffer_shadows_disk() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1)?;
        store.upsert(b"k".to_vec(), b"disk".to_vec())?; // flushed
        store.close()?;

        let mut store = open(&dir, 1 << 20)?;
        store.upsert(b"k".to_vec(), b"mem".to_vec())?; // buffered only
        assert_eq!(scan(&store, b"")?, pairs(&[(b"k", b"mem")]));
        Ok(())
    }

    #[test]
    fn scan_from_is_lower_bound_across_tables() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1)?;
        store.upsert(b"aa".to_vec(), b"1".to_vec())?;
        store.upsert(b"ab".to_vec(), b"2".to_vec())?;
        store.close()?;

        let mut store = open(&dir, 1 << 20)?;
        store.upsert(b"b".to_vec(), b"3".to_vec())?;
        assert_eq!(scan(&store, b"ab")?, pairs(&[(b"ab", b"2"), (b"b", b"3")]));
        assert_eq!(scan(&store, b"abc")?, pairs(&[(b"b", b"3")]));
        assert_eq!(scan(&store, b"zz")?, pairs(&[]));
        Ok(())
    }

    #[test]
    fn scan_on_empty_store() -> Result<()> {
        let dir = tempdir()?;
        let store = open(&dir, 1 << 20)?;
        assert_eq!(scan(&store, b"")?, pairs(&[]));
        Ok(())
    }

    // -------------------- Open / recovery --------------------

    #[test]
    fn open_resumes_generation_counter() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1)?;
        store.upsert(b"a".to_vec(), b"1".to_vec())?; // 0.dat
        store.upsert(b"b".to_vec(), b"2".to_vec())?; // 1.dat
        store.close()?;

        let mut store = open(&dir, 1)?;
        store.upsert(b"c".to_vec(), b"3".to_vec())?; // must become 2.dat
        assert_eq!(dat_files(&dir)?, vec!["0.dat", "1.dat", "2.dat"]);
        Ok(())
    }

    #[test]
    fn open_skips_malformed_and_foreign_files() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("0.dat"), b"xy")?; // shorter than footer
        std::fs::write(dir.path().join("junk.dat"), b"not a generation")?;
        std::fs::write(dir.path().join("07.dat"), b"leading zero")?;
        std::fs::write(dir.path().join("3.tmp"), b"stale flush")?;
        std::fs::write(dir.path().join("notes.txt"), b"ignored")?;

        let mut store = open(&dir, 1 << 20)?;
        assert_eq!(scan(&store, b"")?, pairs(&[]));

        // the skipped 0.dat must not block generation 1 onwards
        store.upsert(b"a".to_vec(), b"1".to_vec())?;
        store.close()?;
        let store = open(&dir, 1 << 20)?;
        assert_eq!(scan(&store, b"")?, pairs(&[(b"a", b"1")]));
        Ok(())
    }

    #[test]
    fn close_flushes_buffered_writes() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1 << 20)?;
        store.upsert(b"a".to_vec(), b"1".to_vec())?;
        assert_eq!(dat_files(&dir)?, Vec::<String>::new());
        store.close()?;
        assert_eq!(dat_files(&dir)?, vec!["0.dat"]);
        Ok(())
    }

    #[test]
    fn close_of_empty_store_writes_nothing() -> Result<()> {
        let dir = tempdir()?;
        let store = open(&dir, 1 << 20)?;
        store.close()?;
        assert_eq!(dat_files(&dir)?, Vec::<String>::new());
        Ok(())
    }

    // -------------------- Flush transparency --------------------

    #[test]
    fn threshold_does_not_change_observed_state() -> Result<()> {
        let ops: &[(&[u8], Option<&[u8]>)] = &[
            (b"a", Some(b"1")),
            (b"b", Some(b"2")),
            (b"a", Some(b"3")),
            (b"c", Some(b"4")),
            (b"b", None),
            (b"d", Some(b"5")),
            (b"d", None),
            (b"d", Some(b"6")),
        ];

        let mut views = Vec::new();
        for threshold in [1u64, 4, u64::MAX] {
            let dir = tempdir()?;
            let mut store = open(&dir, threshold)?;
            for (key, op) in ops {
                match op {
                    Some(payload) => store.upsert(key.to_vec(), payload.to_vec())?,
                    None => store.remove(key.to_vec())?,
                }
            }
            views.push(scan(&store, b"")?);
        }

        assert_eq!(views[0], pairs(&[(b"a", b"3"), (b"c", b"4"), (b"d", b"6")]));
        assert_eq!(views[0], views[1]);
        assert_eq!(views[0], views[2]);
        Ok(())
    }

    #[test]
    fn compact_on_empty_store() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1 << 20)?;
        store.compact()?;
        assert_eq!(dat_files(&dir)?, vec!["0.dat"]);
        assert_eq!(scan(&store, b"")?, pairs(&[]));
        Ok(())
    }

    #[test]
    fn compact_then_write_resumes_at_generation_one() -> Result<()> {
        let dir = tempdir()?;
        let mut store = open(&dir, 1)?;
        store.upsert(b"a".to_vec(), b"1".to_vec())?;
        store.upsert(b"b".to_vec(), b"2".to_vec())?;
        store.compact()?;
        store.upsert(b"c".to_vec(), b"3".to_vec())?;
        assert_eq!(dat_files(&dir)?, vec!["0.dat", "1.dat"]);
        assert_eq!(
            scan(&store, b"")?,
            pairs(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")])
        );
        Ok(())
    }

    // -------------------- Misc --------------------

    #[test]
    fn parse_generation_accepts_canonical_names_only() {
        let gen = |name: &str| parse_generation(Path::new(name));
        assert_eq!(gen("0.dat"), Some(0));
        assert_eq!(gen("17.dat"), Some(17));
        assert_eq!(gen("007.dat"), None);
        assert_eq!(gen("-1.dat"), None);
        assert_eq!(gen("+1.dat"), None);
        assert_eq!(gen("1x.dat"), None);
        assert_eq!(gen(".dat"), None);
    }

    #[test]
    #[should_panic(expected = "flush threshold must be positive")]
    fn zero_threshold_is_rejected() {
        let dir = tempdir().unwrap();
        let _ = LsmStore::open(dir.path(), 0);
    }
}
