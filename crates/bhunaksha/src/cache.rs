//! Durable plot geometry cache.
//!
//! ## File format
//!
//! A single JSON array of flat [`PlotRecord`] objects. Each object carries
//! its own `giscode` and `plot_no`, so the key map is rebuilt on load.
//! Entries missing either key are skipped.
//!
//! ## Persistence
//!
//! The in-memory map is authoritative. [`GeometryCache::save`] snapshots it
//! under the map lock, releases the lock, then rewrites the whole file via
//! a temp file and rename. Concurrent saves are serialised by a separate
//! lock so workers can keep inserting while a save is in progress.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::plot_list::compare_plot_numbers;
use crate::types::{FieldMap, PlotKey, PlotRecord};

struct Inner {
    records: HashMap<PlotKey, PlotRecord>,
    /// Bumped on every insert.
    generation: u64,
}

/// Mapping from (giscode, plot number) to parsed plot records, backed by
/// one JSON file.
pub struct GeometryCache {
    path: PathBuf,
    auto_persist: bool,
    inner: Mutex<Inner>,
    /// Generation last written to disk.
    saved_generation: AtomicU64,
    persist_lock: Mutex<()>,
}

/// Lenient view of a stored entry. Anything unkeyable is dropped.
#[derive(Deserialize)]
struct StoredRecord {
    #[serde(alias = "gis_code")]
    giscode: Option<String>,
    #[serde(alias = "plotno")]
    plot_no: Option<String>,
    the_geom: Option<String>,
    #[serde(default)]
    parsed_records: Vec<FieldMap>,
    #[serde(default)]
    report_url: Option<String>,
}

impl StoredRecord {
    fn into_record(self) -> Option<PlotRecord> {
        let giscode = self.giscode.filter(|s| !s.is_empty())?;
        let plot_no = self.plot_no.filter(|s| !s.is_empty())?;
        Some(PlotRecord {
            giscode,
            plot_no,
            the_geom: self.the_geom?,
            parsed_records: self.parsed_records,
            report_url: self.report_url,
        })
    }
}

impl GeometryCache {
    /// Open the cache at `path`, creating its directory and loading any
    /// existing file.
    ///
    /// Fails only if the directory cannot be created. An unreadable or
    /// corrupt file is logged and the cache starts empty.
    pub fn open(path: impl Into<PathBuf>, auto_persist: bool) -> EngineResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| EngineError::cache_io(parent, e))?;
        }

        let cache = Self {
            path,
            auto_persist,
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                generation: 0,
            }),
            saved_generation: AtomicU64::new(0),
            persist_lock: Mutex::new(()),
        };
        cache.load();
        Ok(cache)
    }

    /// Read a cache file into a key map without touching any instance.
    ///
    /// A missing file is an empty map.
    pub fn read_file(path: &Path) -> EngineResult<HashMap<PlotKey, PlotRecord>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(EngineError::cache_io(path, e)),
        };

        let entries: Vec<Value> = serde_json::from_slice(&data)
            .map_err(|e| EngineError::Parse(format!("{}: {e}", path.display())))?;
        let total = entries.len();

        let map: HashMap<PlotKey, PlotRecord> = entries
            .into_iter()
            .filter_map(|v| serde_json::from_value::<StoredRecord>(v).ok())
            .filter_map(StoredRecord::into_record)
            .map(|r| (r.key(), r))
            .collect();

        if map.len() < total {
            tracing::debug!(
                "Skipped {} unkeyable or duplicate cache entries in {}",
                total - map.len(),
                path.display()
            );
        }
        Ok(map)
    }

    /// Merge the on-disk file into memory. Records already in memory win.
    ///
    /// Returns the number of entries added.
    pub fn load(&self) -> usize {
        let loaded = match Self::read_file(&self.path) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!("Failed to load plot cache, starting empty: {e}");
                return 0;
            }
        };

        let mut inner = self.lock();
        let mut added = 0;
        for (key, record) in loaded {
            if let std::collections::hash_map::Entry::Vacant(slot) = inner.records.entry(key) {
                slot.insert(record);
                added += 1;
            }
        }
        tracing::info!(
            "Loaded {added} cached plots from {} ({} total in memory)",
            self.path.display(),
            inner.records.len()
        );
        added
    }

    pub fn get(&self, key: &PlotKey) -> Option<PlotRecord> {
        self.lock().records.get(key).cloned()
    }

    pub fn contains(&self, key: &PlotKey) -> bool {
        self.lock().records.contains_key(key)
    }

    /// Insert a record. An existing record for the same key is kept as is.
    ///
    /// Returns whether the record was newly inserted. Persistence is left to
    /// the caller; see [`GeometryCache::auto_persist`].
    pub fn put(&self, key: PlotKey, record: PlotRecord) -> bool {
        let mut inner = self.lock();
        if inner.records.contains_key(&key) {
            return false;
        }
        inner.records.insert(key, record);
        inner.generation += 1;
        true
    }

    /// Every cached plot of one village, in the same order as
    /// [`crate::sort_plot_numbers`].
    pub fn records_for(&self, giscode: &str) -> Vec<PlotRecord> {
        let mut records: Vec<PlotRecord> = self
            .lock()
            .records
            .values()
            .filter(|r| r.giscode == giscode)
            .cloned()
            .collect();
        records.sort_by(|a, b| compare_plot_numbers(&a.plot_no, &b.plot_no));
        records
    }

    /// Rewrite the cache file with the full current map.
    ///
    /// On failure the in-memory map is untouched and stays dirty.
    pub fn save(&self) -> EngineResult<usize> {
        let _persist = self
            .persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (mut records, generation) = {
            let inner = self.lock();
            let records: Vec<PlotRecord> = inner.records.values().cloned().collect();
            (records, inner.generation)
        };
        records.sort_by(|a, b| a.key().cmp(&b.key()));

        let tmp_path = self.path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let file = fs::File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &records)?;
            writer.flush()?;
            fs::rename(&tmp_path, &self.path)
        };
        write().map_err(|e| EngineError::cache_io(&self.path, e))?;

        self.saved_generation.fetch_max(generation, Ordering::SeqCst);
        tracing::debug!(
            "Saved {} plots to {}",
            records.len(),
            self.path.display()
        );
        Ok(records.len())
    }

    /// Save off the async runtime's worker threads.
    pub async fn save_async(self: &Arc<Self>) -> EngineResult<usize> {
        let cache = Arc::clone(self);
        tokio::task::spawn_blocking(move || cache.save())
            .await
            .map_err(|e| EngineError::cache_io(&self.path, std::io::Error::other(e)))?
    }

    /// Save only if there are writes not yet on disk.
    pub fn flush(&self) -> EngineResult<Option<usize>> {
        if !self.is_dirty() {
            return Ok(None);
        }
        self.save().map(Some)
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().generation > self.saved_generation.load(Ordering::SeqCst)
    }

    /// Whether every new record should be written through to disk.
    pub fn auto_persist(&self) -> bool {
        self.auto_persist
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(giscode: &str, plot_no: &str) -> PlotRecord {
        PlotRecord {
            giscode: giscode.to_string(),
            plot_no: plot_no.to_string(),
            the_geom: "POLYGON((0 0,1 0,1 1,0 1,0 0))".to_string(),
            parsed_records: vec![[("Owner", "X")].into_iter().collect()],
            report_url: Some("/api/report?id=1".to_string()),
        }
    }

    #[test]
    fn test_put_get_and_immutability() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GeometryCache::open(dir.path().join("cache.json"), false).unwrap();

        let first = record("RVM01", "1");
        assert!(cache.put(first.key(), first.clone()));

        let mut second = record("RVM01", "1");
        second.the_geom = "POLYGON((5 5,6 5,6 6,5 5))".to_string();
        assert!(!cache.put(second.key(), second));

        assert_eq!(cache.get(&first.key()), Some(first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = GeometryCache::open(&path, false).unwrap();
        for plot in ["1", "2", "10"] {
            let r = record("RVM01", plot);
            cache.put(r.key(), r);
        }
        assert_eq!(cache.save().unwrap(), 3);

        let reopened = GeometryCache::open(&path, false).unwrap();
        assert_eq!(reopened.len(), 3);
        let original = GeometryCache::read_file(&path).unwrap();
        for (key, value) in &original {
            assert_eq!(reopened.get(key).as_ref(), Some(value));
        }
    }

    #[test]
    fn test_load_skips_unkeyable_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(
            &path,
            r#"[
                {"giscode": "RVM01", "plot_no": "1", "the_geom": "POLYGON((0 0,1 0,1 1,0 0))"},
                {"plot_no": "2", "the_geom": "POLYGON((0 0,1 0,1 1,0 0))"},
                {"giscode": "RVM01", "the_geom": "POLYGON((0 0,1 0,1 1,0 0))"},
                {"giscode": "RVM01", "plotno": "3", "the_geom": "POLYGON((0 0,1 0,1 1,0 0))", "extra": 1},
                "garbage"
            ]"#,
        )
        .unwrap();

        let map = GeometryCache::read_file(&path).unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key(&PlotKey {
            giscode: "RVM01".into(),
            plot_no: "3".into()
        }));
    }

    #[test]
    fn test_corrupt_file_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{ not json").unwrap();

        let cache = GeometryCache::open(&path, false).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("cache.json");
        let cache = GeometryCache::open(&path, true).unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(cache.auto_persist());
    }

    #[test]
    fn test_flush_tracks_dirty_state() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GeometryCache::open(dir.path().join("cache.json"), false).unwrap();
        assert_eq!(cache.flush().unwrap(), None);

        let r = record("RVM01", "1");
        cache.put(r.key(), r);
        assert!(cache.is_dirty());
        assert_eq!(cache.flush().unwrap(), Some(1));
        assert!(!cache.is_dirty());
        assert_eq!(cache.flush().unwrap(), None);
    }

    #[test]
    fn test_records_for_village() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GeometryCache::open(dir.path().join("cache.json"), false).unwrap();
        for (g, p) in [("RVM01", "10"), ("RVM01", "2"), ("RVM01", "1"), ("RVM02", "1")] {
            let r = record(g, p);
            cache.put(r.key(), r);
        }
        let plots: Vec<String> = cache
            .records_for("RVM01")
            .into_iter()
            .map(|r| r.plot_no)
            .collect();
        assert_eq!(plots, vec!["1", "2", "10"]);
    }

    #[test]
    fn test_concurrent_puts_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(GeometryCache::open(dir.path().join("cache.json"), false).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let r = record("RVM01", &format!("{t}-{i}"));
                        cache.put(r.key(), r);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 400);
    }
}
