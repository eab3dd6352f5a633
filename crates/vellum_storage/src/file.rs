//! Append-log file storage engine.

use crate::engine::{Storage, StorageTable, WalkBounds};
use crate::error::{StorageError, StorageResult};
use crate::memory::{collect_keys, run_walk, Keyspace};
use crate::record::{self, LogOp};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const LOCK_FILE: &str = "LOCK";
const LOG_EXTENSION: &str = "vlog";

/// A table persisted as an append-only log of put/remove records.
///
/// The full keyspace is indexed in memory; the log is replayed on open.
/// A torn tail left by a crash is truncated during replay.
///
/// # Durability
///
/// - `flush()` pushes buffered records to the OS
/// - `sync()` additionally calls `File::sync_data()`
pub struct LogTable {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    index: RwLock<Keyspace>,
    /// Records in the log that no longer describe a live key.
    garbage: AtomicU64,
}

impl LogTable {
    /// Opens or creates the log at `path`, replaying its records.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, truncated, or opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut buf = Vec::new();
        if path.exists() {
            File::open(path)?.read_to_end(&mut buf)?;
        }

        let mut index = Keyspace::new();
        let mut garbage = 0u64;
        let mut offset = 0usize;
        while let Some((entry, next)) = record::decode(&buf, offset) {
            let replaced = match entry.op {
                LogOp::Put => index.insert(entry.key.to_vec(), entry.value.to_vec()),
                LogOp::Remove => {
                    garbage += 1;
                    index.remove(entry.key)
                }
            };
            if replaced.is_some() {
                garbage += 1;
            }
            offset = next;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        if offset < buf.len() {
            warn!(
                path = %path.display(),
                valid = offset,
                total = buf.len(),
                "truncating torn tail of table log"
            );
            file.set_len(offset as u64)?;
        }
        debug!(path = %path.display(), keys = index.len(), "table log replayed");

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
            index: RwLock::new(index),
            garbage: AtomicU64::new(garbage),
        })
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of dead records a compaction would drop.
    #[must_use]
    pub fn garbage(&self) -> u64 {
        self.garbage.load(Ordering::Relaxed)
    }

    /// Appends one frame. The caller holds the writer lock until the index
    /// reflects the frame, so a compaction never drops it.
    fn append(
        writer: &mut BufWriter<File>,
        op: LogOp,
        key: &[u8],
        value: &[u8],
    ) -> StorageResult<()> {
        let mut frame = Vec::with_capacity(record::FRAME_OVERHEAD + key.len() + value.len());
        record::encode(op, key, value, &mut frame);
        writer.write_all(&frame)?;
        Ok(())
    }

    /// Rewrites the log so it holds exactly one record per live key.
    ///
    /// # Errors
    ///
    /// Returns an error if the new log cannot be written or swapped in.
    pub fn compact(&self) -> StorageResult<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;

        let index = self.index.read();
        let mut buf = Vec::new();
        for (k, v) in index.iter() {
            record::encode(LogOp::Put, k, v, &mut buf);
        }
        let tmp = self.path.with_extension("compact");
        {
            let mut out = File::create(&tmp)?;
            out.write_all(&buf)?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        *writer = BufWriter::new(file);
        self.garbage.store(0, Ordering::Relaxed);
        debug!(path = %self.path.display(), keys = index.len(), "table log compacted");
        Ok(())
    }

    fn flush_log(&self) -> StorageResult<()> {
        self.writer.lock().flush()?;
        Ok(())
    }

    fn sync_log(&self) -> StorageResult<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }
}

impl StorageTable for LogTable {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.index.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut writer = self.writer.lock();
        Self::append(&mut writer, LogOp::Put, key, value)?;
        if self
            .index
            .write()
            .insert(key.to_vec(), value.to_vec())
            .is_some()
        {
            self.garbage.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> StorageResult<()> {
        let mut writer = self.writer.lock();
        if !self.index.read().contains_key(key) {
            return Ok(());
        }
        Self::append(&mut writer, LogOp::Remove, key, &[])?;
        self.index.write().remove(key);
        self.garbage.fetch_add(2, Ordering::Relaxed);
        Ok(())
    }

    fn walk(
        &self,
        bounds: WalkBounds<'_>,
        handler: &mut dyn FnMut(&[u8]) -> bool,
    ) -> StorageResult<bool> {
        let keys = collect_keys(&self.index.read(), bounds);
        Ok(run_walk(keys, handler))
    }

    fn len(&self) -> usize {
        self.index.read().len()
    }
}

impl std::fmt::Debug for LogTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogTable")
            .field("path", &self.path)
            .field("keys", &self.len())
            .field("garbage", &self.garbage())
            .finish_non_exhaustive()
    }
}

/// A storage engine keeping one [`LogTable`] file per table in a directory.
///
/// The directory is locked with an advisory exclusive lock for as long as
/// the engine is open, so two processes cannot write the same tables.
///
/// # Example
///
/// ```no_run
/// use vellum_storage::{FileStorage, Storage};
/// use std::path::Path;
///
/// let storage = FileStorage::open(Path::new("data")).unwrap();
/// let table = storage.open_table("players").unwrap();
/// table.put(b"k", b"v").unwrap();
/// storage.sync().unwrap();
/// ```
pub struct FileStorage {
    dir: PathBuf,
    _lock: File,
    tables: RwLock<HashMap<String, Arc<LogTable>>>,
}

impl FileStorage {
    /// Opens the storage directory, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another process holds the directory, or an I/O
    /// error if it cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        lock.try_lock_exclusive()
            .map_err(|_| StorageError::Locked(dir.display().to_string()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            tables: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the concrete log table with the given name, if opened.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<Arc<LogTable>> {
        self.tables.read().get(name).cloned()
    }

    fn table_path(&self, name: &str) -> StorageResult<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidTableName(name.to_string()));
        }
        Ok(self.dir.join(name).with_extension(LOG_EXTENSION))
    }
}

impl Storage for FileStorage {
    fn open_table(&self, name: &str) -> StorageResult<Arc<dyn StorageTable>> {
        if let Some(table) = self.table(name) {
            return Ok(table);
        }
        let path = self.table_path(name)?;
        let mut tables = self.tables.write();
        if let Some(table) = tables.get(name) {
            return Ok(Arc::clone(table) as Arc<dyn StorageTable>);
        }
        let table = Arc::new(LogTable::open(&path)?);
        tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    fn flush(&self) -> StorageResult<()> {
        for table in self.tables.read().values() {
            table.flush_log()?;
        }
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        for table in self.tables.read().values() {
            table.sync_log()?;
        }
        Ok(())
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(dir = %self.dir.display(), error = %e, "failed to flush table logs on close");
        }
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("dir", &self.dir)
            .field("tables", &self.tables.read().len())
            .finish_non_exhaustive()
    }
}
