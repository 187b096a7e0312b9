use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::records::EntityKind;
use crate::error::{DbError, DbResult};

/// RocksDB-backed storage engine.
///
/// All entity rows live in the default column family under `<kind>:<id>`
/// keys with JSON values. Writers serialize through `write_lock` and commit
/// one `WriteBatch` per transaction, so a multi-row mutation lands atomically
/// or not at all. Readers go straight to RocksDB.
#[derive(Clone)]
pub struct StorageEngine {
    db: Arc<DB>,
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("path", &self.path)
            .finish()
    }
}

fn record_key(kind: EntityKind, id: &str) -> Vec<u8> {
    format!("{}:{}", kind.prefix(), id).into_bytes()
}

impl StorageEngine {
    /// Open (or create) the store at `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> DbResult<Self> {
        let path = data_dir.as_ref().to_path_buf();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        // Keep WAL growth bounded; entity rows are small
        opts.set_max_total_wal_size(50 * 1024 * 1024);
        opts.set_keep_log_file_num(5);

        let db = DB::open(&opts, &path)
            .map_err(|e| DbError::StorageError(format!("Failed to open RocksDB: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
            path,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.path
    }

    /// Read one record, deserialized.
    pub fn get<T: DeserializeOwned>(&self, kind: EntityKind, id: &str) -> DbResult<Option<T>> {
        match self.db.get(record_key(kind, id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read every record of a kind, in key order.
    pub fn list<T: DeserializeOwned>(&self, kind: EntityKind) -> DbResult<Vec<T>> {
        let prefix = format!("{}:", kind.prefix());
        let iter = self.db.iterator(IteratorMode::From(
            prefix.as_bytes(),
            Direction::Forward,
        ));

        let mut records = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    /// Count the records of a kind.
    pub fn count(&self, kind: EntityKind) -> usize {
        let prefix = format!("{}:", kind.prefix());
        let iter = self.db.iterator(IteratorMode::From(
            prefix.as_bytes(),
            Direction::Forward,
        ));

        let mut count = 0;
        for item in iter {
            match item {
                Ok((key, _)) if key.starts_with(prefix.as_bytes()) => count += 1,
                _ => break,
            }
        }
        count
    }

    /// Current stored version of an entity; 0 when the row does not exist.
    pub fn current_version(&self, kind: EntityKind, id: &str) -> DbResult<u64> {
        match self.db.get(record_key(kind, id))? {
            Some(bytes) => {
                let value: serde_json::Value = serde_json::from_slice(&bytes)?;
                Ok(value.get("version").and_then(|v| v.as_u64()).unwrap_or(0))
            }
            None => Ok(0),
        }
    }

    /// Run `f` as one transaction: reads see the pre-transaction state, all
    /// staged writes commit in a single batch after `f` returns Ok. An Err
    /// from `f` discards the batch entirely.
    pub fn transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Txn) -> DbResult<T>,
    {
        let _guard = self.write_lock.lock();
        let mut txn = Txn {
            engine: self,
            batch: WriteBatch::default(),
        };
        let out = f(&mut txn)?;
        self.db.write(txn.batch)?;
        Ok(out)
    }
}

/// An in-flight transaction: a write batch plus read access to the engine.
///
/// Reads are not batch-aware, so a transaction must touch each row at most
/// once; the write lock held by `transaction` keeps the reads stable.
pub struct Txn<'a> {
    engine: &'a StorageEngine,
    batch: WriteBatch,
}

impl Txn<'_> {
    pub fn get<T: DeserializeOwned>(&self, kind: EntityKind, id: &str) -> DbResult<Option<T>> {
        self.engine.get(kind, id)
    }

    /// Stage a write into the transaction's batch.
    pub fn put<T: Serialize>(&mut self, kind: EntityKind, id: &str, record: &T) -> DbResult<()> {
        let value = serde_json::to_vec(record)?;
        self.batch.put(record_key(kind, id), value);
        Ok(())
    }

    pub(crate) fn engine(&self) -> &StorageEngine {
        self.engine
    }
}
