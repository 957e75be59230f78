//! Document store for all medrem collections.
//!
//! The whole database is one [`Snapshot`] of six named collections. Every
//! write goes through [`Store::transact`], which stages changes on a copy
//! and commits the copy in one step, so a multi-record change (cascading
//! delete, import) either lands completely or not at all.
//!
//! [`JsonFileStore`] keeps the snapshot in a single JSON file:
//! 1. An exclusive lock on a sidecar lock file spans load and commit
//! 2. The new snapshot is written to a temp file and synced
//! 3. The temp file is renamed over the original

use crate::{
    Achievement, DoseEvent, EmergencyContact, Error, MedicalInfo, Medicine, Result, Setting,
};
use chrono::NaiveDateTime;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

const STORE_FILE: &str = "medrem.json";
const LOCK_FILE: &str = "medrem.lock";

/// Every collection the application persists
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub medicines: Vec<Medicine>,
    #[serde(default)]
    pub dose_events: Vec<DoseEvent>,
    #[serde(default)]
    pub achievements: Vec<Achievement>,
    #[serde(default)]
    pub settings: Vec<Setting>,
    #[serde(default)]
    pub emergency_contacts: Vec<EmergencyContact>,
    #[serde(default)]
    pub medical_info: Vec<MedicalInfo>,
}

/// Portable dump of every collection plus the time it was taken
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExportBundle {
    #[serde(flatten)]
    pub data: Snapshot,
    pub exported_at: NaiveDateTime,
}

/// A record type that lives in one collection of the [`Snapshot`]
pub trait Record: Clone {
    type Key: PartialEq + fmt::Display + ?Sized;

    const COLLECTION: &'static str;

    fn key(&self) -> &Self::Key;
    fn collection(snapshot: &Snapshot) -> &Vec<Self>;
    fn collection_mut(snapshot: &mut Snapshot) -> &mut Vec<Self>;
}

macro_rules! impl_record {
    ($ty:ty, $key:ty, $field:ident, $key_field:ident) => {
        impl Record for $ty {
            type Key = $key;

            const COLLECTION: &'static str = stringify!($field);

            fn key(&self) -> &Self::Key {
                &self.$key_field
            }

            fn collection(snapshot: &Snapshot) -> &Vec<Self> {
                &snapshot.$field
            }

            fn collection_mut(snapshot: &mut Snapshot) -> &mut Vec<Self> {
                &mut snapshot.$field
            }
        }
    };
}

impl_record!(Medicine, Uuid, medicines, id);
impl_record!(DoseEvent, Uuid, dose_events, id);
impl_record!(Achievement, Uuid, achievements, id);
impl_record!(Setting, str, settings, key);
impl_record!(EmergencyContact, Uuid, emergency_contacts, id);
impl_record!(MedicalInfo, str, medical_info, key);

impl Snapshot {
    pub fn get_all<R: Record>(&self) -> &[R] {
        R::collection(self)
    }

    pub fn get_by_id<R: Record>(&self, key: &R::Key) -> Option<&R> {
        R::collection(self).iter().find(|r| r.key() == key)
    }

    pub fn get_mut<R: Record>(&mut self, key: &R::Key) -> Result<&mut R> {
        R::collection_mut(self)
            .iter_mut()
            .find(|r| r.key() == key)
            .ok_or_else(|| Error::not_found(R::COLLECTION, key))
    }

    /// Add a new record; a duplicate key is rejected
    pub fn insert<R: Record>(&mut self, record: R) -> Result<()> {
        if self.get_by_id::<R>(record.key()).is_some() {
            return Err(Error::Store(format!(
                "{} already contains {}",
                R::COLLECTION,
                record.key()
            )));
        }
        R::collection_mut(self).push(record);
        Ok(())
    }

    /// Replace the record with the same key, or add it
    pub fn update<R: Record>(&mut self, record: R) {
        let records = R::collection_mut(self);
        match records.iter_mut().find(|r| r.key() == record.key()) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Remove a record; returns whether it existed
    pub fn delete<R: Record>(&mut self, key: &R::Key) -> bool {
        let records = R::collection_mut(self);
        let before = records.len();
        records.retain(|r| r.key() != key);
        records.len() != before
    }

    pub fn clear<R: Record>(&mut self) {
        R::collection_mut(self).clear();
    }

    /// Reject snapshots with duplicate keys or malformed medicines
    pub fn check_integrity(&self) -> Result<()> {
        fn unique<R: Record>(snapshot: &Snapshot) -> Result<()>
        where
            R::Key: std::hash::Hash + Eq,
        {
            let mut seen = HashSet::new();
            for record in R::collection(snapshot) {
                if !seen.insert(record.key()) {
                    return Err(Error::Import(format!(
                        "duplicate key {} in {}",
                        record.key(),
                        R::COLLECTION
                    )));
                }
            }
            Ok(())
        }

        unique::<Medicine>(self)?;
        unique::<DoseEvent>(self)?;
        unique::<Achievement>(self)?;
        unique::<Setting>(self)?;
        unique::<EmergencyContact>(self)?;
        unique::<MedicalInfo>(self)?;

        for medicine in &self.medicines {
            medicine
                .validate()
                .map_err(|e| Error::Import(format!("medicine {}: {}", medicine.id, e)))?;
        }

        let medicine_ids: HashSet<_> = self.medicines.iter().map(|m| m.id).collect();
        let orphans = self
            .dose_events
            .iter()
            .filter(|e| !medicine_ids.contains(&e.medicine_id))
            .count();
        if orphans > 0 {
            tracing::warn!("Snapshot has {} dose event(s) with no medicine", orphans);
        }
        Ok(())
    }
}

/// Persistence collaborator behind the tracker
pub trait Store {
    /// Read the current snapshot
    fn load(&self) -> Result<Snapshot>;

    /// Apply `f` to a staged copy and commit it atomically.
    ///
    /// If `f` fails nothing is written and its error is returned.
    fn transact<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Snapshot) -> Result<T>;
}

/// Collection-level operations available on every [`Store`]
pub trait StoreExt: Store {
    fn insert<R: Record>(&mut self, record: R) -> Result<()> {
        self.transact(|s| s.insert(record))
    }

    fn get_by_id<R: Record>(&self, key: &R::Key) -> Result<Option<R>> {
        Ok(self.load()?.get_by_id::<R>(key).cloned())
    }

    fn get_all<R: Record>(&self) -> Result<Vec<R>> {
        Ok(R::collection(&self.load()?).clone())
    }

    fn update<R: Record>(&mut self, record: R) -> Result<()> {
        self.transact(|s| {
            s.update(record);
            Ok(())
        })
    }

    fn delete<R: Record>(&mut self, key: &R::Key) -> Result<bool> {
        self.transact(|s| Ok(s.delete::<R>(key)))
    }

    fn clear<R: Record>(&mut self) -> Result<()> {
        self.transact(|s| {
            s.clear::<R>();
            Ok(())
        })
    }

    fn export_all(&self, now: NaiveDateTime) -> Result<ExportBundle> {
        Ok(ExportBundle {
            data: self.load()?,
            exported_at: now,
        })
    }

    /// Replace every collection with the bundle's contents in one commit
    fn import_all(&mut self, bundle: ExportBundle) -> Result<()> {
        bundle.data.check_integrity()?;
        self.transact(move |s| {
            *s = bundle.data;
            Ok(())
        })
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

/// Single-file JSON store with cross-process locking
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    /// Open (or prepare) the store inside `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(STORE_FILE),
            lock_path: dir.join(LOCK_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        Ok(file)
    }

    fn read_unlocked(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            tracing::debug!("No store file at {:?}, starting empty", self.path);
            return Ok(Snapshot::default());
        }

        let mut contents = String::new();
        File::open(&self.path)?.read_to_string(&mut contents)?;
        if contents.trim().is_empty() {
            return Ok(Snapshot::default());
        }

        serde_json::from_str(&contents)
            .map_err(|e| Error::Store(format!("store file {:?} is unreadable: {}", self.path, e)))
    }

    fn write_unlocked(&self, snapshot: &Snapshot) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "store path missing parent")
        })?;
        let temp = NamedTempFile::new_in(parent)?;

        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer(&mut writer, snapshot)?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

impl Store for JsonFileStore {
    fn load(&self) -> Result<Snapshot> {
        let lock = self.lock_file()?;
        lock.lock_shared()?;
        let result = self.read_unlocked();
        lock.unlock()?;
        result
    }

    fn transact<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Snapshot) -> Result<T>,
    {
        let lock = self.lock_file()?;
        lock.lock_exclusive()?;

        let result = self.read_unlocked().and_then(|mut staged| {
            let out = f(&mut staged)?;
            self.write_unlocked(&staged)?;
            Ok(out)
        });

        if let Err(e) = lock.unlock() {
            tracing::warn!("Failed to release store lock {:?}: {}", self.path, e);
        }

        if result.is_ok() {
            tracing::debug!("Committed store to {:?}", self.path);
        }
        result
    }
}

/// In-process store, used for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Snapshot,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            read_only: false,
        }
    }

    /// Make every commit fail, to exercise store-failure paths
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }
}

impl Store for MemoryStore {
    fn load(&self) -> Result<Snapshot> {
        Ok(self.snapshot.clone())
    }

    fn transact<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Snapshot) -> Result<T>,
    {
        let mut staged = self.snapshot.clone();
        let out = f(&mut staged)?;
        if self.read_only {
            return Err(Error::Store("store is read-only".into()));
        }
        self.snapshot = staged;
        Ok(out)
    }
}
