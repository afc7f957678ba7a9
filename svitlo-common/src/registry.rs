//! Durable subscriber registry backed by a CSV table.
//!
//! Every operation is a read-modify-write of the whole table, serialized behind a
//! single lock so the polling loop and the bot listener never lose each other's
//! updates. Rewrites go to a temporary file in the table's directory which is then
//! renamed over the table, so a crash mid-write leaves the previous version intact.
//!
//! Rows that cannot be read as subscribers are kept verbatim and written back
//! on every rewrite, so one bad line never costs anyone their subscription.
//!
//! The public operations never return errors: failures are logged and reported
//! as `false`, an empty list, or zeroed stats, so a broken table degrades to "no
//! known subscribers" instead of taking the monitor down.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::subscriber::{Subscriber, SubscriberProfile, SUBSCRIBER_COLUMNS};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("subscriber table i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("subscriber table is not valid csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to swap in rewritten subscriber table: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("subscriber table lock was poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub path: PathBuf,
}

pub struct SubscriberRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

/// In-memory copy of the table between a read and a rewrite.
#[derive(Default)]
struct Table {
    rows: Vec<Subscriber>,
    unparsed: Vec<csv::ByteRecord>,
}

impl SubscriberRegistry {
    /// Creates a registry over the table at `path`, writing an empty table if none exists.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let registry = Self {
            path: path.into(),
            lock: Mutex::new(()),
        };

        if !registry.path.exists() {
            match registry.write_table(&Table::default()) {
                Ok(()) => info!(path = %registry.path.display(), "created subscriber table"),
                Err(e) => error!(path = %registry.path.display(), "failed to create subscriber table: {}", e),
            }
        }

        registry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registers a new subscriber.
    ///
    /// Returns `false` if the id is already present and active. An inactive id is
    /// re-activated in place rather than duplicated.
    pub fn add(&self, id: i64, profile: SubscriberProfile) -> bool {
        let name = profile.display_name();
        let result = self.modify(|table| match table.rows.iter_mut().find(|s| s.id == id) {
            Some(existing) if existing.is_active => Ok(false),
            Some(existing) => {
                existing.is_active = true;
                Ok(true)
            }
            None => {
                table.rows.push(Subscriber::new(id, profile, Utc::now()));
                Ok(true)
            }
        });

        match result {
            Ok(true) => {
                info!(chat_id = id, name = %name, "subscriber saved");
                true
            }
            Ok(false) => {
                info!(chat_id = id, "subscriber already exists");
                false
            }
            Err(e) => {
                error!(chat_id = id, "error saving subscriber: {}", e);
                false
            }
        }
    }

    /// Active subscriber ids in insertion order, read fresh from the table.
    pub fn list_active(&self) -> Vec<i64> {
        match self.read_locked() {
            Ok(table) => table
                .rows
                .iter()
                .filter(|s| s.is_active)
                .map(|s| s.id)
                .collect(),
            Err(e) => {
                error!("error reading subscribers: {}", e);
                Vec::new()
            }
        }
    }

    pub fn get(&self, id: i64) -> Option<Subscriber> {
        match self.read_locked() {
            Ok(table) => table.rows.into_iter().find(|s| s.id == id),
            Err(e) => {
                error!(chat_id = id, "error reading subscriber: {}", e);
                None
            }
        }
    }

    /// All rows, active or not.
    pub fn all(&self) -> Vec<Subscriber> {
        match self.read_locked() {
            Ok(table) => table.rows,
            Err(e) => {
                error!("error reading subscribers: {}", e);
                Vec::new()
            }
        }
    }

    pub fn activate(&self, id: i64) -> bool {
        self.set_active(id, true)
    }

    /// Soft delete: the row stays in the table with `is_active = false`.
    pub fn deactivate(&self, id: i64) -> bool {
        self.set_active(id, false)
    }

    /// Administrative hard delete of one row.
    pub fn remove(&self, id: i64) -> bool {
        let result = self.modify(|table| {
            let before = table.rows.len();
            table.rows.retain(|s| s.id != id);
            Ok(table.rows.len() < before)
        });
        self.log_flag_result(id, "removed", result)
    }

    /// Administrative wipe of every row, unreadable ones included; the header is kept.
    pub fn clear(&self) -> bool {
        match self.modify(|table| {
            *table = Table::default();
            Ok(true)
        }) {
            Ok(_) => {
                info!("all subscribers cleared");
                true
            }
            Err(e) => {
                error!("error clearing subscribers: {}", e);
                false
            }
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let rows = self.all();
        let active = rows.iter().filter(|s| s.is_active).count();
        RegistryStats {
            total: rows.len(),
            active,
            inactive: rows.len() - active,
            path: self.path.clone(),
        }
    }

    fn set_active(&self, id: i64, active: bool) -> bool {
        let result = self.modify(|table| match table.rows.iter_mut().find(|s| s.id == id) {
            Some(existing) => {
                existing.is_active = active;
                Ok(true)
            }
            None => Ok(false),
        });
        let action = if active { "activated" } else { "deactivated" };
        self.log_flag_result(id, action, result)
    }

    fn log_flag_result(&self, id: i64, action: &str, result: Result<bool, RegistryError>) -> bool {
        match result {
            Ok(true) => {
                info!(chat_id = id, "subscriber {}", action);
                true
            }
            Ok(false) => {
                warn!(chat_id = id, "subscriber not found");
                false
            }
            Err(e) => {
                error!(chat_id = id, "error updating subscriber: {}", e);
                false
            }
        }
    }

    /// Runs `f` over the table under the lock and writes the table back if `f` reports a change.
    fn modify<F>(&self, f: F) -> Result<bool, RegistryError>
    where
        F: FnOnce(&mut Table) -> Result<bool, RegistryError>,
    {
        let _guard = self.lock.lock().map_err(|_| RegistryError::Poisoned)?;
        let mut table = self.read_table()?;
        let changed = f(&mut table)?;
        if changed {
            self.write_table(&table)?;
        }
        Ok(changed)
    }

    fn read_locked(&self) -> Result<Table, RegistryError> {
        let _guard = self.lock.lock().map_err(|_| RegistryError::Poisoned)?;
        self.read_table()
    }

    fn read_table(&self) -> Result<Table, RegistryError> {
        let mut reader = match csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
        {
            Ok(reader) => reader,
            Err(e) => match e.kind() {
                csv::ErrorKind::Io(inner) if inner.kind() == io::ErrorKind::NotFound => {
                    warn!(path = %self.path.display(), "subscriber table not found");
                    return Ok(Table::default());
                }
                _ => return Err(e.into()),
            },
        };

        let headers = reader.byte_headers()?.clone();
        let mut table = Table::default();
        for (line, record) in reader.byte_records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    warn!(row = line + 1, "skipping unreadable subscriber row: {}", e);
                    continue;
                }
            };
            match record.deserialize::<Subscriber>(Some(&headers)) {
                Ok(subscriber) => table.rows.push(subscriber),
                Err(e) => {
                    warn!(row = line + 1, "keeping malformed subscriber row as is: {}", e);
                    table.unparsed.push(record);
                }
            }
        }
        Ok(table)
    }

    fn write_table(&self, table: &Table) -> Result<(), RegistryError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file_mut());
            writer.write_record(SUBSCRIBER_COLUMNS)?;
            for row in &table.rows {
                writer.serialize(row)?;
            }
            for raw in &table.unparsed {
                writer.write_byte_record(raw)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}
