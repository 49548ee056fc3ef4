//! SQLite persistence for per-partition snapshot stores.
//!
//! Each partition saves its [`SnapshotStore`] to its own database as an
//! ordered sequence of rows:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS companions (
//!     seq          INTEGER PRIMARY KEY,
//!     entity_key   TEXT,
//!     owner_key    TEXT,
//!     x            REAL,
//!     y            REAL,
//!     z            REAL,
//!     is_pet       INTEGER,
//!     is_alive     INTEGER,
//!     snapshot     BLOB,
//!     display_name TEXT,
//!     updated_at   TEXT,
//!     checksum     TEXT
//! );
//! ```
//!
//! Columns are nullable on purpose: a row with a missing or unparsable key
//! or owner is skipped with a warning, and never aborts the load. The owner
//! index is not stored; it is rebuilt when the store is reconstructed.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::types::FromSql;
use rusqlite::{params, Connection, OpenFlags, Row};
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::store::SnapshotStore;
use crate::types::{CompanionKind, CompanionRecord, EntityKey, OwnerId, Position, Snapshot};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS companions (
    seq          INTEGER PRIMARY KEY,
    entity_key   TEXT,
    owner_key    TEXT,
    x            REAL,
    y            REAL,
    z            REAL,
    is_pet       INTEGER,
    is_alive     INTEGER,
    snapshot     BLOB,
    display_name TEXT,
    updated_at   TEXT,
    checksum     TEXT
);";

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// CRC-32 (ISO 3309) of `data` as lowercase hex.
fn crc32_hex(data: &[u8]) -> String {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }
    format!("{:08x}", !crc)
}

// ---------------------------------------------------------------------------
// RegistryDb
// ---------------------------------------------------------------------------

/// Handle to one partition's registry database.
pub struct RegistryDb {
    conn: Connection,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for RegistryDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryDb")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A row as read, before validation.
struct RawRow {
    seq: i64,
    key: Option<String>,
    owner: Option<String>,
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
    is_pet: Option<bool>,
    is_alive: Option<bool>,
    snapshot: Option<Vec<u8>>,
    display_name: Option<String>,
    updated_at: Option<String>,
    checksum: Option<String>,
}

impl RawRow {
    /// Read a row without failing on column types. SQLite columns are
    /// dynamically typed; a value of the wrong type reads as `None`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            key: lenient(row, 1),
            owner: lenient(row, 2),
            x: lenient(row, 3),
            y: lenient(row, 4),
            z: lenient(row, 5),
            is_pet: lenient(row, 6),
            is_alive: lenient(row, 7),
            snapshot: lenient(row, 8),
            display_name: lenient(row, 9),
            updated_at: lenient(row, 10),
            checksum: lenient(row, 11),
        })
    }
}

fn lenient<T: FromSql>(row: &Row<'_>, idx: usize) -> Option<T> {
    row.get::<_, Option<T>>(idx).ok().flatten()
}

impl RegistryDb {
    /// Open (or create) a registry database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MenagerieError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "Registry database opened"
        );

        Ok(Self {
            conn,
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`crate::MenagerieError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    // ------------------------------------------------------------------
    // Save boundary
    // ------------------------------------------------------------------

    /// Write `store` out, replacing whatever the database held.
    ///
    /// Skipped when the store is clean. Rows are written in key order inside
    /// one transaction; the store is marked clean only after commit.
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MenagerieError::Database`] on SQLite failures.
    pub fn save_store(&mut self, store: &mut SnapshotStore) -> Result<usize> {
        if !store.is_dirty() {
            return Ok(0);
        }
        let start = Instant::now();

        let mut records: Vec<&CompanionRecord> = store.records().collect();
        records.sort_by_key(|r| r.key);

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM companions", [])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO companions
                    (entity_key, owner_key, x, y, z, is_pet, is_alive,
                     snapshot, display_name, updated_at, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for r in &records {
                let blob = r.snapshot.as_ref().map(Snapshot::as_bytes);
                let checksum = match blob {
                    Some(bytes) if self.config.checksum_enabled => Some(crc32_hex(bytes)),
                    _ => None,
                };
                stmt.execute(params![
                    r.key.to_string(),
                    r.owner.to_string(),
                    r.position.x,
                    r.position.y,
                    r.position.z,
                    r.kind == CompanionKind::Pet,
                    r.alive,
                    blob,
                    r.display_name,
                    r.last_updated.to_rfc3339(),
                    checksum,
                ])?;
            }
        }
        tx.commit()?;
        let saved = records.len();
        store.mark_clean();

        debug!(
            path = %self.db_path.display(),
            records = saved,
            elapsed_us = start.elapsed().as_micros(),
            "Saved snapshot store"
        );
        Ok(saved)
    }

    /// Read every valid row back into a fresh, clean store.
    ///
    /// Rows with a missing or invalid key, owner or kind are skipped. A
    /// missing timestamp defaults to load time. A snapshot whose checksum
    /// does not match is dropped, but the record is kept.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MenagerieError::Database`] on SQLite failures.
    pub fn load_store(&self) -> Result<SnapshotStore> {
        let start = Instant::now();
        let now = Utc::now();

        let mut stmt = self.conn.prepare_cached(
            "SELECT seq, entity_key, owner_key, x, y, z, is_pet, is_alive,
                    snapshot, display_name, updated_at, checksum
             FROM companions ORDER BY seq",
        )?;
        let rows = stmt.query_map([], RawRow::from_row)?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            match self.validate(row?, now) {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }

        let store = SnapshotStore::from_records(records);
        info!(
            path = %self.db_path.display(),
            records = store.len(),
            skipped,
            elapsed_us = start.elapsed().as_micros(),
            "Loaded snapshot store"
        );
        Ok(store)
    }

    fn validate(&self, row: RawRow, now: DateTime<Utc>) -> Option<CompanionRecord> {
        let Some(key) = row.key.as_deref().and_then(EntityKey::parse) else {
            warn!(seq = row.seq, key = ?row.key, "Skipping row with missing or invalid key");
            return None;
        };
        let Some(owner) = row.owner.as_deref().and_then(OwnerId::parse) else {
            warn!(seq = row.seq, %key, "Skipping row with missing or invalid owner");
            return None;
        };
        let Some(is_pet) = row.is_pet else {
            warn!(seq = row.seq, %key, "Skipping row with missing kind");
            return None;
        };

        let last_updated = match row.updated_at.as_deref().map(DateTime::parse_from_rfc3339) {
            Some(Ok(ts)) => ts.with_timezone(&Utc),
            _ => {
                warn!(seq = row.seq, %key, "Missing or invalid timestamp, using load time");
                now
            }
        };

        let mut snapshot = row.snapshot.map(Snapshot);
        if self.config.checksum_enabled {
            if let (Some(blob), Some(expected)) = (&snapshot, &row.checksum) {
                let actual = crc32_hex(blob.as_bytes());
                if *expected != actual {
                    warn!(
                        %key,
                        expected = %expected,
                        actual = %actual,
                        "Checksum mismatch, dropping snapshot"
                    );
                    snapshot = None;
                }
            }
        }

        Some(CompanionRecord {
            key,
            owner,
            kind: if is_pet { CompanionKind::Pet } else { CompanionKind::Mount },
            position: Position::new(
                row.x.unwrap_or_default(),
                row.y.unwrap_or_default(),
                row.z.unwrap_or_default(),
            ),
            snapshot,
            display_name: row.display_name,
            last_updated,
            alive: row.is_alive.unwrap_or(true),
        })
    }

    // ------------------------------------------------------------------
    // Utility
    // ------------------------------------------------------------------

    /// Number of stored rows, valid or not.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MenagerieError::Database`] on SQLite failures.
    pub fn row_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM companions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Copy the database to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MenagerieError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Registry backup completed"
        );
        Ok(())
    }

    /// Path to the database file (or `:memory:`).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(owner: OwnerId, name: Option<&str>, kind: CompanionKind) -> CompanionRecord {
        CompanionRecord {
            key: EntityKey::new(),
            owner,
            kind,
            position: Position::new(10.0, 64.0, -3.5),
            snapshot: Some(Snapshot(b"{\"hp\":20}".to_vec())),
            display_name: name.map(str::to_string),
            last_updated: Utc::now() - Duration::minutes(5),
            alive: true,
        }
    }

    fn populated() -> (SnapshotStore, OwnerId) {
        let owner = OwnerId::new();
        let mut store = SnapshotStore::new();
        store.put(sample(owner, Some("Rex"), CompanionKind::Pet));
        store.put(sample(owner, None, CompanionKind::Pet));
        store.put(sample(owner, Some("Thunder"), CompanionKind::Mount));
        (store, owner)
    }

    #[test]
    fn save_then_load_restores_records_and_index() {
        let mut db = RegistryDb::open_in_memory(&PersistenceConfig::default()).expect("open");
        let (mut store, owner) = populated();

        assert_eq!(db.save_store(&mut store).expect("save"), 3);
        assert!(!store.is_dirty());

        let loaded = db.load_store().expect("load");
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.get_by_owner(owner, Some(CompanionKind::Pet)).len(), 2);
        for original in store.records() {
            let back = loaded.get(&original.key).expect("present");
            assert_eq!(back.snapshot, original.snapshot);
            assert_eq!(back.display_name, original.display_name);
            assert_eq!(back.position, original.position);
            assert_eq!(back.last_updated, original.last_updated);
        }
    }

    #[test]
    fn clean_store_is_not_rewritten() {
        let mut db = RegistryDb::open_in_memory(&PersistenceConfig::default()).expect("open");
        let (mut store, _) = populated();
        db.save_store(&mut store).expect("save");
        assert_eq!(db.save_store(&mut store).expect("save again"), 0);
    }

    #[test]
    fn removed_records_disappear_after_save() {
        let mut db = RegistryDb::open_in_memory(&PersistenceConfig::default()).expect("open");
        let (mut store, _) = populated();
        db.save_store(&mut store).expect("save");

        let victim = store.keys()[0];
        store.remove(&victim);
        db.save_store(&mut store).expect("save");
        assert_eq!(db.row_count().expect("count"), 2);
        assert!(!db.load_store().expect("load").contains(&victim));
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let mut db = RegistryDb::open_in_memory(&PersistenceConfig::default()).expect("open");
        let (mut store, _) = populated();
        db.save_store(&mut store).expect("save");

        db.conn
            .execute(
                "INSERT INTO companions (entity_key, owner_key, is_pet) VALUES (NULL, ?1, 1)",
                params![OwnerId::new().to_string()],
            )
            .expect("insert");
        db.conn
            .execute(
                "INSERT INTO companions (entity_key, owner_key, is_pet) VALUES ('not-a-uuid', ?1, 1)",
                params![OwnerId::new().to_string()],
            )
            .expect("insert");
        db.conn
            .execute(
                "INSERT INTO companions (entity_key, owner_key, is_pet) VALUES (?1, NULL, 0)",
                params![EntityKey::new().to_string()],
            )
            .expect("insert");

        db.conn
            .execute(
                "INSERT INTO companions (entity_key, owner_key, x, is_pet) VALUES (?1, ?2, 'abc', 'yes')",
                params![EntityKey::new().to_string(), OwnerId::new().to_string()],
            )
            .expect("insert");
        db.conn
            .execute(
                "INSERT INTO companions (entity_key, owner_key, is_pet) VALUES (X'0102', ?1, 1)",
                params![OwnerId::new().to_string()],
            )
            .expect("insert");

        let loaded = db.load_store().expect("load never aborts");
        assert_eq!(loaded.len(), 3);
        for record in store.records() {
            assert!(loaded.contains(&record.key));
        }
    }

    #[test]
    fn mistyped_optional_columns_fall_back_to_defaults() {
        let db = RegistryDb::open_in_memory(&PersistenceConfig::default()).expect("open");
        let key = EntityKey::new();
        db.conn
            .execute(
                "INSERT INTO companions (entity_key, owner_key, x, y, z, is_pet, is_alive, updated_at)
                 VALUES (?1, ?2, 'abc', 7.5, X'00', 1, 'maybe', 42)",
                params![key.to_string(), OwnerId::new().to_string()],
            )
            .expect("insert");

        let loaded = db.load_store().expect("load");
        let record = loaded.get(&key).expect("kept");
        assert_eq!(record.position, Position::new(0.0, 7.5, 0.0));
        assert_eq!(record.kind, CompanionKind::Pet);
        assert!(record.alive);
    }

    #[test]
    fn missing_timestamp_defaults_to_load_time() {
        let db = RegistryDb::open_in_memory(&PersistenceConfig::default()).expect("open");
        let key = EntityKey::new();
        db.conn
            .execute(
                "INSERT INTO companions (entity_key, owner_key, is_pet) VALUES (?1, ?2, 0)",
                params![key.to_string(), OwnerId::new().to_string()],
            )
            .expect("insert");

        let before = Utc::now();
        let loaded = db.load_store().expect("load");
        let record = loaded.get(&key).expect("kept");
        assert!(record.last_updated >= before);
        assert_eq!(record.kind, CompanionKind::Mount);
        assert!(record.alive);
        assert!(record.snapshot.is_none());
    }

    #[test]
    fn checksum_mismatch_drops_snapshot_only() {
        let mut db = RegistryDb::open_in_memory(&PersistenceConfig::default()).expect("open");
        let (mut store, _) = populated();
        db.save_store(&mut store).expect("save");

        db.conn
            .execute("UPDATE companions SET snapshot = X'DEADBEEF' WHERE display_name = 'Rex'", [])
            .expect("corrupt");

        let loaded = db.load_store().expect("load");
        assert_eq!(loaded.len(), 3);
        let rex = loaded.records().find(|r| r.name() == "Rex").expect("kept");
        assert!(rex.snapshot.is_none());
        let thunder = loaded.records().find(|r| r.name() == "Thunder").expect("kept");
        assert!(thunder.snapshot.is_some());
    }

    #[test]
    fn file_backed_store_survives_reopen_and_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("overworld.db");
        let config = PersistenceConfig::default();
        let (mut store, owner) = populated();

        {
            let mut db = RegistryDb::open(&path, &config).expect("open");
            db.save_store(&mut store).expect("save");
            db.backup(dir.path().join("overworld.db.bak")).expect("backup");
        }

        let db = RegistryDb::open(&path, &config).expect("reopen");
        assert_eq!(db.load_store().expect("load").get_by_owner(owner, None).len(), 3);

        let bak = RegistryDb::open(dir.path().join("overworld.db.bak"), &config).expect("open backup");
        assert_eq!(bak.row_count().expect("count"), 3);
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(crc32_hex(b"123456789"), "cbf43926");
    }
}
