//! Process-wide tombstone set.
//!
//! A key enters the registry when its death is confirmed and never leaves.
//! The backing file is a flat list with one key per line; every new key is
//! appended and synced before [`DeadRegistry::add`] returns, so a tombstone
//! survives a crash immediately after it is granted.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::Result;
use crate::types::EntityKey;

/// Append-only set of permanently dead companion keys.
///
/// Shared as `Arc<DeadRegistry>` by the scheduler and the relocation path.
#[derive(Debug)]
pub struct DeadRegistry {
    keys: RwLock<HashSet<EntityKey>>,
    file: Mutex<Option<File>>,
    path: Option<PathBuf>,
}

impl DeadRegistry {
    /// Load the registry from `path`, creating the file and its parent
    /// directories if needed. Lines that are not valid keys are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MenagerieError::Io`] if the file cannot be read or opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut keys = HashSet::new();
        let mut skipped = 0usize;
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match EntityKey::parse(&line) {
                    Some(key) => {
                        keys.insert(key);
                    }
                    None => {
                        skipped += 1;
                        warn!(line = lineno + 1, content = %line, "Skipping invalid tombstone entry");
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(
            path = %path.display(),
            tombstones = keys.len(),
            skipped,
            "Dead registry loaded"
        );

        Ok(Self {
            keys: RwLock::new(keys),
            file: Mutex::new(Some(file)),
            path: Some(path),
        })
    }

    /// A registry with no backing file. Tombstones last for the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            keys: RwLock::new(HashSet::new()),
            file: Mutex::new(None),
            path: None,
        }
    }

    /// Tombstone `key`. Returns `true` if it was not already dead.
    ///
    /// The key is on disk before it becomes visible to [`Self::contains`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::MenagerieError::Io`] if the append or sync fails; the
    /// key is then not added.
    pub fn add(&self, key: EntityKey) -> Result<bool> {
        let mut file = self.file.lock();
        if self.keys.read().contains(&key) {
            return Ok(false);
        }
        if let Some(f) = file.as_mut() {
            writeln!(f, "{key}")?;
            f.sync_data()?;
        }
        self.keys.write().insert(key);
        info!(%key, "Companion tombstoned");
        Ok(true)
    }

    /// Whether `key` is tombstoned.
    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.keys.read().contains(key)
    }

    /// Number of tombstones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether no key has been tombstoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// Copy of every tombstoned key.
    #[must_use]
    pub fn keys(&self) -> Vec<EntityKey> {
        self.keys.read().iter().copied().collect()
    }

    /// Backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let reg = DeadRegistry::in_memory();
        let key = EntityKey::new();
        assert!(reg.add(key).expect("add"));
        assert!(!reg.add(key).expect("add again"));
        assert!(reg.contains(&key));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn tombstones_survive_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config").join("dead.txt");
        let (a, b) = (EntityKey::new(), EntityKey::new());

        {
            let reg = DeadRegistry::open(&path).expect("open");
            reg.add(a).expect("add");
            reg.add(b).expect("add");
            reg.add(a).expect("dup");
        }

        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents.lines().count(), 2, "duplicates are not appended");

        let reg = DeadRegistry::open(&path).expect("reopen");
        assert!(reg.contains(&a));
        assert!(reg.contains(&b));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn invalid_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dead.txt");
        let good = EntityKey::new();
        std::fs::write(&path, format!("garbage\n\n{good}\n  {good}  \nnot-a-uuid\n")).expect("write");

        let reg = DeadRegistry::open(&path).expect("open");
        assert_eq!(reg.len(), 1);
        assert!(reg.contains(&good));
    }

    #[test]
    fn concurrent_adds_write_each_key_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dead.txt");
        let reg = std::sync::Arc::new(DeadRegistry::open(&path).expect("open"));
        let key = EntityKey::new();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reg = std::sync::Arc::clone(&reg);
                std::thread::spawn(move || reg.add(key).expect("add"))
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .filter(|fresh| *fresh)
            .count();

        assert_eq!(granted, 1);
        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents.lines().count(), 1);
    }
}
