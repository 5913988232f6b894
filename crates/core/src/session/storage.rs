use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A key-value store for the persisted session.
///
/// Values are serialized JSON documents.
pub trait Storage: Send + Sync + Debug {
    /// Loads the value stored under `key`, `None` if nothing is stored.
    fn load(&self, key: &str) -> io::Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn save(&self, key: &str, value: &str) -> io::Result<()>;

    /// Removes the value stored under `key`. Removing a missing key is not
    /// an error.
    fn remove(&self, key: &str) -> io::Result<()>;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    #[inline]
    fn load(&self, key: &str) -> io::Result<Option<String>> {
        (**self).load(key)
    }

    #[inline]
    fn save(&self, key: &str, value: &str) -> io::Result<()> {
        (**self).save(key, value)
    }

    #[inline]
    fn remove(&self, key: &str) -> io::Result<()> {
        (**self).remove(key)
    }
}

/// A storage that keeps one `<key>.json` file per key in a directory.
#[derive(Clone, Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Creates a storage rooted at `dir`. The directory is created on the
    /// first write.
    #[inline]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates a storage in the platform data directory, for example
    /// `~/.local/share/sophia` on Linux.
    pub fn in_data_dir() -> io::Result<Self> {
        let base = dirs::data_dir().ok_or_else(|| {
            io::Error::new(ErrorKind::NotFound, "no data directory available")
        })?;
        Ok(Self::new(base.join("sophia")))
    }

    /// Returns the directory holding the files.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Storage for FileStorage {
    fn load(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn save(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), value)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

/// A storage that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, String>) -> R,
    ) -> R {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut entries)
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.with_entries(|entries| entries.get(key).cloned()))
    }

    fn save(&self, key: &str, value: &str) -> io::Result<()> {
        self.with_entries(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.with_entries(|entries| entries.remove(key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested"));

        assert_eq!(storage.load("user").unwrap(), None);
        storage.remove("user").unwrap();

        storage.save("user", r#"{"username":"sophia"}"#).unwrap();
        assert!(storage.dir().join("user.json").exists());
        assert_eq!(
            storage.load("user").unwrap().as_deref(),
            Some(r#"{"username":"sophia"}"#)
        );

        storage.remove("user").unwrap();
        assert_eq!(storage.load("user").unwrap(), None);
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::default();
        storage.save("auth", "{}").unwrap();
        assert_eq!(storage.load("auth").unwrap().as_deref(), Some("{}"));
        storage.remove("auth").unwrap();
        assert_eq!(storage.load("auth").unwrap(), None);
    }
}
