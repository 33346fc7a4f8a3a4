//! Filesystem capability used by the object database.
//!
//! Paths are `/`-separated and relative to the repository's git directory,
//! e.g. `objects/ce/013625030ba8dba906f756967f9e9ca394464a`.

use crate::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Byte-oriented filesystem primitives.
///
/// Implementations must make `write` all-or-nothing: a reader never observes
/// a partially written file.
pub trait Storage: Send + Sync {
    /// Reads a whole file, or `None` if it does not exist.
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Creates or replaces a file. Parent directories must exist.
    fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Creates a directory and any missing parents.
    fn mkdir(&self, path: &str) -> Result<()>;

    /// Lists the entry names of a directory; empty if it does not exist.
    fn readdir(&self, path: &str) -> Result<Vec<String>>;

    /// Checks whether a file or directory exists.
    fn exists(&self, path: &str) -> Result<bool>;
}

impl<T: Storage + ?Sized> Storage for Arc<T> {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        (**self).read(path)
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        (**self).write(path, data)
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        (**self).mkdir(path)
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        (**self).readdir(path)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path)
    }
}

/// Storage on the local filesystem, rooted at a git directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Creates a storage rooted at `root` (usually `<repo>/.git`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }
}

impl Storage for FsStorage {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.resolve(path)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let target = self.resolve(path);
        let dir = target.parent().unwrap_or(&self.root);

        // Stage in the destination directory so the rename stays on one filesystem.
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(data)?;
        staged.as_file().sync_all()?;
        staged.persist(&target).map_err(|e| e.error)?;
        Ok(())
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        std::fs::create_dir_all(self.resolve(path))?;
        Ok(())
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(self.resolve(path)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path).exists())
    }
}

/// In-memory storage for tests and throwaway repositories.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    dirs: RwLock<BTreeSet<String>>,
}

impl MemoryStorage {
    /// Creates an empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files stored.
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    fn normalize(path: &str) -> String {
        path.split('/')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl Storage for MemoryStorage {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.files.read().get(&Self::normalize(path)).cloned())
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = Self::normalize(path);
        if let Some((parent, _)) = path.rsplit_once('/') {
            if !self.dirs.read().contains(parent) {
                return Err(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("parent directory {parent} does not exist"),
                )
                .into());
            }
        }
        self.files.write().insert(path, data.to_vec());
        Ok(())
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        let path = Self::normalize(path);
        let mut dirs = self.dirs.write();
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            dirs.insert(current.clone());
        }
        Ok(())
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let path = Self::normalize(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };

        let child = |full: &String| -> Option<String> {
            let rest = full.strip_prefix(&prefix)?;
            let name = rest.split('/').next()?;
            (!name.is_empty()).then(|| name.to_string())
        };

        let mut names: BTreeSet<String> = self.files.read().keys().filter_map(child).collect();
        names.extend(self.dirs.read().iter().filter_map(child));
        Ok(names.into_iter().collect())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize(path);
        Ok(self.files.read().contains_key(&path) || self.dirs.read().contains(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn Storage) {
        assert_eq!(storage.read("objects/ab/cd").unwrap(), None);
        assert!(!storage.exists("objects/ab").unwrap());

        storage.mkdir("objects/ab").unwrap();
        assert!(storage.exists("objects/ab").unwrap());

        storage.write("objects/ab/cd", b"one").unwrap();
        storage.write("objects/ab/ef", b"two").unwrap();
        assert_eq!(storage.read("objects/ab/cd").unwrap(), Some(b"one".to_vec()));

        storage.write("objects/ab/cd", b"replaced").unwrap();
        assert_eq!(
            storage.read("objects/ab/cd").unwrap(),
            Some(b"replaced".to_vec())
        );

        assert_eq!(storage.readdir("objects").unwrap(), vec!["ab".to_string()]);
        assert_eq!(
            storage.readdir("objects/ab").unwrap(),
            vec!["cd".to_string(), "ef".to_string()]
        );
        assert!(storage.readdir("missing").unwrap().is_empty());
    }

    #[test]
    fn test_memory_storage() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn test_fs_storage() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FsStorage::new(dir.path()));
    }

    #[test]
    fn test_memory_write_requires_parent() {
        let storage = MemoryStorage::new();
        assert!(storage.write("objects/ab/cd", b"x").is_err());
        assert_eq!(storage.file_count(), 0);
    }

    #[test]
    fn test_arc_storage() {
        let storage = Arc::new(MemoryStorage::new());
        storage.mkdir("a").unwrap();
        storage.write("a/b", b"data").unwrap();
        assert_eq!(storage.file_count(), 1);
    }
}
