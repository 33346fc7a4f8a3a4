//! Loose object store: one compressed file per object under `objects/`.

use crate::codec::{self, CompressionLevel};
use crate::storage::Storage;
use crate::{Object, ObjectId, ObjectKind, OdbError, OidPrefix, Result};
use tracing::{debug, trace};

const OBJECTS_DIR: &str = "objects";

/// Returns `objects/<hex[0:2]>/<hex[2:]>` for an id.
pub fn object_path(id: &ObjectId) -> String {
    let hex = id.to_hex();
    format!("{}/{}/{}", OBJECTS_DIR, &hex[..2], &hex[2..])
}

/// Write-once store of individually compressed objects.
#[derive(Debug)]
pub struct LooseStore<S> {
    storage: S,
    compression: CompressionLevel,
}

impl<S: Storage> LooseStore<S> {
    /// Creates a loose store on top of a storage backend.
    pub fn new(storage: S, compression: CompressionLevel) -> Self {
        Self {
            storage,
            compression,
        }
    }

    /// Returns the underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Checks if an object exists as a loose file.
    pub fn has(&self, id: &ObjectId) -> Result<bool> {
        self.storage.exists(&object_path(id))
    }

    /// Reads the compressed bytes of an object.
    pub fn read_raw(&self, id: &ObjectId) -> Result<Vec<u8>> {
        self.storage
            .read(&object_path(id))?
            .ok_or(OdbError::NotFound(*id))
    }

    /// Reads and verifies an object.
    pub fn read(&self, id: &ObjectId) -> Result<Object> {
        let raw = self.read_raw(id)?;
        let object = codec::decode(&raw, Some(id))?;
        trace!(id = %id, kind = %object.kind, size = object.size(), "read loose object");
        Ok(object)
    }

    /// Stores an object and returns its id.
    ///
    /// The id is computed first; if the file already exists nothing is written.
    pub fn write(&self, kind: ObjectKind, payload: &[u8]) -> Result<ObjectId> {
        let id = ObjectId::hash_object(kind, payload);
        if self.has(&id)? {
            trace!(id = %id, "loose object already present");
            return Ok(id);
        }

        let encoded = codec::encode(kind, payload, self.compression)?;
        let path = object_path(&id);
        self.storage.mkdir(&path[..OBJECTS_DIR.len() + 3])?;
        self.storage.write(&path, &encoded.bytes)?;
        debug!(id = %id, kind = %kind, size = payload.len(), "wrote loose object");
        Ok(id)
    }

    /// Stores an already-built object.
    pub fn write_object(&self, object: &Object) -> Result<ObjectId> {
        self.write(object.kind, &object.data)
    }

    /// Lists loose objects whose id starts with `prefix`.
    pub fn list_prefix(&self, prefix: &OidPrefix) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for dir in self.fanout_dirs()? {
            if !dir.starts_with(&prefix.as_str()[..prefix.len().min(2)]) {
                continue;
            }
            for name in self.storage.readdir(&format!("{OBJECTS_DIR}/{dir}"))? {
                if let Some(id) = Self::parse_entry(&dir, &name) {
                    if prefix.matches(&id) {
                        ids.push(id);
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Lists every loose object.
    pub fn list(&self) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for dir in self.fanout_dirs()? {
            for name in self.storage.readdir(&format!("{OBJECTS_DIR}/{dir}"))? {
                if let Some(id) = Self::parse_entry(&dir, &name) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Two-hex-digit directories under `objects/`.
    fn fanout_dirs(&self) -> Result<Vec<String>> {
        Ok(self
            .storage
            .readdir(OBJECTS_DIR)?
            .into_iter()
            .filter(|name| name.len() == 2 && name.bytes().all(|b| b.is_ascii_hexdigit()))
            .collect())
    }

    /// Staging files and other strays in a fan-out directory are ignored.
    fn parse_entry(dir: &str, name: &str) -> Option<ObjectId> {
        if name.len() != ObjectId::HEX_LEN - 2 {
            return None;
        }
        ObjectId::from_hex(&format!("{dir}{name}")).ok()
    }
}
