//! Unified object reader over the loose store and every loaded pack.

use crate::delta::apply_delta;
use crate::index::PackIndex;
use crate::loose::LooseStore;
use crate::pack::{resolve_pack, BaseResolver, EntryKind, Pack};
use crate::storage::Storage;
use crate::{CompressionLevel, Object, ObjectId, ObjectKind, OdbError, OidPrefix, Result};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

const PACK_DIR: &str = "objects/pack";

/// Longest delta chain followed when reading a packed object.
pub const MAX_DELTA_DEPTH: usize = 4095;

/// Object database options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OdbOptions {
    /// zlib level for newly written loose objects.
    pub compression: CompressionLevel,
    /// Number of resolved pack entries kept in the delta base cache.
    pub delta_cache_size: usize,
}

impl Default for OdbOptions {
    fn default() -> Self {
        Self {
            compression: CompressionLevel::Default,
            delta_cache_size: 256,
        }
    }
}

/// Summary of a pack stored by [`Odb::index_pack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackInfo {
    /// `pack-<checksum hex>`.
    pub name: String,
    /// Trailing checksum of the pack.
    pub checksum: [u8; 20],
    /// Every object in the pack, in pack order.
    pub ids: Vec<ObjectId>,
}

type CacheKey = ([u8; 20], u64);

/// The object database: a loose store plus the packs under `objects/pack`.
///
/// Reads try the loose store first, then each pack. Packs and the delta base
/// cache are owned by the handle; nothing is shared through globals.
pub struct Odb<S> {
    loose: LooseStore<S>,
    packs: RwLock<BTreeMap<String, Arc<Pack>>>,
    delta_cache: Mutex<LruCache<CacheKey, Object>>,
}

impl<S: Storage> Odb<S> {
    /// Creates an object database without scanning for packs.
    pub fn new(storage: S, options: OdbOptions) -> Self {
        let capacity = NonZeroUsize::new(options.delta_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            loose: LooseStore::new(storage, options.compression),
            packs: RwLock::new(BTreeMap::new()),
            delta_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Opens an object database and loads every `objects/pack/*.idx`.
    ///
    /// Packs that fail to load are skipped with a warning.
    pub fn open(storage: S, options: OdbOptions) -> Result<Self> {
        let odb = Self::new(storage, options);
        for file in odb.loose.storage().readdir(PACK_DIR)? {
            let Some(name) = file.strip_suffix(".idx") else {
                continue;
            };
            if let Err(e) = odb.load_pack(name) {
                warn!(pack = name, error = %e, "skipping unreadable pack");
            }
        }
        debug!(packs = odb.packs.read().len(), "opened object database");
        Ok(odb)
    }

    /// The loose object store.
    pub fn loose(&self) -> &LooseStore<S> {
        &self.loose
    }

    /// Loads `objects/pack/<name>.{idx,pack}` and registers the pack.
    pub fn load_pack(&self, name: &str) -> Result<Arc<Pack>> {
        if let Some(pack) = self.packs.read().get(name) {
            return Ok(Arc::clone(pack));
        }
        let storage = self.loose.storage();
        let idx_path = format!("{PACK_DIR}/{name}.idx");
        let pack_path = format!("{PACK_DIR}/{name}.pack");
        let idx = storage
            .read(&idx_path)?
            .ok_or_else(|| OdbError::Format(format!("missing {idx_path}")))?;
        let data = storage
            .read(&pack_path)?
            .ok_or_else(|| OdbError::Format(format!("missing {pack_path}")))?;

        let index = PackIndex::parse(&idx)?;
        let pack = Pack::new(name, data, index)?;
        debug!(pack = name, objects = pack.index().len(), "loaded pack");
        Ok(self.register(pack))
    }

    /// Registers an already verified pack held in memory.
    pub fn add_pack(&self, pack: Pack) -> Arc<Pack> {
        self.register(pack)
    }

    fn register(&self, pack: Pack) -> Arc<Pack> {
        let pack = Arc::new(pack);
        self.packs
            .write()
            .insert(pack.name().to_string(), Arc::clone(&pack));
        pack
    }

    /// Names of the loaded packs, sorted.
    pub fn pack_names(&self) -> Vec<String> {
        self.packs.read().keys().cloned().collect()
    }

    fn packs(&self) -> Vec<Arc<Pack>> {
        self.packs.read().values().cloned().collect()
    }

    /// Checks whether an object exists loose or in any pack.
    pub fn has(&self, id: &ObjectId) -> Result<bool> {
        if self.loose.has(id)? {
            return Ok(true);
        }
        Ok(self.locate(id).is_some())
    }

    /// Reads an object by id.
    pub fn read(&self, id: &ObjectId) -> Result<Object> {
        match self.loose.read(id) {
            Ok(object) => return Ok(object),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let (pack, offset) = self.locate(id).ok_or(OdbError::NotFound(*id))?;
        let object = self.read_pack_entry(&pack, offset)?;
        if object.id != *id {
            return Err(OdbError::integrity(
                "packed object id",
                id.as_bytes(),
                object.id.as_bytes(),
            ));
        }
        Ok(object)
    }

    /// Reads an object and checks its kind.
    pub fn read_kind(&self, id: &ObjectId, kind: ObjectKind) -> Result<Object> {
        let object = self.read(id)?;
        if object.kind != kind {
            return Err(OdbError::Format(format!(
                "object {id} is a {}, expected {kind}",
                object.kind
            )));
        }
        Ok(object)
    }

    fn locate(&self, id: &ObjectId) -> Option<(Arc<Pack>, u64)> {
        self.packs
            .read()
            .values()
            .find_map(|pack| pack.index().lookup(id).map(|offset| (Arc::clone(pack), offset)))
    }

    /// Walks the delta chain down to a full object, then applies the deltas upward.
    fn read_pack_entry(&self, pack: &Arc<Pack>, offset: u64) -> Result<Object> {
        let mut pending: Vec<(Arc<Pack>, u64, Vec<u8>)> = Vec::new();
        let mut ref_bases: Vec<ObjectId> = Vec::new();
        let mut pack = Arc::clone(pack);
        let mut offset = offset;

        let (base, base_key) = loop {
            if pending.len() > MAX_DELTA_DEPTH {
                return Err(OdbError::Format(format!(
                    "delta chain deeper than {MAX_DELTA_DEPTH}"
                )));
            }
            let key = (*pack.checksum(), offset);
            if let Some(hit) = self.delta_cache.lock().get(&key) {
                break (hit.clone(), None);
            }

            let entry = pack.entry_at(offset)?;
            match entry.kind {
                EntryKind::Full(kind) => break (Object::new(kind, entry.data), Some(key)),
                EntryKind::OfsDelta { base_offset } => {
                    pending.push((Arc::clone(&pack), offset, entry.data));
                    offset = base_offset;
                }
                EntryKind::RefDelta { base } => {
                    pending.push((Arc::clone(&pack), offset, entry.data));
                    if ref_bases.contains(&base) {
                        return Err(OdbError::Format(format!(
                            "delta chain revisits {base}"
                        )));
                    }
                    ref_bases.push(base);

                    match self.loose.read(&base) {
                        Ok(object) => break (object, None),
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                    (pack, offset) = self.locate(&base).ok_or(OdbError::NotFound(base))?;
                }
            }
        };

        trace!(depth = pending.len(), "resolving packed object");
        let mut object = base;
        if let Some(key) = base_key.filter(|_| !pending.is_empty()) {
            self.delta_cache.lock().put(key, object.clone());
        }
        for (pack, offset, delta) in pending.into_iter().rev() {
            let data = apply_delta(&object.data, &delta)?;
            object = Object::new(object.kind, data);
            self.delta_cache
                .lock()
                .put((*pack.checksum(), offset), object.clone());
        }
        Ok(object)
    }

    /// Expands a short hex id to the single object it names.
    pub fn expand(&self, short: &str) -> Result<ObjectId> {
        let prefix = OidPrefix::parse(short)?;

        let mut candidates: BTreeSet<ObjectId> =
            self.loose.list_prefix(&prefix)?.into_iter().collect();
        for pack in self.packs() {
            candidates.extend(pack.index().expand_prefix(&prefix));
        }

        let mut candidates = candidates.into_iter();
        match (candidates.next(), candidates.next()) {
            (None, _) => Err(OdbError::ShortOidNotFound(prefix.to_string())),
            (Some(id), None) => Ok(id),
            (Some(first), Some(second)) => {
                let mut all = vec![first, second];
                all.extend(candidates);
                Err(OdbError::AmbiguousShortOid {
                    prefix: prefix.to_string(),
                    candidates: all,
                })
            }
        }
    }

    /// Writes a loose object and returns its id.
    pub fn write(&self, kind: ObjectKind, payload: &[u8]) -> Result<ObjectId> {
        self.loose.write(kind, payload)
    }

    /// Resolves a received pack and stores every object loose.
    ///
    /// Nothing is written unless the whole pack resolves and its checksum
    /// matches.
    pub fn unpack(&self, data: &[u8]) -> Result<Vec<ObjectId>> {
        let unpacked = resolve_pack(data, self)?;
        let mut ids = Vec::with_capacity(unpacked.objects.len());
        for object in &unpacked.objects {
            ids.push(self.loose.write_object(object)?);
        }
        debug!(objects = ids.len(), "unpacked pack into loose objects");
        Ok(ids)
    }

    /// Verifies a received pack, writes it with a freshly built index, and
    /// registers it.
    ///
    /// The `.idx` is written after the `.pack`, so `open` never finds an
    /// index whose pack is incomplete.
    pub fn index_pack(&self, data: &[u8]) -> Result<PackInfo> {
        let unpacked = resolve_pack(data, self)?;
        let index = unpacked.index();
        let name = format!("pack-{}", hex::encode(unpacked.checksum));

        let storage = self.loose.storage();
        storage.mkdir(PACK_DIR)?;
        storage.write(&format!("{PACK_DIR}/{name}.pack"), data)?;
        storage.write(&format!("{PACK_DIR}/{name}.idx"), &index.to_bytes())?;

        let pack = Pack::new(name.clone(), data.to_vec(), index)?;
        self.register(pack);

        debug!(
            pack = %name,
            objects = unpacked.objects.len(),
            external_bases = unpacked.external_bases,
            "indexed pack"
        );
        Ok(PackInfo {
            name,
            checksum: unpacked.checksum,
            ids: unpacked.objects.iter().map(|o| o.id).collect(),
        })
    }
}

impl<S: Storage> BaseResolver for Odb<S> {
    fn resolve_base(&self, id: &ObjectId) -> Result<Option<Object>> {
        match self.read(id) {
            Ok(object) => Ok(Some(object)),
            Err(OdbError::NotFound(missing)) if missing == *id => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<S> std::fmt::Debug for Odb<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Odb")
            .field("packs", &self.packs.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::PackBuilder;
    use crate::storage::MemoryStorage;

    fn odb() -> Odb<MemoryStorage> {
        Odb::new(MemoryStorage::new(), OdbOptions::default())
    }

    fn text(n: usize) -> Object {
        let mut body = String::new();
        for line in 0..100 {
            body.push_str(&format!("{line}: some repeated content\n"));
        }
        body.push_str(&format!("revision {n}\n"));
        Object::blob(body.into_bytes())
    }

    #[test]
    fn test_read_prefers_loose_then_packs() {
        let odb = odb();
        let loose_id = odb.write(ObjectKind::Blob, b"loose").unwrap();

        let packed = Object::blob(b"packed".to_vec());
        let mut builder = PackBuilder::new();
        builder.add(packed.clone());
        let info = odb.index_pack(&builder.build().unwrap().data).unwrap();
        assert_eq!(info.ids, vec![packed.id]);

        assert_eq!(odb.read(&loose_id).unwrap().data.as_ref(), b"loose");
        assert_eq!(odb.read(&packed.id).unwrap(), packed);
        assert!(odb.has(&packed.id).unwrap());
        assert!(!odb.loose().has(&packed.id).unwrap());
    }

    #[test]
    fn test_read_missing() {
        let odb = odb();
        let err = odb.read(&ObjectId::from_bytes([7; 20])).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_read_delta_chain_from_pack() {
        let odb = odb();
        let (v1, v2, v3) = (text(1), text(2), text(3));
        let mut builder = PackBuilder::new().with_ofs_delta(true);
        builder.add(v1.clone());
        builder.add_delta(&v1, v2.clone());
        builder.add_delta(&v2, v3.clone());
        odb.index_pack(&builder.build().unwrap().data).unwrap();

        assert_eq!(odb.read(&v3.id).unwrap(), v3);
        // Served from the delta cache the second time.
        assert_eq!(odb.read(&v3.id).unwrap(), v3);
        assert_eq!(odb.read(&v2.id).unwrap(), v2);
    }

    #[test]
    fn test_ref_delta_base_in_loose_store() {
        let odb = odb();
        let (v1, v2) = (text(1), text(2));
        odb.loose().write_object(&v1).unwrap();

        let mut builder = PackBuilder::new();
        builder.add_delta(&v1, v2.clone());
        let info = odb.index_pack(&builder.build().unwrap().data).unwrap();
        assert_eq!(info.ids, vec![v2.id]);
        assert_eq!(odb.read(&v2.id).unwrap(), v2);
    }

    #[test]
    fn test_unpack_writes_loose_objects() {
        let odb = odb();
        let (v1, v2) = (text(1), text(2));
        let mut builder = PackBuilder::new();
        builder.add(v1.clone());
        builder.add_delta(&v1, v2.clone());

        let ids = odb.unpack(&builder.build().unwrap().data).unwrap();
        assert_eq!(ids, vec![v1.id, v2.id]);
        assert!(odb.loose().has(&v2.id).unwrap());
        assert!(odb.pack_names().is_empty());
    }

    #[test]
    fn test_bad_pack_leaves_no_objects() {
        let odb = odb();
        let mut builder = PackBuilder::new();
        builder.add(text(1));
        builder.add(text(2));
        let mut data = builder.build().unwrap().data;
        let last = data.len() - 1;
        data[last] ^= 0x55;

        assert!(odb.unpack(&data).is_err());
        assert!(odb.index_pack(&data).is_err());
        assert!(odb.loose().list().unwrap().is_empty());
        assert!(odb.pack_names().is_empty());
        assert_eq!(odb.loose().storage().file_count(), 0);
    }

    #[test]
    fn test_expand_not_found() {
        let odb = odb();
        assert!(matches!(
            odb.expand("abcd").unwrap_err(),
            OdbError::ShortOidNotFound(p) if p == "abcd"
        ));
        assert!(matches!(
            odb.expand("xyz").unwrap_err(),
            OdbError::InvalidObjectId(_)
        ));
    }

    #[test]
    fn test_expand_across_loose_and_packs() {
        let odb = odb();
        let loose_id = odb.write(ObjectKind::Blob, b"in loose").unwrap();
        let packed = Object::blob(b"in pack".to_vec());
        let mut builder = PackBuilder::new();
        builder.add(packed.clone());
        odb.index_pack(&builder.build().unwrap().data).unwrap();

        assert_eq!(odb.expand(&loose_id.to_hex()[..10]).unwrap(), loose_id);
        assert_eq!(odb.expand(&packed.id.to_hex()[..10]).unwrap(), packed.id);
        assert_eq!(odb.expand(&packed.id.to_hex()).unwrap(), packed.id);
    }

    #[test]
    fn test_open_reloads_packs() {
        let storage = Arc::new(MemoryStorage::new());
        let object = text(9);
        {
            let odb = Odb::new(Arc::clone(&storage), OdbOptions::default());
            let mut builder = PackBuilder::new();
            builder.add(object.clone());
            odb.index_pack(&builder.build().unwrap().data).unwrap();
        }

        let reopened = Odb::open(storage, OdbOptions::default()).unwrap();
        assert_eq!(reopened.pack_names().len(), 1);
        assert_eq!(reopened.read(&object.id).unwrap(), object);
    }

    #[test]
    fn test_open_skips_broken_pack() {
        let storage = Arc::new(MemoryStorage::new());
        storage.mkdir(PACK_DIR).unwrap();
        storage
            .write(&format!("{PACK_DIR}/pack-broken.idx"), b"garbage")
            .unwrap();

        let odb = Odb::open(storage, OdbOptions::default()).unwrap();
        assert!(odb.pack_names().is_empty());
    }

    #[test]
    fn test_read_kind() {
        let odb = odb();
        let id = odb.write(ObjectKind::Tree, b"").unwrap();
        assert!(odb.read_kind(&id, ObjectKind::Tree).is_ok());
        assert!(matches!(
            odb.read_kind(&id, ObjectKind::Blob).unwrap_err(),
            OdbError::Format(_)
        ));
    }
}
