//! Git pack file format: entry codec, pack builder and delta resolution.
//!
//! A pack is `"PACK"`, version 2, a big-endian entry count, the entries, and
//! the SHA-1 of everything before it.
//! See: https://git-scm.com/docs/pack-format

use crate::delta::{apply_delta, create_delta};
use crate::index::{PackIndex, PackIndexEntry};
use crate::{CompressionLevel, Object, ObjectId, ObjectKind, OdbError, Result};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use tracing::{debug, trace};

/// Magic bytes at the start of a pack file.
const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Pack file version we support.
const PACK_VERSION: u32 = 2;
/// Signature, version and entry count.
const PACK_HEADER_LEN: usize = 12;
/// Trailing SHA-1.
const PACK_TRAILER_LEN: usize = 20;

const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;

/// What a pack entry stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A complete object.
    Full(ObjectKind),
    /// A delta against the entry at `base_offset` in the same pack.
    OfsDelta {
        /// Absolute offset of the base entry; always below the delta's offset.
        base_offset: u64,
    },
    /// A delta against the object named by id.
    RefDelta {
        /// Id of the base object.
        base: ObjectId,
    },
}

/// One pack entry with its payload inflated but not resolved.
#[derive(Debug, Clone)]
pub struct RawEntry {
    /// Offset of the entry header.
    pub offset: u64,
    /// Offset one past the entry's compressed data.
    pub end: u64,
    /// Entry type.
    pub kind: EntryKind,
    /// Inflated payload: object data, or delta instructions.
    pub data: Vec<u8>,
}

/// Validates the pack header and returns the declared entry count.
pub fn parse_header(data: &[u8]) -> Result<u32> {
    if data.len() < PACK_HEADER_LEN + PACK_TRAILER_LEN {
        return Err(OdbError::Format("pack too small".to_string()));
    }
    if &data[0..4] != PACK_SIGNATURE {
        return Err(OdbError::Format("invalid pack signature".to_string()));
    }
    let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if version != PACK_VERSION {
        return Err(OdbError::Format(format!(
            "unsupported pack version: {version}"
        )));
    }
    Ok(u32::from_be_bytes([data[8], data[9], data[10], data[11]]))
}

/// Returns the trailing checksum of a pack.
pub fn trailer(data: &[u8]) -> Result<[u8; 20]> {
    let start = data
        .len()
        .checked_sub(PACK_TRAILER_LEN)
        .ok_or_else(|| OdbError::Format("pack too small".to_string()))?;
    let mut checksum = [0u8; 20];
    checksum.copy_from_slice(&data[start..]);
    Ok(checksum)
}

/// Checks the trailing SHA-1 of a whole pack.
pub fn verify_checksum(data: &[u8]) -> Result<[u8; 20]> {
    let expected = trailer(data)?;
    let computed: [u8; 20] = Sha1::digest(&data[..data.len() - PACK_TRAILER_LEN]).into();
    if computed != expected {
        return Err(OdbError::integrity("pack checksum", &expected, &computed));
    }
    Ok(expected)
}

/// Decodes the entry starting at `offset`; compressed data must end before `data_end`.
pub fn read_entry(pack: &[u8], offset: u64, data_end: usize) -> Result<RawEntry> {
    let start = usize::try_from(offset)
        .ok()
        .filter(|start| *start >= PACK_HEADER_LEN && *start < data_end)
        .ok_or_else(|| OdbError::Format(format!("entry offset {offset} outside pack data")))?;
    let region = &pack[..data_end];
    let mut pos = start;

    let (type_code, size) = read_type_and_size(region, &mut pos)?;
    let kind = match type_code {
        OFS_DELTA => {
            let relative = read_ofs_offset(region, &mut pos)?;
            let base_offset = offset
                .checked_sub(relative)
                .filter(|_| relative > 0)
                .filter(|base| *base >= PACK_HEADER_LEN as u64)
                .ok_or_else(|| {
                    OdbError::Format(format!(
                        "ofs-delta at {offset} refers to {relative} bytes back, outside the preceding entries"
                    ))
                })?;
            EntryKind::OfsDelta { base_offset }
        }
        REF_DELTA => {
            let bytes = region
                .get(pos..pos + ObjectId::LEN)
                .ok_or_else(|| OdbError::Format("truncated ref-delta base id".to_string()))?;
            pos += ObjectId::LEN;
            EntryKind::RefDelta {
                base: ObjectId::from_slice(bytes)?,
            }
        }
        code => EntryKind::Full(ObjectKind::from_pack_type(code)?),
    };

    let (data, consumed) = inflate(&region[pos..], size)?;
    let end = (pos + consumed) as u64;
    trace!(offset, end, ?kind, size, "read pack entry");
    Ok(RawEntry {
        offset,
        end,
        kind,
        data,
    })
}

/// Entry header: `(MSB=more) (3 bits type) (4 bits size)`, then 7 bits per byte.
fn read_type_and_size(data: &[u8], pos: &mut usize) -> Result<(u8, u64)> {
    let truncated = || OdbError::Format("truncated pack entry header".to_string());
    let first = *data.get(*pos).ok_or_else(truncated)?;
    *pos += 1;

    let type_code = (first >> 4) & 0x07;
    let mut size = u64::from(first & 0x0f);
    let mut shift = 4u32;
    let mut byte = first;
    while byte & 0x80 != 0 {
        byte = *data.get(*pos).ok_or_else(truncated)?;
        *pos += 1;
        if shift > 57 {
            return Err(OdbError::Format("pack entry size too large".to_string()));
        }
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }
    Ok((type_code, size))
}

fn write_type_and_size(out: &mut Vec<u8>, type_code: u8, size: u64) {
    let mut first = (type_code << 4) | (size & 0x0f) as u8;
    let mut remaining = size >> 4;
    if remaining > 0 {
        first |= 0x80;
    }
    out.push(first);
    while remaining > 0 {
        let mut byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

/// Big-endian base-128 with an implicit +1 per continuation byte.
fn read_ofs_offset(data: &[u8], pos: &mut usize) -> Result<u64> {
    let truncated = || OdbError::Format("truncated ofs-delta offset".to_string());
    let mut byte = *data.get(*pos).ok_or_else(truncated)?;
    *pos += 1;
    let mut value = u64::from(byte & 0x7f);
    while byte & 0x80 != 0 {
        byte = *data.get(*pos).ok_or_else(truncated)?;
        *pos += 1;
        if value > (u64::MAX >> 8) {
            return Err(OdbError::Format("ofs-delta offset overflow".to_string()));
        }
        value = ((value + 1) << 7) | u64::from(byte & 0x7f);
    }
    Ok(value)
}

fn write_ofs_offset(out: &mut Vec<u8>, mut value: u64) {
    let mut buf = [0u8; 10];
    let mut i = buf.len() - 1;
    buf[i] = (value & 0x7f) as u8;
    value >>= 7;
    while value > 0 {
        value -= 1;
        i -= 1;
        buf[i] = 0x80 | (value & 0x7f) as u8;
        value >>= 7;
    }
    out.extend_from_slice(&buf[i..]);
}

/// Inflates exactly `expected` bytes and reports how much input the stream used.
fn inflate(input: &[u8], expected: u64) -> Result<(Vec<u8>, usize)> {
    let mut decoder = ZlibDecoder::new(input);
    let mut out = Vec::with_capacity(expected.min(1 << 24) as usize);
    decoder
        .by_ref()
        .take(expected + 1)
        .read_to_end(&mut out)
        .map_err(|e| OdbError::Format(format!("decompression failed: {e}")))?;
    if out.len() as u64 != expected {
        return Err(OdbError::Format(format!(
            "pack entry size mismatch: header says {expected}, inflated {}",
            out.len()
        )));
    }
    Ok((out, decoder.total_in() as usize))
}

/// Source of delta bases that live outside the pack being read.
pub trait BaseResolver {
    /// Returns the object with `id`, or `None` if it is unknown.
    fn resolve_base(&self, id: &ObjectId) -> Result<Option<Object>>;
}

/// Resolver for self-contained packs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternalBases;

impl BaseResolver for NoExternalBases {
    fn resolve_base(&self, _id: &ObjectId) -> Result<Option<Object>> {
        Ok(None)
    }
}

/// Every object of a pack, resolved and verified in memory.
#[derive(Debug, Clone)]
pub struct UnpackedPack {
    /// Resolved objects in pack order.
    pub objects: Vec<Object>,
    /// Index entries (id, offset, crc32) in pack order.
    pub entries: Vec<PackIndexEntry>,
    /// The pack's trailing checksum.
    pub checksum: [u8; 20],
    /// Number of ref-delta bases taken from outside the pack.
    pub external_bases: usize,
}

impl UnpackedPack {
    /// Builds the `.idx` for this pack.
    pub fn index(&self) -> PackIndex {
        PackIndex::build(self.entries.clone(), self.checksum)
    }
}

/// Decodes every entry of a pack and resolves all deltas.
///
/// Entries are scanned front to back while a running SHA-1 covers the bytes
/// consumed; the result is only returned once that digest equals the trailer.
/// Ofs-delta bases must precede their delta. Ref-delta bases may appear
/// anywhere in the pack or come from `external`.
pub fn resolve_pack<B: BaseResolver + ?Sized>(data: &[u8], external: &B) -> Result<UnpackedPack> {
    let count = parse_header(data)? as usize;
    let data_end = data.len() - PACK_TRAILER_LEN;

    let mut hasher = Sha1::new();
    hasher.update(&data[..PACK_HEADER_LEN]);

    let mut raw = Vec::with_capacity(count.min(1 << 16));
    let mut crcs = Vec::with_capacity(count.min(1 << 16));
    let mut pos = PACK_HEADER_LEN;
    for n in 0..count {
        if pos >= data_end {
            return Err(OdbError::Format(format!(
                "pack ends after {n} of {count} entries"
            )));
        }
        let entry = read_entry(data, pos as u64, data_end)?;
        let end = entry.end as usize;
        hasher.update(&data[pos..end]);
        crcs.push(crc32fast::hash(&data[pos..end]));
        raw.push(entry);
        pos = end;
    }
    if pos != data_end {
        return Err(OdbError::Format(format!(
            "{} unexpected bytes after the last pack entry",
            data_end - pos
        )));
    }

    let checksum = trailer(data)?;
    let computed: [u8; 20] = hasher.finalize().into();
    if computed != checksum {
        return Err(OdbError::integrity("pack checksum", &checksum, &computed));
    }

    let mut arena = ResolveArena::new(&raw);
    arena.resolve(&mut raw, external)?;

    let objects: Vec<Object> = arena.resolved.into_iter().flatten().collect();
    let entries = objects
        .iter()
        .zip(raw.iter().zip(crcs))
        .map(|(object, (entry, crc32))| PackIndexEntry {
            id: object.id,
            offset: entry.offset,
            crc32,
        })
        .collect();

    debug!(
        objects = objects.len(),
        external_bases = arena.external_hits,
        checksum = %hex::encode(checksum),
        "resolved pack"
    );

    Ok(UnpackedPack {
        objects,
        entries,
        checksum,
        external_bases: arena.external_hits,
    })
}

/// Per-unpack resolution state; dropped when the unpack finishes.
struct ResolveArena {
    resolved: Vec<Option<Object>>,
    by_offset: HashMap<u64, usize>,
    by_id: HashMap<ObjectId, usize>,
    external: HashMap<ObjectId, Object>,
    external_missing: HashSet<ObjectId>,
    external_hits: usize,
}

impl ResolveArena {
    fn new(raw: &[RawEntry]) -> Self {
        Self {
            resolved: vec![None; raw.len()],
            by_offset: raw.iter().enumerate().map(|(i, e)| (e.offset, i)).collect(),
            by_id: HashMap::new(),
            external: HashMap::new(),
            external_missing: HashSet::new(),
            external_hits: 0,
        }
    }

    /// Resolves in passes until every entry is done or a pass makes no progress.
    fn resolve<B: BaseResolver + ?Sized>(&mut self, raw: &mut [RawEntry], external: &B) -> Result<()> {
        let mut pending: Vec<usize> = (0..raw.len()).collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for i in pending {
                match self.try_resolve(&mut raw[i], external)? {
                    Some(object) => {
                        self.by_id.insert(object.id, i);
                        self.resolved[i] = Some(object);
                    }
                    None => deferred.push(i),
                }
            }
            if deferred.len() == before {
                return Err(Self::unresolvable(&raw[deferred[0]]));
            }
            pending = deferred;
        }
        Ok(())
    }

    fn try_resolve<B: BaseResolver + ?Sized>(
        &mut self,
        entry: &mut RawEntry,
        external: &B,
    ) -> Result<Option<Object>> {
        let base = match entry.kind {
            EntryKind::Full(kind) => {
                return Ok(Some(Object::new(kind, std::mem::take(&mut entry.data))));
            }
            EntryKind::OfsDelta { base_offset } => {
                let index = *self.by_offset.get(&base_offset).ok_or_else(|| {
                    OdbError::Format(format!(
                        "ofs-delta at {} points at {base_offset}, which is not an entry",
                        entry.offset
                    ))
                })?;
                self.resolved[index].as_ref()
            }
            EntryKind::RefDelta { base } => self.ref_base(&base, external)?,
        };

        let Some(base) = base else {
            return Ok(None);
        };
        let data = apply_delta(&base.data, &entry.data)?;
        Ok(Some(Object::new(base.kind, data)))
    }

    fn ref_base<B: BaseResolver + ?Sized>(
        &mut self,
        id: &ObjectId,
        external: &B,
    ) -> Result<Option<&Object>> {
        if let Some(&index) = self.by_id.get(id) {
            return Ok(self.resolved[index].as_ref());
        }
        if !self.external.contains_key(id) {
            if self.external_missing.contains(id) {
                return Ok(None);
            }
            match external.resolve_base(id)? {
                Some(object) => {
                    self.external_hits += 1;
                    self.external.insert(*id, object);
                }
                None => {
                    self.external_missing.insert(*id);
                    return Ok(None);
                }
            }
        }
        Ok(self.external.get(id))
    }

    fn unresolvable(entry: &RawEntry) -> OdbError {
        match entry.kind {
            EntryKind::RefDelta { base } => OdbError::NotFound(base),
            _ => OdbError::Format(format!(
                "delta at offset {} has no resolvable base",
                entry.offset
            )),
        }
    }
}

/// A pack stored on disk (or in memory) together with its index.
#[derive(Debug, Clone)]
pub struct Pack {
    name: String,
    data: Bytes,
    index: PackIndex,
}

impl Pack {
    /// Pairs pack bytes with their index; the trailers must agree.
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>, index: PackIndex) -> Result<Self> {
        let data = data.into();
        let count = parse_header(&data)? as usize;
        let checksum = trailer(&data)?;
        if &checksum != index.pack_checksum() {
            return Err(OdbError::integrity(
                "pack checksum recorded in index",
                index.pack_checksum(),
                &checksum,
            ));
        }
        // Duplicate entries collapse in the index, so it can only be shorter.
        if index.len() > count {
            return Err(OdbError::Format(format!(
                "pack holds {count} entries but its index lists {}",
                index.len()
            )));
        }
        Ok(Self {
            name: name.into(),
            data,
            index,
        })
    }

    /// Pack name, `pack-<checksum hex>` for stored packs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pack's index.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// The pack's trailing checksum.
    pub fn checksum(&self) -> &[u8; 20] {
        self.index.pack_checksum()
    }

    /// Raw pack bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Reads the unresolved entry at `offset`.
    pub fn entry_at(&self, offset: u64) -> Result<RawEntry> {
        read_entry(&self.data, offset, self.data.len() - PACK_TRAILER_LEN)
    }

    /// Recomputes the pack checksum and every entry CRC recorded in the index.
    pub fn verify(&self) -> Result<()> {
        verify_checksum(&self.data)?;
        for entry in self.index.entries() {
            let raw = self.entry_at(entry.offset)?;
            let crc = crc32fast::hash(&self.data[entry.offset as usize..raw.end as usize]);
            if crc != entry.crc32 {
                return Err(OdbError::integrity(
                    "pack entry crc32",
                    &entry.crc32.to_be_bytes(),
                    &crc.to_be_bytes(),
                ));
            }
        }
        Ok(())
    }
}

/// A pack produced by [`PackBuilder`].
#[derive(Debug, Clone)]
pub struct BuiltPack {
    /// Complete pack bytes, trailer included.
    pub data: Vec<u8>,
    /// Index describing `data`.
    pub index: PackIndex,
}

enum PendingEntry {
    Full(Object),
    Delta {
        base: ObjectId,
        target: Object,
        delta: Vec<u8>,
    },
}

/// Builds a pack file from a set of objects.
pub struct PackBuilder {
    entries: Vec<PendingEntry>,
    compression: CompressionLevel,
    ofs_delta: bool,
}

impl PackBuilder {
    /// Creates a new pack builder.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            compression: CompressionLevel::Default,
            ofs_delta: false,
        }
    }

    /// Sets the zlib level for entry data.
    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression = level;
        self
    }

    /// Emit ofs-delta entries when the base was written earlier in this pack.
    pub fn with_ofs_delta(mut self, enabled: bool) -> Self {
        self.ofs_delta = enabled;
        self
    }

    /// Adds an object stored whole.
    pub fn add(&mut self, object: Object) {
        self.entries.push(PendingEntry::Full(object));
    }

    /// Adds `target` as a delta against `base`.
    ///
    /// The base does not have to be in this pack (a thin pack).
    pub fn add_delta(&mut self, base: &Object, target: Object) {
        let delta = create_delta(&base.data, &target.data);
        self.entries.push(PendingEntry::Delta {
            base: base.id,
            target,
            delta,
        });
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries were added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the pack file and its index.
    pub fn build(self) -> Result<BuiltPack> {
        let mut pack = Vec::new();

        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());

        let mut offsets: HashMap<ObjectId, u64> = HashMap::new();
        let mut index_entries = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            let offset = pack.len() as u64;
            let (id, payload) = match entry {
                PendingEntry::Full(object) => {
                    write_type_and_size(&mut pack, object.kind.pack_type(), object.size() as u64);
                    (object.id, object.data.as_ref())
                }
                PendingEntry::Delta {
                    base,
                    target,
                    delta,
                } => {
                    match offsets.get(base).filter(|_| self.ofs_delta) {
                        Some(&base_offset) => {
                            write_type_and_size(&mut pack, OFS_DELTA, delta.len() as u64);
                            write_ofs_offset(&mut pack, offset - base_offset);
                        }
                        None => {
                            write_type_and_size(&mut pack, REF_DELTA, delta.len() as u64);
                            pack.extend_from_slice(base.as_bytes());
                        }
                    }
                    (target.id, delta.as_slice())
                }
            };

            let mut encoder = ZlibEncoder::new(Vec::new(), self.compression.to_flate2());
            encoder.write_all(payload)?;
            pack.extend_from_slice(&encoder.finish()?);

            index_entries.push(PackIndexEntry {
                id,
                offset,
                crc32: crc32fast::hash(&pack[offset as usize..]),
            });
            offsets.entry(id).or_insert(offset);
        }

        let checksum: [u8; 20] = Sha1::digest(&pack).into();
        pack.extend_from_slice(&checksum);

        Ok(BuiltPack {
            data: pack,
            index: PackIndex::build(index_entries, checksum),
        })
    }
}

impl Default for PackBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(s: &str) -> Object {
        Object::blob(s.as_bytes().to_vec())
    }

    fn versioned(n: usize) -> Object {
        let mut text = String::new();
        for line in 0..200 {
            text.push_str(&format!("line {line} of a fairly long file\n"));
        }
        text.push_str(&format!("version {n}\n"));
        blob(&text)
    }

    #[test]
    fn test_pack_roundtrip() {
        let mut builder = PackBuilder::new();
        builder.add(blob("Hello, World!"));
        builder.add(blob("Goodbye, World!"));
        let built = builder.build().unwrap();

        let unpacked = resolve_pack(&built.data, &NoExternalBases).unwrap();
        assert_eq!(unpacked.objects.len(), 2);
        assert_eq!(unpacked.objects[0].data.as_ref(), b"Hello, World!");
        assert_eq!(unpacked.index(), built.index);
    }

    #[test]
    fn test_pack_empty() {
        let built = PackBuilder::new().build().unwrap();
        assert_eq!(built.data.len(), 32);
        let unpacked = resolve_pack(&built.data, &NoExternalBases).unwrap();
        assert!(unpacked.objects.is_empty());
    }

    #[test]
    fn test_pack_all_object_kinds() {
        let objects = vec![
            Object::new(ObjectKind::Commit, b"commit content".to_vec()),
            Object::new(ObjectKind::Tree, b"tree content".to_vec()),
            Object::new(ObjectKind::Blob, b"blob content".to_vec()),
            Object::new(ObjectKind::Tag, b"tag content".to_vec()),
        ];
        let mut builder = PackBuilder::new();
        for object in &objects {
            builder.add(object.clone());
        }
        let unpacked = resolve_pack(&builder.build().unwrap().data, &NoExternalBases).unwrap();
        assert_eq!(unpacked.objects, objects);
    }

    #[test]
    fn test_ref_delta_chain() {
        let v1 = versioned(1);
        let v2 = versioned(2);
        let v3 = versioned(3);

        let mut builder = PackBuilder::new();
        builder.add(v1.clone());
        builder.add_delta(&v1, v2.clone());
        builder.add_delta(&v2, v3.clone());
        let built = builder.build().unwrap();

        let unpacked = resolve_pack(&built.data, &NoExternalBases).unwrap();
        assert_eq!(unpacked.objects, vec![v1, v2, v3]);
        assert_eq!(unpacked.external_bases, 0);
    }

    #[test]
    fn test_ref_delta_base_after_delta() {
        let v1 = versioned(1);
        let v2 = versioned(2);

        let mut builder = PackBuilder::new();
        builder.add_delta(&v1, v2.clone());
        builder.add(v1.clone());
        let unpacked = resolve_pack(&builder.build().unwrap().data, &NoExternalBases).unwrap();
        assert_eq!(unpacked.objects, vec![v2, v1]);
    }

    #[test]
    fn test_ofs_delta_chain() {
        let v1 = versioned(1);
        let v2 = versioned(2);
        let v3 = versioned(3);

        let mut builder = PackBuilder::new().with_ofs_delta(true);
        builder.add(v1.clone());
        builder.add_delta(&v1, v2.clone());
        builder.add_delta(&v2, v3.clone());
        let built = builder.build().unwrap();

        let second = built.index.lookup(&v2.id).unwrap();
        let entry = read_entry(&built.data, second, built.data.len() - 20).unwrap();
        assert!(matches!(entry.kind, EntryKind::OfsDelta { .. }));

        let unpacked = resolve_pack(&built.data, &NoExternalBases).unwrap();
        assert_eq!(unpacked.objects, vec![v1, v2, v3]);
    }

    #[test]
    fn test_ofs_delta_forward_reference_rejected() {
        // Hand-craft an ofs-delta whose relative offset is zero (a self reference).
        let mut pack = Vec::new();
        pack.extend_from_slice(b"PACK");
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&1u32.to_be_bytes());
        write_type_and_size(&mut pack, OFS_DELTA, 2);
        write_ofs_offset(&mut pack, 0);
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&[0, 0]).unwrap();
        pack.extend_from_slice(&encoder.finish().unwrap());
        let checksum: [u8; 20] = Sha1::digest(&pack).into();
        pack.extend_from_slice(&checksum);

        assert!(matches!(
            resolve_pack(&pack, &NoExternalBases).unwrap_err(),
            OdbError::Format(_)
        ));
    }

    #[test]
    fn test_thin_pack_needs_external_base() {
        let v1 = versioned(1);
        let v2 = versioned(2);

        let mut builder = PackBuilder::new();
        builder.add_delta(&v1, v2.clone());
        let built = builder.build().unwrap();

        let err = resolve_pack(&built.data, &NoExternalBases).unwrap_err();
        assert!(matches!(err, OdbError::NotFound(id) if id == v1.id));

        struct One(Object);
        impl BaseResolver for One {
            fn resolve_base(&self, id: &ObjectId) -> Result<Option<Object>> {
                Ok((*id == self.0.id).then(|| self.0.clone()))
            }
        }
        let unpacked = resolve_pack(&built.data, &One(v1)).unwrap();
        assert_eq!(unpacked.objects, vec![v2]);
        assert_eq!(unpacked.external_bases, 1);
    }

    #[test]
    fn test_ofs_offset_encoding() {
        for value in [1u64, 127, 128, 16511, 16512, 1 << 20, u32::MAX as u64] {
            let mut buf = Vec::new();
            write_ofs_offset(&mut buf, value);
            let mut pos = 0;
            assert_eq!(read_ofs_offset(&buf, &mut pos).unwrap(), value);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_invalid_signature_and_version() {
        let mut pack = b"PACX".to_vec();
        pack.extend_from_slice(&[0, 0, 0, 2, 0, 0, 0, 0]);
        pack.extend_from_slice(&[0u8; 20]);
        assert!(resolve_pack(&pack, &NoExternalBases).is_err());

        let mut pack = b"PACK".to_vec();
        pack.extend_from_slice(&[0, 0, 0, 99, 0, 0, 0, 0]);
        pack.extend_from_slice(&[0u8; 20]);
        assert!(resolve_pack(&pack, &NoExternalBases).is_err());

        assert!(resolve_pack(&[0u8; 10], &NoExternalBases).is_err());
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut builder = PackBuilder::new();
        builder.add(blob("test"));
        let mut data = builder.build().unwrap().data;
        let len = data.len();
        data[len - 1] ^= 0xff;
        assert!(matches!(
            resolve_pack(&data, &NoExternalBases).unwrap_err(),
            OdbError::Integrity { .. }
        ));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut builder = PackBuilder::new();
        builder.add(blob("test"));
        let mut data = builder.build().unwrap().data;
        let trailer_at = data.len() - 20;
        data.splice(trailer_at..trailer_at, [1, 2, 3]);
        assert!(resolve_pack(&data, &NoExternalBases).is_err());
    }

    #[test]
    fn test_pack_random_access_and_verify() {
        let v1 = versioned(1);
        let mut builder = PackBuilder::new();
        builder.add(v1.clone());
        builder.add(blob("second"));
        let built = builder.build().unwrap();

        let pack = Pack::new("pack-test", built.data.clone(), built.index.clone()).unwrap();
        pack.verify().unwrap();

        let offset = pack.index().lookup(&v1.id).unwrap();
        let entry = pack.entry_at(offset).unwrap();
        assert_eq!(entry.kind, EntryKind::Full(ObjectKind::Blob));
        assert_eq!(entry.data, v1.data.as_ref());
    }

    #[test]
    fn test_pack_rejects_mismatched_index() {
        let mut builder = PackBuilder::new();
        builder.add(blob("a"));
        let built = builder.build().unwrap();
        let other = PackIndex::build(built.index.entries().collect(), [9u8; 20]);
        assert!(Pack::new("pack-x", built.data, other).is_err());
    }

    #[test]
    fn test_pack_large_object() {
        let large: Vec<u8> = (0..1024 * 1024).map(|i| (i % 256) as u8).collect();
        let object = Object::blob(large.clone());
        let mut builder = PackBuilder::new().with_compression(CompressionLevel::Fast);
        builder.add(object.clone());
        let unpacked = resolve_pack(&builder.build().unwrap().data, &NoExternalBases).unwrap();
        assert_eq!(unpacked.objects[0].data.len(), large.len());
        assert_eq!(unpacked.objects[0].id, object.id);
    }
}
