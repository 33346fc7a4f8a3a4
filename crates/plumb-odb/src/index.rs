//! Pack index (version 2).
//!
//! Layout:
//! - `\377tOc` magic and version 2
//! - Fan-out table: 256 big-endian u32, entry `i` counts ids with first byte <= i
//! - Sorted 20-byte object ids
//! - Parallel CRC32 table
//! - Parallel 4-byte offset table; MSB set means "index into the 8-byte table"
//! - 8-byte offset table for offsets >= 2^31
//! - Pack checksum, then SHA-1 of everything before it
//!
//! See: https://git-scm.com/docs/pack-format

use crate::{ObjectId, OdbError, OidPrefix, Result};
use sha1::{Digest, Sha1};

const IDX_SIGNATURE: &[u8; 4] = b"\xfftOc";
const IDX_VERSION: u32 = 2;
const FANOUT_LEN: usize = 256 * 4;
const HEADER_LEN: usize = 8;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// One indexed pack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackIndexEntry {
    /// Id of the (resolved) object stored at `offset`.
    pub id: ObjectId,
    /// Byte offset of the entry header in the pack.
    pub offset: u64,
    /// CRC32 of the raw entry bytes (header plus compressed data).
    pub crc32: u32,
}

/// Immutable id -> offset table for one pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackIndex {
    fan_out: [u32; 256],
    ids: Vec<ObjectId>,
    crc32s: Vec<u32>,
    offsets: Vec<u64>,
    pack_checksum: [u8; 20],
}

impl PackIndex {
    /// Builds an index from pack entries and the pack's trailing checksum.
    pub fn build(mut entries: Vec<PackIndexEntry>, pack_checksum: [u8; 20]) -> Self {
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries.dedup_by(|a, b| a.id == b.id);

        let mut fan_out = [0u32; 256];
        for entry in &entries {
            fan_out[entry.id.first_byte() as usize] += 1;
        }
        let mut running = 0u32;
        for slot in fan_out.iter_mut() {
            running += *slot;
            *slot = running;
        }

        Self {
            fan_out,
            ids: entries.iter().map(|e| e.id).collect(),
            crc32s: entries.iter().map(|e| e.crc32).collect(),
            offsets: entries.iter().map(|e| e.offset).collect(),
            pack_checksum,
        }
    }

    /// Parses and verifies a `.idx` file.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN + FANOUT_LEN + 40 {
            return Err(OdbError::Format("pack index too short".to_string()));
        }
        if &data[0..4] != IDX_SIGNATURE {
            return Err(OdbError::Format("invalid pack index signature".to_string()));
        }
        let version = read_u32(data, 4);
        if version != IDX_VERSION {
            return Err(OdbError::Format(format!(
                "unsupported pack index version: {version}"
            )));
        }

        let checksum_start = data.len() - 20;
        let computed: [u8; 20] = Sha1::digest(&data[..checksum_start]).into();
        if computed[..] != data[checksum_start..] {
            return Err(OdbError::integrity(
                "pack index checksum",
                &data[checksum_start..],
                &computed,
            ));
        }

        let mut fan_out = [0u32; 256];
        let mut previous = 0;
        for (i, slot) in fan_out.iter_mut().enumerate() {
            *slot = read_u32(data, HEADER_LEN + i * 4);
            if *slot < previous {
                return Err(OdbError::Format(format!(
                    "pack index fan-out decreases at bucket {i}"
                )));
            }
            previous = *slot;
        }

        let count = fan_out[255] as usize;
        let ids_start = HEADER_LEN + FANOUT_LEN;
        let crc_start = ids_start + count * 20;
        let offset_start = crc_start + count * 4;
        let large_start = offset_start + count * 4;
        let trailer_start = data.len() - 40;
        if large_start > trailer_start {
            return Err(OdbError::Format("pack index truncated".to_string()));
        }
        let large_count = (trailer_start - large_start) / 8;

        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let id = ObjectId::from_slice(&data[ids_start + i * 20..ids_start + (i + 1) * 20])?;
            if ids.last().is_some_and(|prev| *prev >= id) {
                return Err(OdbError::Format("pack index ids are not sorted".to_string()));
            }
            ids.push(id);
        }

        let crc32s = (0..count).map(|i| read_u32(data, crc_start + i * 4)).collect();

        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let raw = read_u32(data, offset_start + i * 4);
            if raw & LARGE_OFFSET_FLAG == 0 {
                offsets.push(u64::from(raw));
            } else {
                let slot = (raw & !LARGE_OFFSET_FLAG) as usize;
                if slot >= large_count {
                    return Err(OdbError::Format(format!(
                        "large offset slot {slot} out of range"
                    )));
                }
                offsets.push(read_u64(data, large_start + slot * 8));
            }
        }

        let mut pack_checksum = [0u8; 20];
        pack_checksum.copy_from_slice(&data[trailer_start..checksum_start]);

        let index = Self {
            fan_out,
            ids,
            crc32s,
            offsets,
            pack_checksum,
        };
        index.check_buckets()?;
        Ok(index)
    }

    /// Serializes to the `.idx` v2 format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + FANOUT_LEN + self.ids.len() * 28 + 40);
        buf.extend_from_slice(IDX_SIGNATURE);
        buf.extend_from_slice(&IDX_VERSION.to_be_bytes());
        for count in &self.fan_out {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        for id in &self.ids {
            buf.extend_from_slice(id.as_bytes());
        }
        for crc in &self.crc32s {
            buf.extend_from_slice(&crc.to_be_bytes());
        }

        let mut large = Vec::new();
        for &offset in &self.offsets {
            if offset < u64::from(LARGE_OFFSET_FLAG) {
                buf.extend_from_slice(&(offset as u32).to_be_bytes());
            } else {
                let slot = large.len() as u32 | LARGE_OFFSET_FLAG;
                buf.extend_from_slice(&slot.to_be_bytes());
                large.push(offset);
            }
        }
        for offset in large {
            buf.extend_from_slice(&offset.to_be_bytes());
        }

        buf.extend_from_slice(&self.pack_checksum);
        let checksum: [u8; 20] = Sha1::digest(&buf).into();
        buf.extend_from_slice(&checksum);
        buf
    }

    /// Looks up the pack offset of an object.
    pub fn lookup(&self, id: &ObjectId) -> Option<u64> {
        self.position(id).map(|pos| self.offsets[pos])
    }

    /// Looks up the full index entry of an object.
    pub fn entry(&self, id: &ObjectId) -> Option<PackIndexEntry> {
        self.position(id).map(|pos| self.entry_at(pos))
    }

    /// Checks if an object is in this pack.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.position(id).is_some()
    }

    /// Returns every id in the pack starting with `prefix`.
    pub fn expand_prefix(&self, prefix: &OidPrefix) -> Vec<ObjectId> {
        let range = prefix.first_byte_range();
        let (start, _) = self.bucket(*range.start());
        let (_, end) = self.bucket(*range.end());
        self.ids[start..end]
            .iter()
            .filter(|id| prefix.matches(id))
            .copied()
            .collect()
    }

    /// Total object count.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the pack holds no objects.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Checksum of the pack this index describes.
    pub fn pack_checksum(&self) -> &[u8; 20] {
        &self.pack_checksum
    }

    /// Iterates over all entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = PackIndexEntry> + '_ {
        (0..self.ids.len()).map(|pos| self.entry_at(pos))
    }

    fn entry_at(&self, pos: usize) -> PackIndexEntry {
        PackIndexEntry {
            id: self.ids[pos],
            offset: self.offsets[pos],
            crc32: self.crc32s[pos],
        }
    }

    /// Half-open range of table positions for ids starting with `byte`.
    fn bucket(&self, byte: u8) -> (usize, usize) {
        let byte = byte as usize;
        let start = if byte == 0 {
            0
        } else {
            self.fan_out[byte - 1] as usize
        };
        (start, self.fan_out[byte] as usize)
    }

    fn position(&self, id: &ObjectId) -> Option<usize> {
        let (start, end) = self.bucket(id.first_byte());
        self.ids[start..end]
            .binary_search(id)
            .ok()
            .map(|pos| start + pos)
    }

    /// Every id must sit inside the bucket its first byte selects.
    fn check_buckets(&self) -> Result<()> {
        for byte in 0..=255u8 {
            let (start, end) = self.bucket(byte);
            if self.ids[start..end].iter().any(|id| id.first_byte() != byte) {
                return Err(OdbError::Format(format!(
                    "pack index fan-out bucket {byte:02x} is inconsistent"
                )));
            }
        }
        Ok(())
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(first: u8, rest: u8) -> ObjectId {
        let mut bytes = [rest; 20];
        bytes[0] = first;
        ObjectId::from_bytes(bytes)
    }

    fn sample() -> PackIndex {
        let entries = vec![
            PackIndexEntry { id: id(0xab, 1), offset: 12, crc32: 1 },
            PackIndexEntry { id: id(0x00, 9), offset: 40, crc32: 2 },
            PackIndexEntry { id: id(0xab, 2), offset: 99, crc32: 3 },
            PackIndexEntry { id: id(0xff, 0), offset: 5 << 31, crc32: 4 },
        ];
        PackIndex::build(entries, [7u8; 20])
    }

    #[test]
    fn test_lookup() {
        let index = sample();
        assert_eq!(index.len(), 4);
        assert_eq!(index.lookup(&id(0xab, 1)), Some(12));
        assert_eq!(index.lookup(&id(0xab, 2)), Some(99));
        assert_eq!(index.lookup(&id(0x00, 9)), Some(40));
        assert_eq!(index.lookup(&id(0xff, 0)), Some(5 << 31));
        assert_eq!(index.lookup(&id(0xab, 3)), None);
        assert_eq!(index.entry(&id(0xab, 2)).unwrap().crc32, 3);
    }

    #[test]
    fn test_serialize_roundtrip_with_large_offsets() {
        let index = sample();
        let bytes = index.to_bytes();
        let parsed = PackIndex::parse(&bytes).unwrap();
        assert_eq!(parsed, index);
        assert_eq!(parsed.pack_checksum(), &[7u8; 20]);
    }

    #[test]
    fn test_parse_rejects_corruption() {
        let mut bytes = sample().to_bytes();
        bytes[HEADER_LEN + FANOUT_LEN + 3] ^= 0x01;
        assert!(matches!(
            PackIndex::parse(&bytes).unwrap_err(),
            OdbError::Integrity { .. }
        ));
    }

    #[test]
    fn test_parse_rejects_bad_header() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert!(PackIndex::parse(&bytes).is_err());
        assert!(PackIndex::parse(&bytes[..100]).is_err());
    }

    #[test]
    fn test_expand_prefix() {
        let index = sample();
        assert_eq!(index.expand_prefix(&OidPrefix::parse("ab").unwrap()).len(), 2);
        assert_eq!(
            index.expand_prefix(&OidPrefix::parse("ab02").unwrap()),
            vec![id(0xab, 2)]
        );
        assert_eq!(index.expand_prefix(&OidPrefix::parse("a").unwrap()).len(), 2);
        assert!(index.expand_prefix(&OidPrefix::parse("12").unwrap()).is_empty());
    }

    #[test]
    fn test_empty_index() {
        let index = PackIndex::build(Vec::new(), [0u8; 20]);
        assert!(index.is_empty());
        let parsed = PackIndex::parse(&index.to_bytes()).unwrap();
        assert!(parsed.is_empty());
        assert_eq!(parsed.lookup(&id(1, 1)), None);
    }
}
