//! Loose object framing and zlib compression.
//!
//! A loose object is the zlib-compressed form of `"<kind> <len>\0" ++ payload`.
//! The object id is the SHA-1 of the uncompressed framed bytes.

use crate::{Object, ObjectId, ObjectKind, OdbError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Deserialize;
use std::io::{Read, Write};

/// Compression level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// No compression
    None,
    /// Fast compression (lower ratio)
    Fast,
    /// Default compression (balanced)
    #[default]
    Default,
    /// Best compression (slower, higher ratio)
    Best,
}

impl CompressionLevel {
    /// Converts to flate2 compression level.
    pub fn to_flate2(self) -> flate2::Compression {
        match self {
            CompressionLevel::None => flate2::Compression::none(),
            CompressionLevel::Fast => flate2::Compression::fast(),
            CompressionLevel::Default => flate2::Compression::default(),
            CompressionLevel::Best => flate2::Compression::best(),
        }
    }
}

/// Result of [`encode`]: the object id plus the bytes to store.
#[derive(Debug, Clone)]
pub struct EncodedObject {
    /// SHA-1 of the framed object.
    pub id: ObjectId,
    /// Compressed framed object, as written to `objects/xx/yyyy...`.
    pub bytes: Vec<u8>,
}

/// Returns `"<kind> <len>\0" ++ payload`.
pub fn frame(kind: ObjectKind, payload: &[u8]) -> Vec<u8> {
    let mut framed = kind.header(payload.len());
    framed.extend_from_slice(payload);
    framed
}

/// Frames, hashes and compresses an object.
pub fn encode(kind: ObjectKind, payload: &[u8], level: CompressionLevel) -> Result<EncodedObject> {
    let framed = frame(kind, payload);
    let id = ObjectId::hash_object(kind, payload);
    let bytes = compress(&framed, level)?;
    Ok(EncodedObject { id, bytes })
}

/// Decompresses and unframes a loose object.
///
/// When `expected` is given the id is recomputed and compared; a mismatch is
/// an [`OdbError::Integrity`] error.
pub fn decode(compressed: &[u8], expected: Option<&ObjectId>) -> Result<Object> {
    let framed = decompress(compressed)?;
    let (kind, payload) = unframe(&framed)?;
    let object = Object::new(kind, payload.to_vec());

    if let Some(expected) = expected {
        if object.id != *expected {
            return Err(OdbError::integrity(
                "object id",
                expected.as_bytes(),
                object.id.as_bytes(),
            ));
        }
    }

    Ok(object)
}

/// Splits a framed object into kind and payload, checking the declared length.
pub fn unframe(framed: &[u8]) -> Result<(ObjectKind, &[u8])> {
    let nul = framed
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| OdbError::Format("missing NUL after object header".to_string()))?;

    let header = std::str::from_utf8(&framed[..nul])
        .map_err(|_| OdbError::Format("object header is not UTF-8".to_string()))?;
    let (kind, len) = header
        .split_once(' ')
        .ok_or_else(|| OdbError::Format(format!("invalid object header: {header:?}")))?;

    let kind = ObjectKind::parse(kind)?;
    if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
        return Err(OdbError::Format(format!("invalid object length: {len:?}")));
    }
    let declared: usize = len
        .parse()
        .map_err(|_| OdbError::Format(format!("object length out of range: {len}")))?;

    let payload = &framed[nul + 1..];
    if payload.len() != declared {
        return Err(OdbError::Format(format!(
            "object length mismatch: header says {declared}, payload has {}",
            payload.len()
        )));
    }

    Ok((kind, payload))
}

/// Compresses data using zlib.
pub fn compress(data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), level.to_flate2());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses a complete zlib stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| OdbError::Format(format!("zlib decompression failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let encoded = encode(ObjectKind::Blob, b"hello\n", CompressionLevel::Default).unwrap();
        assert_eq!(
            encoded.id.to_hex(),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );

        let object = decode(&encoded.bytes, Some(&encoded.id)).unwrap();
        assert_eq!(object.kind, ObjectKind::Blob);
        assert_eq!(object.data.as_ref(), b"hello\n");
    }

    #[test]
    fn test_encode_is_deterministic() {
        let a = encode(ObjectKind::Tree, b"abc", CompressionLevel::Best).unwrap();
        let b = encode(ObjectKind::Tree, b"abc", CompressionLevel::Best).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_decode_rejects_wrong_hash() {
        let encoded = encode(ObjectKind::Blob, b"data", CompressionLevel::Fast).unwrap();
        let other = ObjectId::from_bytes([7u8; 20]);
        let err = decode(&encoded.bytes, Some(&other)).unwrap_err();
        assert!(matches!(err, OdbError::Integrity { .. }));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let bytes = compress(b"blob 10\0short", CompressionLevel::Default).unwrap();
        let err = decode(&bytes, None).unwrap_err();
        assert!(matches!(err, OdbError::Format(_)));
    }

    #[test]
    fn test_unframe_rejects_bad_headers() {
        assert!(unframe(b"blob 3abc").is_err());
        assert!(unframe(b"blob\0").is_err());
        assert!(unframe(b"blob +3\0abc").is_err());
        assert!(unframe(b"widget 3\0abc").is_err());
    }

    #[test]
    fn test_unframe_binary_payload() {
        let framed = frame(ObjectKind::Blob, &[0, 1, 0, 2]);
        let (kind, payload) = unframe(&framed).unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(payload, &[0, 1, 0, 2]);
    }

    #[test]
    fn test_decompress_garbage() {
        assert!(decompress(b"not zlib").is_err());
    }
}
