//! Git object identifiers, kinds and in-memory objects.

use crate::{OdbError, Result};
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// A 20-byte SHA-1 object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Length of an object id in bytes.
    pub const LEN: usize = 20;
    /// Length of an object id in hex characters.
    pub const HEX_LEN: usize = 40;

    /// Creates an ObjectId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an ObjectId from a byte slice that must be exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 20] = bytes.try_into().map_err(|_| {
            OdbError::InvalidObjectId(format!("expected 20 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Creates an ObjectId from a 40-character hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != Self::HEX_LEN {
            return Err(OdbError::InvalidObjectId(format!(
                "invalid object id length: {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| OdbError::InvalidObjectId(format!("{hex}: {e}")))?;
        Ok(Self(bytes))
    }

    /// The all-zero id git uses for "no object".
    pub const fn zero() -> Self {
        Self([0u8; 20])
    }

    /// Returns true for the all-zero id.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns the first byte, which selects the fan-out bucket.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Computes the SHA-1 of `"<kind> <len>\0" ++ data`.
    pub fn hash_object(kind: ObjectKind, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(kind.header(data.len()));
        hasher.update(data);
        Self(hasher.finalize().into())
    }
}

impl FromStr for ObjectId {
    type Err = OdbError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// An abbreviated object id: 1 to 40 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidPrefix {
    hex: String,
}

impl OidPrefix {
    /// Parses a short id. Upper-case digits are accepted and normalized.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > ObjectId::HEX_LEN {
            return Err(OdbError::InvalidObjectId(format!(
                "short id must be 1..=40 hex digits, got {:?}",
                s
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(OdbError::InvalidObjectId(format!("not hex: {s:?}")));
        }
        Ok(Self {
            hex: s.to_ascii_lowercase(),
        })
    }

    /// Returns the normalized hex digits.
    pub fn as_str(&self) -> &str {
        &self.hex
    }

    /// Number of hex digits in the prefix.
    pub fn len(&self) -> usize {
        self.hex.len()
    }

    /// Always false; a parsed prefix has at least one digit.
    pub fn is_empty(&self) -> bool {
        self.hex.is_empty()
    }

    /// Returns true if `id` starts with this prefix.
    pub fn matches(&self, id: &ObjectId) -> bool {
        id.to_hex().starts_with(&self.hex)
    }

    /// Range of first bytes (fan-out buckets) an id with this prefix can have.
    pub fn first_byte_range(&self) -> RangeInclusive<u8> {
        let digits = self.hex.as_bytes();
        let nibble = |c: u8| (c as char).to_digit(16).unwrap_or(0) as u8;
        if digits.len() >= 2 {
            let b = (nibble(digits[0]) << 4) | nibble(digits[1]);
            b..=b
        } else {
            let hi = nibble(digits[0]) << 4;
            hi..=(hi | 0x0f)
        }
    }
}

impl fmt::Display for OidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Git object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Commit object.
    Commit,
    /// Directory listing.
    Tree,
    /// File content.
    Blob,
    /// Annotated tag.
    Tag,
}

impl ObjectKind {
    /// Returns the name used in object headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    /// Parses an object kind from its header name.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "commit" => Ok(Self::Commit),
            "tree" => Ok(Self::Tree),
            "blob" => Ok(Self::Blob),
            "tag" => Ok(Self::Tag),
            _ => Err(OdbError::Format(format!("unknown object kind: {s:?}"))),
        }
    }

    /// Returns the type code used in pack entry headers.
    pub fn pack_type(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    /// Parses an object kind from a pack type code.
    pub fn from_pack_type(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Commit),
            2 => Ok(Self::Tree),
            3 => Ok(Self::Blob),
            4 => Ok(Self::Tag),
            _ => Err(OdbError::Format(format!("unknown pack type: {code}"))),
        }
    }

    /// Builds the framing header `"<kind> <len>\0"`.
    pub fn header(&self, len: usize) -> Vec<u8> {
        format!("{} {}\0", self.as_str(), len).into_bytes()
    }
}

impl FromStr for ObjectKind {
    type Err = OdbError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable git object with its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// The object's id (SHA-1 of the framed content).
    pub id: ObjectId,
    /// The kind of object.
    pub kind: ObjectKind,
    /// The payload, without the framing header.
    pub data: Bytes,
}

impl Object {
    /// Creates an object, computing its id from the data.
    pub fn new(kind: ObjectKind, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let id = ObjectId::hash_object(kind, &data);
        Self { id, kind, data }
    }

    /// Creates a blob object.
    pub fn blob(content: impl Into<Bytes>) -> Self {
        Self::new(ObjectKind::Blob, content)
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
