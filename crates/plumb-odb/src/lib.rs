//! Git object database for Plumb.
//!
//! This crate stores and reads Git objects: loose objects under
//! `objects/xx/...`, pack files with their v2 indexes, and the delta
//! encoding packs use. [`Odb`] ties them together behind one reader.
//!
//! All file access goes through the [`Storage`] capability, so the same code
//! runs against a real git directory ([`FsStorage`]) or memory
//! ([`MemoryStorage`]).

pub mod codec;
pub mod delta;
mod error;
pub mod index;
pub mod loose;
mod object;
mod odb;
pub mod pack;
pub mod storage;

pub use codec::CompressionLevel;
pub use delta::{apply_delta, create_delta, Delta, DeltaInstruction};
pub use error::OdbError;
pub use index::{PackIndex, PackIndexEntry};
pub use loose::LooseStore;
pub use object::{Object, ObjectId, ObjectKind, OidPrefix};
pub use odb::{Odb, OdbOptions, PackInfo, MAX_DELTA_DEPTH};
pub use pack::{resolve_pack, BaseResolver, BuiltPack, NoExternalBases, Pack, PackBuilder, UnpackedPack};
pub use storage::{FsStorage, MemoryStorage, Storage};

/// Result type for object database operations.
pub type Result<T> = std::result::Result<T, OdbError>;
