//! Unified error type for the archive engine.
//!
//! Parse-time structural failures are fatal: `open` never returns a
//! partially-usable [`crate::Archive`].  Entry-level conditions
//! ([`ArcError::EntryNotFound`], [`ArcError::EntryAlreadyExists`]) are local
//! and recoverable per entry.

use std::io;
use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum ArcError {
    /// The header's (magic, version) pair matches no known format.
    #[error("Unknown archive format (magic {magic:#06x}, version {version})")]
    UnknownFormat { magic: u16, version: u16 },

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Entry already exists: {0}")]
    EntryAlreadyExists(String),

    /// Mutation attempted in read mode, or an operation a stream variant
    /// does not support.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// The serialized directory no longer fits in the reserved header area.
    /// The caller must recreate the archive with a larger reserve.
    #[error("Serialized directory needs {needed} B but the header area reserves {reserved} B")]
    HeaderAreaTooSmall { needed: u64, reserved: u64 },

    #[error("Invalid entry name {name:?}: {reason}")]
    InvalidEntryName { name: String, reason: &'static str },

    /// Structural corruption detected while parsing.  Fatal at open.
    #[error("Corrupt archive: {0}")]
    Corrupt(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ArcError>;
