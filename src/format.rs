//! Closed set of supported archive formats.
//!
//! A format is a frozen (magic, version) pair plus the per-format layout
//! rules derived from it.  The pair is written once at creation and never
//! changes for the lifetime of an archive; readers that see an unknown pair
//! MUST fail immediately.
//!
//! Legality rule enforced by construction: LZ4 chunks carry no end marker,
//! so every LZ4 format must store per-chunk decompressed lengths.  `Gd` is
//! the only LZ4 format and [`Format::has_decompressed_length`] is true for
//! it; there is no way to express an illegal combination.

use crate::codec::Algorithm;

/// `"RA"` little-endian — reads as `AR` in a hex dump.
pub const MAGIC: u16 = 0x4152;

/// Archive format generation.  Determines compression algorithm and the
/// chunk-record encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Version 1 — zlib, no per-chunk decompressed length on disk.
    Tq,
    /// Version 2 — zlib, per-chunk decompressed length present.
    Tqae,
    /// Version 3 — LZ4, per-chunk decompressed length present.
    Gd,
}

impl Format {
    pub fn version(self) -> u16 {
        match self {
            Format::Tq   => 1,
            Format::Tqae => 2,
            Format::Gd   => 3,
        }
    }

    /// Resolve a (magic, version) pair read from a header.
    /// Returns `None` for any pair this build does not know.
    pub fn from_pair(magic: u16, version: u16) -> Option<Self> {
        if magic != MAGIC {
            return None;
        }
        match version {
            1 => Some(Format::Tq),
            2 => Some(Format::Tqae),
            3 => Some(Format::Gd),
            _ => None,
        }
    }

    /// The single compression algorithm for every entry in this format.
    /// Fixed at creation; never mixed within one archive.
    pub fn algorithm(self) -> Algorithm {
        match self {
            Format::Tq | Format::Tqae => Algorithm::Zlib,
            Format::Gd                => Algorithm::Lz4,
        }
    }

    /// Whether chunk records carry an explicit decompressed length.
    /// When false the length is derived from the archive chunk size and the
    /// entry's total length.
    pub fn has_decompressed_length(self) -> bool {
        !matches!(self, Format::Tq)
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::Tq   => "tq",
            Format::Tqae => "tqae",
            Format::Gd   => "gd",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tq"   => Some(Format::Tq),
            "tqae" => Some(Format::Tqae),
            "gd"   => Some(Format::Gd),
            _      => None,
        }
    }
}
