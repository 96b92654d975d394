//! Compression codecs: zlib (TQ/TQAE archives) and LZ4 block (GD archives).
//!
//! The engine treats compression as a pluggable pair of functions and never
//! inspects codec internals.  Decompression is always driven by the expected
//! decompressed length recorded in the directory, so codecs write no framing
//! of their own.
//!
//! Level 0 ("store raw") is handled above the codec layer by
//! [`pack_bytes`]: a payload whose compressed form is not strictly smaller
//! is stored verbatim, and [`unpack_into`] recognises that case by
//! `compressed length == decompressed length`.

use std::io::{Read, Write};

use thiserror::Error;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Decompressed length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

// ── Algorithm ────────────────────────────────────────────────────────────────

/// Compression algorithm family.  A property of the archive format, fixed at
/// creation and never mixed within one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Zlib,
    Lz4,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Zlib => "zlib",
            Algorithm::Lz4  => "lz4",
        }
    }
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn algorithm(&self) -> Algorithm;
    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, CodecError>;
    /// Decompress `data` into exactly `out.len()` bytes.
    fn decompress_into(&self, data: &[u8], out: &mut [u8]) -> Result<(), CodecError>;
}

pub struct ZlibCodec;

impl Codec for ZlibCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Zlib
    }

    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
        let level = flate2::Compression::new(level.clamp(1, 9));
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), level);
        enc.write_all(data)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }

    fn decompress_into(&self, data: &[u8], out: &mut [u8]) -> Result<(), CodecError> {
        let mut dec = flate2::read::ZlibDecoder::new(data);
        dec.read_exact(out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        // The stream must end exactly at the expected length.
        let mut probe = [0u8; 1];
        let extra = dec
            .read(&mut probe)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        if extra != 0 {
            return Err(CodecError::LengthMismatch {
                expected: out.len(),
                actual:   out.len() + extra,
            });
        }
        Ok(())
    }
}

pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Lz4
    }

    /// LZ4 block compression has no level knob; the parameter is accepted
    /// for interface symmetry and ignored.
    fn compress(&self, data: &[u8], _level: u32) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::block::compress(data))
    }

    fn decompress_into(&self, data: &[u8], out: &mut [u8]) -> Result<(), CodecError> {
        let n = lz4_flex::block::decompress_into(data, out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        if n != out.len() {
            return Err(CodecError::LengthMismatch {
                expected: out.len(),
                actual:   n,
            });
        }
        Ok(())
    }
}

/// Resolve an algorithm to its codec.  The set is closed; this cannot fail.
pub fn get_codec(alg: Algorithm) -> &'static dyn Codec {
    match alg {
        Algorithm::Zlib => &ZlibCodec,
        Algorithm::Lz4  => &Lz4Codec,
    }
}

// ── Raw-fallback wrappers ────────────────────────────────────────────────────

/// Compress `data`, falling back to a verbatim copy when `level` is 0 or the
/// compressed form would not be strictly smaller.  The raw case is the only
/// way the output length can equal the input length, which is what
/// [`unpack_into`] relies on.
pub fn pack_bytes(alg: Algorithm, data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
    if level == 0 || data.is_empty() {
        return Ok(data.to_vec());
    }
    let packed = get_codec(alg).compress(data, level)?;
    if packed.len() >= data.len() {
        Ok(data.to_vec())
    } else {
        Ok(packed)
    }
}

/// Inverse of [`pack_bytes`]: fills `out` from `data`, treating equal
/// lengths as a verbatim copy.
pub fn unpack_into(alg: Algorithm, data: &[u8], out: &mut [u8]) -> Result<(), CodecError> {
    if data.len() == out.len() {
        out.copy_from_slice(data);
        return Ok(());
    }
    get_codec(alg).decompress_into(data, out)
}

/// Allocating convenience over [`unpack_into`].
pub fn unpack_bytes(
    alg: Algorithm,
    data: &[u8],
    expected_len: usize,
) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![0u8; expected_len];
    unpack_into(alg, data, &mut out)?;
    Ok(out)
}
