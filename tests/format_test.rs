use tqarc::codec::{pack_bytes, unpack_bytes, Algorithm, CodecError};
use tqarc::error::ArcError;
use tqarc::format::{Format, MAGIC};
use tqarc::hash::{adler32, Adler32};
use tqarc::header::{parse_directory, ArcHeader, FOOTER_SIZE, HEADER_SIZE};
use tqarc::pool::BufferPool;

#[test]
fn test_format_identification() {
    assert_eq!(Format::from_pair(MAGIC, 1), Some(Format::Tq));
    assert_eq!(Format::from_pair(MAGIC, 2), Some(Format::Tqae));
    assert_eq!(Format::from_pair(MAGIC, 3), Some(Format::Gd));
    assert_eq!(Format::from_pair(MAGIC, 4), None);
    assert_eq!(Format::from_pair(0x0000, 1), None);

    for format in [Format::Tq, Format::Tqae, Format::Gd] {
        assert_eq!(Format::from_pair(MAGIC, format.version()), Some(format));
        assert_eq!(Format::from_name(format.name()), Some(format));
    }
}

#[test]
fn test_format_algorithm_legality() {
    // LZ4 blocks cannot be decompressed without a per-chunk decompressed
    // length, so the only format without one must use zlib.
    for format in [Format::Tq, Format::Tqae, Format::Gd] {
        if !format.has_decompressed_length() {
            assert_eq!(format.algorithm(), Algorithm::Zlib);
        }
    }
    assert_eq!(Format::Gd.algorithm(), Algorithm::Lz4);
    assert_eq!(Format::Tq.algorithm(), Algorithm::Zlib);
}

#[test]
fn test_adler32_vectors() {
    assert_eq!(adler32(b""), 1);
    assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);

    // Incremental updates match a single-shot hash across the NMAX
    // deferred-modulo boundary.
    let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let mut h = Adler32::new();
    for block in data.chunks(997) {
        h.update(block);
    }
    assert_eq!(h.finalize(), adler32(&data));
}

#[test]
fn test_pack_bytes_raw_fallback() {
    for alg in [Algorithm::Zlib, Algorithm::Lz4] {
        // Tiny inputs cannot shrink: stored verbatim.
        let packed = pack_bytes(alg, b"abc", 6).unwrap();
        assert_eq!(packed, b"abc");

        // Level 0 forces verbatim storage even for compressible data.
        let data = vec![b'x'; 1000];
        let packed = pack_bytes(alg, &data, 0).unwrap();
        assert_eq!(packed, data);

        // Compressible data shrinks, and a compressed range is never the
        // same length as its source (that length signals a raw range).
        let packed = pack_bytes(alg, &data, 6).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(unpack_bytes(alg, &packed, 1000).unwrap(), data);

        // Verbatim ranges unpack by length equality.
        assert_eq!(unpack_bytes(alg, b"abc", 3).unwrap(), b"abc");

        assert_eq!(pack_bytes(alg, b"", 6).unwrap(), b"");
    }
}

#[test]
fn test_unpack_length_mismatch() {
    let packed = pack_bytes(Algorithm::Zlib, &vec![b'y'; 500], 6).unwrap();
    let err = unpack_bytes(Algorithm::Zlib, &packed, 400);
    assert!(matches!(
        err,
        Err(CodecError::LengthMismatch { .. }) | Err(CodecError::Decompression(_))
    ));
}

#[test]
fn test_header_roundtrip() {
    let mut header = ArcHeader::new(Format::Tqae, 65536, 4096, 1);
    header.dir_size = 1234;
    header.dir_count = 7;

    let bytes = header.to_bytes();
    assert_eq!(bytes.len(), HEADER_SIZE as usize);
    let parsed = ArcHeader::from_bytes(&bytes).unwrap();

    assert_eq!(parsed.format, Format::Tqae);
    assert_eq!(parsed.dir_offset, HEADER_SIZE as u32);
    assert_eq!(parsed.dir_size, 1234);
    assert_eq!(parsed.dir_count, 7);
    assert_eq!(parsed.chunk_length, 65536);
    assert_eq!(parsed.header_area_len, 4096);
    assert!(parsed.preserve_case());
    assert_eq!(parsed.data_start(), HEADER_SIZE + 4096);
}

#[test]
fn test_header_rejects_nonsense() {
    let good = ArcHeader::new(Format::Gd, 65536, 4096, 0).to_bytes();

    // Zero chunk length.
    let mut bad = good;
    bad[16..20].copy_from_slice(&0u32.to_le_bytes());
    assert!(ArcHeader::from_bytes(&bad).is_err());

    // Directory larger than the reserved area.
    let mut bad = good;
    bad[8..12].copy_from_slice(&10_000u32.to_le_bytes());
    assert!(ArcHeader::from_bytes(&bad).is_err());

    // Short buffer.
    assert!(ArcHeader::from_bytes(&good[..16]).is_err());
}

#[test]
fn test_oversized_chunk_count_is_corrupt() {
    let mut header = ArcHeader::new(Format::Gd, 4096, 256, 0);

    // A chunked record whose chunk count vastly exceeds the bytes left in
    // the blob.  Must fail as structural corruption before any chunk-table
    // allocation happens, so the bogus footer is never even compared.
    let mut blob = Vec::new();
    blob.push(2u8); // chunked
    blob.extend_from_slice(&5u16.to_le_bytes());
    blob.extend_from_slice(b"a.bin");
    blob.extend_from_slice(&[0u8; 36]); // offset, lengths, timestamp, hash
    blob.extend_from_slice(&u32::MAX.to_le_bytes());
    blob.extend_from_slice(&0u32.to_le_bytes()); // empty free table
    blob.extend_from_slice(&[0u8; FOOTER_SIZE]);
    header.dir_count = 1;
    header.dir_size = blob.len() as u32;

    let err = parse_directory(&header, &blob, &header.to_bytes()).unwrap_err();
    assert!(matches!(err, ArcError::Corrupt(_)));
}

#[test]
fn test_buffer_pool_reuse() {
    let mut pool = BufferPool::new();
    let a = pool.acquire(100);
    assert_eq!(a.len(), 100);
    assert!(a.iter().all(|&b| b == 0));
    assert_eq!(pool.outstanding(), 1);

    pool.release(a);
    assert_eq!(pool.outstanding(), 0);

    // A recycled buffer comes back zeroed at the requested length.
    let mut b = pool.acquire(50);
    b[0] = 0xFF;
    pool.release(b);
    let c = pool.acquire(80);
    assert_eq!(c.len(), 80);
    assert!(c.iter().all(|&b| b == 0));
}
