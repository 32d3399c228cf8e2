use std::io::{
    Read as _,
    Write as _,
};

use flate2::{
    read::ZlibDecoder,
    write::ZlibEncoder,
    Compression,
};

/// Compresses the given bytes as a zlib (deflate) stream.
///
/// # Errors
///
/// Returns an error if the compression fails.
pub fn compress_bytes(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompresses the given zlib stream, reading at most `size_limit + 1`
/// bytes of output.
///
/// Callers must treat an output longer than `size_limit` as a decompression
/// bomb and reject it.
///
/// # Errors
///
/// Returns an error if the input is not a valid zlib stream.
pub fn decompress_bytes(data: &[u8], size_limit: usize) -> Result<Vec<u8>, std::io::Error> {
    let mut output = Vec::new();
    let limit = u64::try_from(size_limit)
        .unwrap_or(u64::MAX)
        .saturating_add(1);
    ZlibDecoder::new(data)
        .take(limit)
        .read_to_end(&mut output)?;
    Ok(output)
}
