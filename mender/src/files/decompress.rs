//! Decompression stage for file sources.

use crate::error::{MenderError, MenderResult};
use crate::types::DecompressionMethod;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::{Cursor, Read};

/// Decompress `bytes` according to `method`. `Auto` sniffs the compression
/// format from magic bytes and falls through to identity when nothing
/// matches; `None` is identity.
pub fn decompress(bytes: &[u8], method: DecompressionMethod) -> MenderResult<Vec<u8>> {
    match method {
        DecompressionMethod::None => Ok(bytes.to_vec()),
        DecompressionMethod::Gzip => gunzip(bytes),
        DecompressionMethod::Deflate => inflate(bytes),
        DecompressionMethod::Zip => unzip_first_entry(bytes),
        DecompressionMethod::Auto => match sniff(bytes) {
            Some(DecompressionMethod::Gzip) => gunzip(bytes),
            Some(DecompressionMethod::Deflate) => inflate(bytes),
            Some(DecompressionMethod::Zip) => unzip_first_entry(bytes),
            _ => Ok(bytes.to_vec()),
        },
    }
}

/// Identify the compression format from magic bytes, if any.
fn sniff(bytes: &[u8]) -> Option<DecompressionMethod> {
    match bytes {
        [0x1f, 0x8b, ..] => Some(DecompressionMethod::Gzip),
        [b'P', b'K', 0x03, 0x04, ..] => Some(DecompressionMethod::Zip),
        // zlib stream: 0x78 followed by a valid flag byte
        [0x78, 0x01 | 0x5e | 0x9c | 0xda, ..] => Some(DecompressionMethod::Deflate),
        _ => None,
    }
}

fn gunzip(bytes: &[u8]) -> MenderResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| MenderError::Parse(format!("gzip decompression failed: {}", e)))?;
    Ok(out)
}

/// Inflate a deflate stream. Tries the zlib-wrapped form first (the common
/// case on the wire), then falls back to a raw stream.
fn inflate(bytes: &[u8]) -> MenderResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut zlib = ZlibDecoder::new(bytes);
    if zlib.read_to_end(&mut out).is_ok() {
        return Ok(out);
    }
    out.clear();
    let mut raw = DeflateDecoder::new(bytes);
    raw.read_to_end(&mut out)
        .map_err(|e| MenderError::Parse(format!("deflate decompression failed: {}", e)))?;
    Ok(out)
}

/// Extract the first file entry of a zip archive.
fn unzip_first_entry(bytes: &[u8]) -> MenderResult<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| MenderError::Parse(format!("zip archive unreadable: {}", e)))?;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| MenderError::Parse(format!("zip entry unreadable: {}", e)))?;
        if entry.is_dir() {
            continue;
        }
        let mut out = Vec::new();
        entry
            .read_to_end(&mut out)
            .map_err(|e| MenderError::Parse(format!("zip entry read failed: {}", e)))?;
        return Ok(out);
    }
    Err(MenderError::Parse(
        "zip archive contains no file entries".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    const PAYLOAD: &[u8] = b"id,name\n1,leela\n2,fry\n";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn raw_deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zip_archive(data: &[u8]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("data.csv", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_gzip_round_trip() {
        let out = decompress(&gzip(PAYLOAD), DecompressionMethod::Gzip).unwrap();
        assert_eq!(out, PAYLOAD);
    }

    #[test]
    fn test_deflate_round_trip_zlib_and_raw() {
        let out = decompress(&zlib(PAYLOAD), DecompressionMethod::Deflate).unwrap();
        assert_eq!(out, PAYLOAD);
        let out = decompress(&raw_deflate(PAYLOAD), DecompressionMethod::Deflate).unwrap();
        assert_eq!(out, PAYLOAD);
    }

    #[test]
    fn test_zip_round_trip() {
        let out = decompress(&zip_archive(PAYLOAD), DecompressionMethod::Zip).unwrap();
        assert_eq!(out, PAYLOAD);
    }

    #[test]
    fn test_auto_sniffs_each_format() {
        for compressed in [gzip(PAYLOAD), zlib(PAYLOAD), zip_archive(PAYLOAD)] {
            let out = decompress(&compressed, DecompressionMethod::Auto).unwrap();
            assert_eq!(out, PAYLOAD);
        }
    }

    #[test]
    fn test_auto_passes_plain_bytes_through() {
        let out = decompress(PAYLOAD, DecompressionMethod::Auto).unwrap();
        assert_eq!(out, PAYLOAD);
    }

    #[test]
    fn test_none_is_identity() {
        let out = decompress(PAYLOAD, DecompressionMethod::None).unwrap();
        assert_eq!(out, PAYLOAD);
    }
}
