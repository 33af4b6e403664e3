//! Hash utilities

use base64::{engine::general_purpose::STANDARD, Engine};
use digest::Digest;
use md5::Md5;
use std::io::{self, Read};

/// Length in bytes of an MD5 digest
pub const MD5_LEN: usize = 16;

pub fn md5_hash(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub fn md5_base64(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    STANDARD.encode(hasher.finalize())
}

/// Stream `reader` to its end and return the base64 MD5 of everything read.
pub fn md5_base64_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Md5::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(STANDARD.encode(hasher.finalize()))
}

/// Decode a `Content-MD5` header value into the raw digest.
///
/// Returns `None` unless the value is valid base64 of exactly 16 bytes.
pub fn decode_content_md5(value: &str) -> Option<[u8; MD5_LEN]> {
    let bytes = STANDARD.decode(value.trim()).ok()?;
    bytes.try_into().ok()
}

/// Hex form of a `Content-MD5` header value, as used in part ETags
pub fn content_md5_to_hex(value: &str) -> Option<String> {
    decode_content_md5(value).map(hex::encode)
}

/// Calculate multipart upload ETag
/// Format: MD5(concat(part_md5s))-part_count
pub fn multipart_etag(part_etags: &[String], part_count: usize) -> String {
    let mut hasher = Md5::new();

    for etag in part_etags {
        // Remove quotes and decode hex
        let clean = etag.trim_matches('"');
        if let Ok(bytes) = hex::decode(clean) {
            hasher.update(&bytes);
        }
    }

    let hash = hasher.finalize();
    format!("{}-{}", hex::encode(hash), part_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_vectors() {
        assert_eq!(md5_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_base64(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
        assert_eq!(md5_hash(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_reader_matches_slice() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let streamed = md5_base64_reader(&data[..]).unwrap();
        assert_eq!(streamed, md5_base64(&data));
    }

    #[test]
    fn test_decode_content_md5() {
        let header = md5_base64(b"hello");
        assert_eq!(header.len(), 24);
        assert_eq!(
            content_md5_to_hex(&header).unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert!(decode_content_md5("not base64!").is_none());
        assert!(decode_content_md5("aGVsbG8=").is_none());
    }

    #[test]
    fn test_multipart_etag() {
        let parts = vec![
            format!("\"{}\"", md5_hash(b"part one")),
            format!("\"{}\"", md5_hash(b"part two")),
        ];
        let etag = multipart_etag(&parts, parts.len());
        assert!(etag.ends_with("-2"));
        assert_eq!(etag.len(), 32 + 2);
    }
}
