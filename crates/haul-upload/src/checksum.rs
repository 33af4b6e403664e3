//! `Content-MD5` checksums for staged chunks

use haul_core::types::Checksum;
use haul_core::Result;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Base64 MD5 of `bytes`, in `Content-MD5` header form
pub fn digest(bytes: &[u8]) -> Checksum {
    Checksum::new(haul_crypto::md5_base64(bytes))
}

/// Stream the file at `path` through MD5.
pub fn digest_file(path: &Path) -> Result<Checksum> {
    let file = File::open(path)?;
    let encoded = haul_crypto::md5_base64_reader(BufReader::new(file))?;
    Ok(Checksum::new(encoded))
}
