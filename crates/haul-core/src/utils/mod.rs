//! Utility functions

use crate::error::{Error, Result};
use crate::types::ObjectKey;
use std::path::Path;

/// Generate an ETag from content hash
pub fn generate_etag(md5_hex: &str) -> String {
    format!("\"{}\"", md5_hex)
}

/// Parse ETag (remove quotes)
pub fn parse_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// Join path components (handling trailing slashes)
pub fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if prefix.ends_with('/') {
        format!("{}{}", prefix, name)
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Object key for a local file: its file name under an optional prefix
pub fn object_key_for(source: &Path, prefix: Option<&str>) -> Result<ObjectKey> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            Error::Configuration(format!(
                "Cannot derive an object key from {}",
                source.display()
            ))
        })?;

    Ok(ObjectKey::new(join_key(prefix.unwrap_or(""), name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_etag() {
        assert_eq!(parse_etag("\"abc\""), "abc");
        assert_eq!(parse_etag("abc"), "abc");
        assert_eq!(generate_etag("abc"), "\"abc\"");
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("", "file.txt"), "file.txt");
        assert_eq!(join_key("prefix", "file.txt"), "prefix/file.txt");
        assert_eq!(join_key("prefix/", "file.txt"), "prefix/file.txt");
    }

    #[test]
    fn test_object_key_for() {
        let key = object_key_for(Path::new("/tmp/dumps/prod.bak"), None).unwrap();
        assert_eq!(key.as_str(), "prod.bak");

        let key = object_key_for(Path::new("/tmp/dumps/prod.bak"), Some("db/")).unwrap();
        assert_eq!(key.as_str(), "db/prod.bak");

        assert!(object_key_for(Path::new("/"), None).is_err());
    }
}
