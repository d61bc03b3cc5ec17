//! Hashing utilities for cache keys, content addressing and executable comparison.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha1::{Digest, Sha1};

/// Compute the SHA1 of a byte slice as lowercase hex.
pub fn sha1_bytes(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the SHA1 of a string.
pub fn sha1_str(s: &str) -> String {
    sha1_bytes(s.as_bytes())
}

/// Compute the SHA1 of a file without loading it whole.
pub fn sha1_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha1::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Whether two files have identical contents.
pub fn files_identical(a: &Path, b: &Path) -> Result<bool> {
    let (len_a, len_b) = (std::fs::metadata(a)?.len(), std::fs::metadata(b)?.len());
    if len_a != len_b {
        return Ok(false);
    }
    Ok(sha1_file(a)? == sha1_file(b)?)
}

/// Whether `s` looks like a full 40-character Git commit hash.
pub fn is_commit_hash(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sha1_str() {
        assert_eq!(sha1_str("hello"), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn test_sha1_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.txt");
        std::fs::write(&path, "hello").unwrap();

        assert_eq!(
            sha1_file(&path).unwrap(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[test]
    fn test_files_identical() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        let c = tmp.path().join("c");
        std::fs::write(&a, "same").unwrap();
        std::fs::write(&b, "same").unwrap();
        std::fs::write(&c, "diff").unwrap();

        assert!(files_identical(&a, &b).unwrap());
        assert!(!files_identical(&a, &c).unwrap());
    }

    #[test]
    fn test_is_commit_hash() {
        assert!(is_commit_hash("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"));
        assert!(!is_commit_hash("master"));
        assert!(!is_commit_hash("aaf4c61"));
        assert!(!is_commit_hash("zzf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"));
    }
}
