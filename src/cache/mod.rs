//! Content cache for package archives.
//!
//! Archives are stored as opaque bytes under a key derived from the source
//! URI, the ref, the platform and the archive format. Writes go to a
//! temporary file that is renamed into place; a write that keeps failing is
//! logged and dropped, and the caller carries on with its in-memory copy.

pub mod dedup;
pub mod redup;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use crate::core::ArchiveFormat;
use crate::util::hash::sha1_str;
use crate::util::retry::retry_fixed;

pub use dedup::Deduplicator;
pub use redup::{Reduplicator, UnpackReport};

/// Attempts made to land a cache write.
pub const WRITE_ATTEMPTS: usize = 10;

/// Delay between cache write attempts.
pub const WRITE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Derive the cache key for an archive.
///
/// `SHA1(normalized uri) + "-" + lowercase(ref) + "-" + lowercase(platform) + extension`
///
/// Path separators and other characters that cannot appear in a file name
/// are replaced with `_`, so every key names a single file in the cache root.
pub fn cache_key(uri: &str, git_ref: &str, platform: &str, format: ArchiveFormat) -> String {
    format!(
        "{}-{}-{}{}",
        sha1_str(&normalize_uri(uri)),
        key_component(git_ref),
        key_component(platform),
        format.extension()
    )
}

fn key_component(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Normalize a URI so trivially different spellings share a cache entry.
pub fn normalize_uri(uri: &str) -> String {
    uri.trim().trim_end_matches('/').to_string()
}

/// Hash-keyed disk cache of archive bytes.
#[derive(Debug, Clone)]
pub struct PackageCache {
    root: PathBuf,
    write_attempts: usize,
    write_retry_delay: Duration,
}

impl PackageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PackageCache {
            root: root.into(),
            write_attempts: WRITE_ATTEMPTS,
            write_retry_delay: WRITE_RETRY_DELAY,
        }
    }

    /// Override the write retry behaviour.
    pub fn with_write_retries(mut self, attempts: usize, delay: Duration) -> Self {
        self.write_attempts = attempts;
        self.write_retry_delay = delay;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an entry is stored at.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        std::fs::read(&path)
            .with_context(|| format!("failed to read cache entry: {}", path.display()))
    }

    /// Store an entry. Returns whether the write durably landed.
    ///
    /// Never fails: a cache that cannot be written only costs a download
    /// next time.
    pub fn save(&self, key: &str, bytes: &[u8]) -> bool {
        let path = self.path_for(key);

        if let Err(e) = std::fs::create_dir_all(&self.root) {
            tracing::warn!("cannot create cache directory {}: {}", self.root.display(), e);
            return false;
        }

        let result = retry_fixed(self.write_attempts, self.write_retry_delay, || {
            let mut tmp = NamedTempFile::new_in(&self.root)?;
            tmp.write_all(bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "unable to save {} to the package cache, continuing with the downloaded copy: {}",
                    key,
                    e
                );
                false
            }
        }
    }

    /// Delete every cache entry, mirror and lookup.
    pub fn clear(&self) -> Result<()> {
        crate::util::fs::aggressive_delete(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_key_format() {
        let key = cache_key(
            "https://packages.example.com/Engine",
            "Master",
            "Linux",
            ArchiveFormat::TarLzma,
        );
        let hash = sha1_str("https://packages.example.com/Engine");
        assert_eq!(key, format!("{}-master-linux.tar.lzma", hash));
    }

    #[test]
    fn test_cache_key_is_pure() {
        let a = cache_key("http://h/p", "1.0", "Windows", ArchiveFormat::TarGzip);
        let b = cache_key("http://h/p", "1.0", "Windows", ArchiveFormat::TarGzip);
        assert_eq!(a, b);

        let variants = [
            cache_key("http://h/q", "1.0", "Windows", ArchiveFormat::TarGzip),
            cache_key("http://h/p", "1.1", "Windows", ArchiveFormat::TarGzip),
            cache_key("http://h/p", "1.0", "Linux", ArchiveFormat::TarGzip),
            cache_key("http://h/p", "1.0", "Windows", ArchiveFormat::TarLzma),
        ];
        for variant in &variants {
            assert_ne!(&a, variant);
        }
    }

    #[test]
    fn test_cache_key_normalizes_trailing_slash() {
        assert_eq!(
            cache_key("http://h/p/", "1.0", "Linux", ArchiveFormat::NuGetZip),
            cache_key("http://h/p", "1.0", "Linux", ArchiveFormat::NuGetZip)
        );
    }

    #[test]
    fn test_cache_key_with_path_separators_is_one_file() {
        let tmp = TempDir::new().unwrap();
        let cache = PackageCache::new(tmp.path()).with_write_retries(1, Duration::ZERO);
        let key = cache_key("http://h/p", "release/1.0", "Linux", ArchiveFormat::TarGzip);

        assert!(key.contains("-release_1.0-linux"));
        assert!(!key.contains('/'));
        assert!(cache.save(&key, b"bytes"));
        assert_eq!(cache.path_for(&key).parent(), Some(tmp.path()));
        assert_eq!(cache.get(&key).unwrap(), b"bytes");

        let windows = cache_key("http://h/p", "feature\\x:y", "Linux", ArchiveFormat::TarGzip);
        assert!(windows.contains("-feature_x_y-"));
    }

    #[test]
    fn test_save_and_get() {
        let tmp = TempDir::new().unwrap();
        let cache = PackageCache::new(tmp.path().join("cache"));
        let key = cache_key("http://h/p", "1.0", "Linux", ArchiveFormat::TarGzip);

        assert!(!cache.has(&key));
        assert!(cache.save(&key, b"archive bytes"));
        assert!(cache.has(&key));
        assert_eq!(cache.get(&key).unwrap(), b"archive bytes");

        // Overwrite is atomic and leaves no temp files behind
        assert!(cache.save(&key, b"newer bytes"));
        assert_eq!(cache.get(&key).unwrap(), b"newer bytes");
        let entries = std::fs::read_dir(cache.root()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_save_failure_is_best_effort() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("cache");
        std::fs::write(&blocker, "not a directory").unwrap();

        let cache = PackageCache::new(&blocker).with_write_retries(2, Duration::ZERO);
        assert!(!cache.save("key", b"bytes"));
    }

    #[test]
    fn test_save_retries_until_target_is_free() {
        let tmp = TempDir::new().unwrap();
        let cache = PackageCache::new(tmp.path()).with_write_retries(3, Duration::ZERO);

        // A directory sitting at the entry path makes every rename fail
        std::fs::create_dir_all(cache.path_for("busy")).unwrap();
        std::fs::write(cache.path_for("busy").join("x"), "x").unwrap();
        assert!(!cache.save("busy", b"bytes"));
    }
}
