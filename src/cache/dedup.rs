//! Content-addressed packing of a directory tree into a tar stream.
//!
//! Every distinct file content is stored once under `_DedupFiles/<sha1>`;
//! every destination path is a hard-link entry pointing at its content.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use walkdir::WalkDir;

use crate::util::hash::sha1_bytes;

/// Top-level directory holding the content-addressed payloads.
pub const DEDUP_DIR: &str = "_DedupFiles";

/// Collects files and directories and writes them as a deduplicated archive.
#[derive(Debug, Default)]
pub struct Deduplicator {
    /// Content hash -> file bytes
    content: BTreeMap<String, Vec<u8>>,
    /// Destination path -> content hash, `None` for plain directories
    destinations: BTreeMap<String, Option<String>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file at `destination` (a `/`-separated relative path).
    pub fn add_file(&mut self, destination: &str, bytes: Vec<u8>) {
        let hash = sha1_bytes(&bytes);
        self.content.entry(hash.clone()).or_insert(bytes);
        self.destinations
            .insert(normalize(destination), Some(hash));
    }

    /// Record a plain directory.
    pub fn add_directory(&mut self, destination: &str) {
        self.destinations.insert(normalize(destination), None);
    }

    /// Record every file and directory below `root`.
    pub fn add_tree(&mut self, root: &Path) -> Result<()> {
        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
            let relative = entry
                .path()
                .strip_prefix(root)
                .with_context(|| format!("{} is outside {}", entry.path().display(), root.display()))?;
            let destination = relative.to_string_lossy().replace('\\', "/");

            if entry.file_type().is_dir() {
                self.add_directory(&destination);
            } else if entry.file_type().is_file() {
                let bytes = std::fs::read(entry.path())
                    .with_context(|| format!("failed to read {}", entry.path().display()))?;
                self.add_file(&destination, bytes);
            } else {
                tracing::debug!("not packing special file {}", entry.path().display());
            }
        }
        Ok(())
    }

    /// Number of distinct contents recorded.
    pub fn distinct_contents(&self) -> usize {
        self.content.len()
    }

    /// Number of destination paths recorded.
    pub fn destinations(&self) -> usize {
        self.destinations.len()
    }

    /// Write the deduplicated tar stream to `writer`.
    pub fn write_tar<W: Write>(&self, writer: W) -> Result<W> {
        let mut builder = tar::Builder::new(writer);

        let mut header = directory_header();
        builder
            .append_data(&mut header, format!("{}/", DEDUP_DIR), std::io::empty())
            .context("failed to write dedup directory entry")?;

        for (hash, bytes) in &self.content {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            builder
                .append_data(&mut header, format!("{}/{}", DEDUP_DIR, hash), bytes.as_slice())
                .with_context(|| format!("failed to write content entry {}", hash))?;
        }

        for (destination, hash) in &self.destinations {
            match hash {
                None => {
                    let mut header = directory_header();
                    builder
                        .append_data(&mut header, format!("{}/", destination), std::io::empty())
                        .with_context(|| format!("failed to write directory entry {}", destination))?;
                }
                Some(hash) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Link);
                    header.set_size(0);
                    header.set_mode(0o644);
                    header.set_mtime(0);
                    builder
                        .append_link(&mut header, destination, format!("{}/{}", DEDUP_DIR, hash))
                        .with_context(|| format!("failed to write link entry {}", destination))?;
                }
            }
        }

        builder.into_inner().context("failed to finish archive")
    }

    /// Write the archive as `tar+gzip` bytes.
    pub fn to_tar_gz(&self) -> Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let encoder = self.write_tar(encoder)?;
        encoder.finish().context("failed to compress archive")
    }
}

fn directory_header() -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_mtime(0);
    header
}

fn normalize(destination: &str) -> String {
    destination
        .replace('\\', "/")
        .trim_matches('/')
        .to_string()
}
