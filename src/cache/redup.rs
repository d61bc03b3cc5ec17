//! Unpacking of deduplicated tar streams back into real files.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

use crate::cache::dedup::DEDUP_DIR;
use crate::util::fs::{ensure_dir, join_archive_path, write_bytes};

/// Outcome of an unpack.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnpackReport {
    pub files: usize,
    pub directories: usize,
    /// Entries that were skipped, with the reason
    pub warnings: Vec<String>,
}

/// Materializes the hard links of a deduplicated archive as real files.
#[derive(Debug, Default)]
pub struct Reduplicator;

impl Reduplicator {
    pub fn new() -> Self {
        Reduplicator
    }

    /// Unpack the tar stream in `reader` into `dest`.
    ///
    /// Unknown entry types and links to unknown content are warnings: the
    /// entry is skipped and unpacking continues.
    pub fn unpack<R: Read>(&self, reader: R, dest: &Path) -> Result<UnpackReport> {
        ensure_dir(dest)?;

        let mut archive = tar::Archive::new(reader);
        let mut content: HashMap<String, Vec<u8>> = HashMap::new();
        let mut report = UnpackReport::default();

        for entry in archive.entries().context("failed to read archive entries")? {
            let mut entry = entry.context("failed to read archive entry")?;
            let path = entry
                .path()
                .context("failed to read archive entry path")?
                .to_string_lossy()
                .replace('\\', "/");
            let path = path.trim_end_matches('/').to_string();
            let entry_type = entry.header().entry_type();

            if path == DEDUP_DIR {
                continue;
            }

            if let Some(hash) = dedup_hash(&path) {
                if entry_type.is_file() {
                    let mut bytes = Vec::with_capacity(entry.size() as usize);
                    entry
                        .read_to_end(&mut bytes)
                        .with_context(|| format!("failed to read content entry {}", path))?;
                    content.insert(hash.to_string(), bytes);
                } else {
                    report.warn(format!("ignoring {:?} entry {}", entry_type, path));
                }
                continue;
            }

            let Some(output) = join_archive_path(dest, &path) else {
                report.warn(format!("entry escapes the destination: {}", path));
                continue;
            };

            match entry_type {
                tar::EntryType::Directory => {
                    ensure_dir(&output)?;
                    report.directories += 1;
                }
                tar::EntryType::Link => {
                    let target = entry
                        .link_name()
                        .context("failed to read link target")?
                        .map(|t| t.to_string_lossy().replace('\\', "/"))
                        .unwrap_or_default();

                    match dedup_hash(&target).and_then(|hash| content.get(hash)) {
                        Some(bytes) => {
                            write_bytes(&output, bytes)?;
                            report.files += 1;
                        }
                        None => {
                            report.warn(format!("{} links to unknown content {}", path, target))
                        }
                    }
                }
                other => report.warn(format!("ignoring {:?} entry {}", other, path)),
            }
        }

        Ok(report)
    }
}

impl UnpackReport {
    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

fn dedup_hash(path: &str) -> Option<&str> {
    path.strip_prefix(DEDUP_DIR)?
        .strip_prefix('/')
        .filter(|hash| !hash.is_empty() && !hash.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::dedup::Deduplicator;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    fn snapshot(root: &Path) -> Vec<(String, Option<Vec<u8>>)> {
        WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .map(|e| {
                let e = e.unwrap();
                let rel = e.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                let bytes = e.file_type().is_file().then(|| std::fs::read(e.path()).unwrap());
                (rel, bytes)
            })
            .collect()
    }

    #[test]
    fn test_pack_unpack_reproduces_tree() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("include/detail")).unwrap();
        std::fs::create_dir_all(src.join("empty")).unwrap();
        std::fs::write(src.join("include/a.h"), "#pragma once\n").unwrap();
        std::fs::write(src.join("include/detail/b.h"), "#pragma once\n").unwrap();
        std::fs::write(src.join("lib.a"), [0u8, 1, 2, 3, 255]).unwrap();
        std::fs::write(src.join("copy.a"), [0u8, 1, 2, 3, 255]).unwrap();
        std::fs::write(src.join("unique.txt"), "unique").unwrap();

        let mut dedup = Deduplicator::new();
        dedup.add_tree(&src).unwrap();
        assert_eq!(dedup.distinct_contents(), 3);

        let archive = dedup.write_tar(Vec::new()).unwrap();

        // One content entry per distinct hash
        let mut reader = tar::Archive::new(archive.as_slice());
        let stored = reader
            .entries()
            .unwrap()
            .filter(|e| {
                let e = e.as_ref().unwrap();
                e.header().entry_type().is_file()
                    && e.path().unwrap().starts_with(DEDUP_DIR)
            })
            .count();
        assert_eq!(stored, 3);

        let dest = tmp.path().join("dest");
        let report = Reduplicator::new().unpack(archive.as_slice(), &dest).unwrap();
        assert!(report.warnings.is_empty());
        assert_eq!(report.files, 5);

        assert_eq!(snapshot(&src), snapshot(&dest));
        assert!(!dest.join(DEDUP_DIR).exists());
    }

    #[test]
    fn test_unknown_hash_is_skipped() {
        let mut builder = tar::Builder::new(Vec::new());

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Link);
        header.set_size(0);
        builder
            .append_link(&mut header, "missing.txt", "_DedupFiles/deadbeef")
            .unwrap();

        let bytes = b"kept";
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        builder
            .append_data(&mut header, "_DedupFiles/abc", &bytes[..])
            .unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Link);
        header.set_size(0);
        builder
            .append_link(&mut header, "kept.txt", "_DedupFiles/abc")
            .unwrap();

        let archive = builder.into_inner().unwrap();
        let tmp = TempDir::new().unwrap();
        let report = Reduplicator::new().unpack(archive.as_slice(), tmp.path()).unwrap();

        assert_eq!(report.files, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(!tmp.path().join("missing.txt").exists());
        assert_eq!(std::fs::read(tmp.path().join("kept.txt")).unwrap(), b"kept");
    }

    #[test]
    fn test_other_entry_types_warn() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, "link", "target").unwrap();
        let archive = builder.into_inner().unwrap();

        let tmp = TempDir::new().unwrap();
        let report = Reduplicator::new().unpack(archive.as_slice(), tmp.path()).unwrap();
        assert_eq!(report.files, 0);
        assert_eq!(report.warnings.len(), 1);
    }
}
