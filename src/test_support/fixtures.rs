//! Test fixtures: archives, NuGet packages, git repositories and modules.

use std::io::{Cursor, Write};
use std::path::Path;
use std::process::Command;

use crate::cache::Deduplicator;
use crate::core::module::MODULE_FILE;

/// A minimal `.nuspec` document.
pub fn nuspec(id: &str, version: &str, tags: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2011/08/nuspec.xsd">
  <metadata>
    <id>{id}</id>
    <version>{version}</version>
    <authors>pkgsync</authors>
    <description>{id}</description>
    <tags>{tags}</tags>
  </metadata>
</package>
"#
    )
}

/// Build a zip (`.nupkg`) in memory.
pub fn build_nupkg(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

/// Build an uncompressed deduplicated tar from `(path, contents)` pairs.
pub fn dedup_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut dedup = Deduplicator::new();
    for (path, bytes) in files {
        dedup.add_file(path, bytes.to_vec());
    }
    dedup.write_tar(Vec::new()).unwrap()
}

/// Build a deduplicated tar+gzip archive.
pub fn dedup_tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&dedup_tar(files)).unwrap();
    encoder.finish().unwrap()
}

/// Build a deduplicated tar+lzma archive (legacy `.lzma` stream).
pub fn dedup_tar_lzma(files: &[(&str, &[u8])]) -> Vec<u8> {
    let options = xz2::stream::LzmaOptions::new_preset(6).unwrap();
    let stream = xz2::stream::Stream::new_lzma_encoder(&options).unwrap();
    let mut encoder = xz2::write::XzEncoder::new_stream(Vec::new(), stream);
    encoder.write_all(&dedup_tar(files)).unwrap();
    encoder.finish().unwrap()
}

/// Write `Build/Module.toml` below `dir`.
pub fn write_module(dir: &Path, contents: &str) {
    let file = dir.join(MODULE_FILE);
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(file, contents).unwrap();
}

/// Whether the `git` CLI is installed.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `cwd`, panicking on failure, and return trimmed stdout.
pub fn git(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=pkgsync",
            "-c",
            "user.email=pkgsync@example.com",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "protocol.file.allow=always",
        ])
        .args(args)
        .current_dir(cwd)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create a repository on branch `master` with one commit of `files`.
///
/// Returns the commit hash.
pub fn init_repo(dir: &Path, files: &[(&str, &str)]) -> String {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/master"]);
    commit_files(dir, files, "initial")
}

/// Write `files` into the repository and commit them.
pub fn commit_files(dir: &Path, files: &[(&str, &str)], message: &str) -> String {
    for (path, contents) in files {
        let file = dir.join(path);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(file, contents).unwrap();
    }
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "--allow-empty", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}
