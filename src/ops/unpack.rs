//! Archive extraction, dispatched on archive format.

use std::io::{Cursor, Read};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use xz2::read::XzDecoder;
use xz2::stream::Stream;

use crate::cache::Reduplicator;
use crate::core::ArchiveFormat;
use crate::util::fs::{ensure_dir, join_archive_path, write_bytes};

/// Folder inside a NuGet package that holds one directory per platform.
pub const NUGET_PLATFORM_ROOT: &str = "protobuild";

/// Extract `bytes` into `dest`. Returns the number of files written.
pub fn unpack_archive(
    format: ArchiveFormat,
    bytes: &[u8],
    dest: &Path,
    platform: &str,
) -> Result<usize> {
    tracing::debug!("unpacking {} archive into {}", format, dest.display());

    match format {
        ArchiveFormat::TarGzip => {
            let report = Reduplicator::new()
                .unpack(GzDecoder::new(bytes), dest)
                .context("failed to unpack tar+gzip archive")?;
            Ok(report.files)
        }
        ArchiveFormat::TarLzma => {
            let stream = Stream::new_lzma_decoder(u64::MAX)
                .context("failed to create lzma decoder")?;
            let report = Reduplicator::new()
                .unpack(XzDecoder::new_stream(bytes, stream), dest)
                .context("failed to unpack tar+lzma archive")?;
            Ok(report.files)
        }
        ArchiveFormat::NuGetZip => unpack_nuget(bytes, dest, platform),
    }
}

/// Extract only the `protobuild/<platform>/` part of a NuGet package.
fn unpack_nuget(bytes: &[u8], dest: &Path, platform: &str) -> Result<usize> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("failed to open NuGet package")?;
    let prefix = format!("{}/{}/", NUGET_PLATFORM_ROOT, platform).to_lowercase();

    ensure_dir(dest)?;
    let mut files = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().replace('\\', "/");
        let relative = match name.get(..prefix.len()) {
            Some(head) if head.eq_ignore_ascii_case(&prefix) => &name[prefix.len()..],
            _ => continue,
        };
        if relative.is_empty() {
            continue;
        }

        let Some(output) = join_archive_path(dest, relative) else {
            tracing::warn!("skipping package entry outside the destination: {}", name);
            continue;
        };

        if entry.is_dir() {
            ensure_dir(&output)?;
        } else {
            let mut contents = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut contents)
                .with_context(|| format!("failed to read package entry {}", name))?;
            write_bytes(&output, &contents)?;
            files += 1;
        }
    }

    if files == 0 {
        tracing::warn!("NuGet package has no files for platform {}", platform);
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures::{build_nupkg, dedup_tar_gz, dedup_tar_lzma};
    use tempfile::TempDir;

    #[test]
    fn test_unpack_tar_gzip() {
        let archive = dedup_tar_gz(&[("include/a.h", b"a"), ("include/b.h", b"a")]);
        let tmp = TempDir::new().unwrap();

        let files = unpack_archive(ArchiveFormat::TarGzip, &archive, tmp.path(), "Linux").unwrap();
        assert_eq!(files, 2);
        assert_eq!(std::fs::read(tmp.path().join("include/b.h")).unwrap(), b"a");
    }

    #[test]
    fn test_unpack_tar_lzma() {
        let archive = dedup_tar_lzma(&[("lib/libengine.a", b"\x7fELF")]);
        let tmp = TempDir::new().unwrap();

        unpack_archive(ArchiveFormat::TarLzma, &archive, tmp.path(), "Linux").unwrap();
        assert_eq!(std::fs::read(tmp.path().join("lib/libengine.a")).unwrap(), b"\x7fELF");
    }

    #[test]
    fn test_unpack_nuget_selects_platform() {
        let archive = build_nupkg(&[
            ("Engine.nuspec", b"<package/>"),
            ("protobuild/Linux/lib/libengine.a", b"linux"),
            ("Protobuild/linux/include/engine.h", b"header"),
            ("protobuild/Windows/lib/engine.lib", b"windows"),
        ]);
        let tmp = TempDir::new().unwrap();

        let files = unpack_archive(ArchiveFormat::NuGetZip, &archive, tmp.path(), "Linux").unwrap();
        assert_eq!(files, 2);
        assert_eq!(std::fs::read(tmp.path().join("lib/libengine.a")).unwrap(), b"linux");
        assert_eq!(std::fs::read(tmp.path().join("include/engine.h")).unwrap(), b"header");
        assert!(!tmp.path().join("lib/engine.lib").exists());
        assert!(!tmp.path().join("Engine.nuspec").exists());
    }
}
