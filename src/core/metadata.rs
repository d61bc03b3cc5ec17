//! Package metadata produced by protocol resolvers.
//!
//! Metadata describes HOW a package can be fetched without transferring any
//! of its bytes. Every resolver returns exactly one [`PackageMetadata`]
//! variant and every resolve strategy matches over all of them.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;

use crate::core::errors::PackageError;
use crate::core::PackageType;

/// Archive format of a prebuilt package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    TarLzma,
    TarGzip,
    NuGetZip,
}

impl ArchiveFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::TarLzma => "tar+lzma",
            ArchiveFormat::TarGzip => "tar+gzip",
            ArchiveFormat::NuGetZip => "nuget-zip",
        }
    }

    /// File extension used when the archive is stored in the content cache.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::TarLzma => ".tar.lzma",
            ArchiveFormat::TarGzip => ".tar.gz",
            ArchiveFormat::NuGetZip => ".nupkg",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveFormat {
    type Err = PackageError;

    /// Accepts both the `tar+lzma` spelling and the `tar/lzma` spelling
    /// used by package servers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('/', "+").as_str() {
            "tar+lzma" => Ok(ArchiveFormat::TarLzma),
            "tar+gzip" | "tar+gz" => Ok(ArchiveFormat::TarGzip),
            "nuget-zip" | "nuget+zip" => Ok(ArchiveFormat::NuGetZip),
            _ => Err(PackageError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Where the prebuilt archive of a package lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryArchive {
    pub format: ArchiveFormat,
    /// Download URL or local file path
    pub uri: String,
}

/// A Git repository to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitMetadata {
    pub clone_uri: String,
    pub git_ref: String,
    pub package_type: PackageType,
}

/// A package served by the native HTTP package protocol, or a local archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeMetadata {
    pub reference_uri: String,
    /// Commit hash the requested version or branch resolved to
    pub commit: String,
    /// Git repository to fall back to when no binary exists
    pub source_uri: Option<String>,
    pub binary: Option<BinaryArchive>,
    pub package_type: PackageType,
    pub platform: String,
}

/// Source repository advertised by the tags of a NuGet package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRepository {
    pub git_uri: String,
    pub commit: String,
}

/// A package published to a NuGet v3 feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NuGetV3Metadata {
    pub repository: String,
    pub package_name: String,
    pub version: String,
    pub source: Option<SourceRepository>,
    pub binary: Option<BinaryArchive>,
    pub package_type: PackageType,
    pub platform: String,
}

/// A template that already lives in a local folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderMetadata {
    pub path: PathBuf,
}

/// Synthesizes a native archive from a foreign package format.
pub trait PackageTransformer: Send + Sync {
    /// Name used in log output.
    fn name(&self) -> &str;

    /// Format of the archives this transformer produces.
    fn format(&self) -> ArchiveFormat;

    /// Produce the archive bytes for a package.
    fn transform(&self, source_uri: &str, git_ref: &str, platform: &str) -> Result<Vec<u8>>;
}

/// A package that needs a transformer before it can be unpacked.
#[derive(Clone)]
pub struct TransformedMetadata {
    pub source_uri: String,
    pub git_ref: String,
    pub platform: String,
    pub package_type: PackageType,
    pub transformer: Arc<dyn PackageTransformer>,
}

impl fmt::Debug for TransformedMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformedMetadata")
            .field("source_uri", &self.source_uri)
            .field("git_ref", &self.git_ref)
            .field("platform", &self.platform)
            .field("package_type", &self.package_type)
            .field("transformer", &self.transformer.name())
            .finish()
    }
}

/// Typed description of how to fetch one resolved package.
#[derive(Debug, Clone)]
pub enum PackageMetadata {
    Git(GitMetadata),
    Native(NativeMetadata),
    NuGetV3(NuGetV3Metadata),
    Folder(FolderMetadata),
    Transformed(TransformedMetadata),
}

impl PackageMetadata {
    pub fn package_type(&self) -> PackageType {
        match self {
            PackageMetadata::Git(m) => m.package_type,
            PackageMetadata::Native(m) => m.package_type,
            PackageMetadata::NuGetV3(m) => m.package_type,
            PackageMetadata::Folder(_) => PackageType::Template,
            PackageMetadata::Transformed(m) => m.package_type,
        }
    }

    /// Short variant name for log lines and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            PackageMetadata::Git(_) => "git",
            PackageMetadata::Native(_) => "native",
            PackageMetadata::NuGetV3(_) => "nuget-v3",
            PackageMetadata::Folder(_) => "folder",
            PackageMetadata::Transformed(_) => "transformed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_format_parse() {
        assert_eq!("tar+lzma".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::TarLzma);
        assert_eq!("tar/gzip".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::TarGzip);
        assert_eq!("nuget/zip".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::NuGetZip);
        assert!(matches!(
            "tar+bz2".parse::<ArchiveFormat>(),
            Err(PackageError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_archive_extensions() {
        assert_eq!(ArchiveFormat::TarLzma.extension(), ".tar.lzma");
        assert_eq!(ArchiveFormat::TarGzip.extension(), ".tar.gz");
        assert_eq!(ArchiveFormat::NuGetZip.extension(), ".nupkg");
    }

    #[test]
    fn test_folder_metadata_is_template() {
        let metadata = PackageMetadata::Folder(FolderMetadata {
            path: PathBuf::from("/templates/console"),
        });
        assert_eq!(metadata.package_type(), PackageType::Template);
        assert_eq!(metadata.kind(), "folder");
    }
}
