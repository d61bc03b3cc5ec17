//! Local families: template folders and prebuilt archive files.

use std::path::PathBuf;

use anyhow::Result;

use crate::core::{
    ArchiveFormat, BinaryArchive, FolderMetadata, NativeMetadata, PackageError, PackageMetadata,
    PackageRequestRef, PackageType,
};
use crate::sources::protocol::PackageProtocol;

/// Resolves `local-template`, `local-lzma` and `local-gzip`.
#[derive(Debug, Default)]
pub struct LocalProtocol;

impl LocalProtocol {
    pub fn new() -> Self {
        LocalProtocol
    }
}

impl PackageProtocol for LocalProtocol {
    fn schemes(&self) -> &'static [&'static str] {
        &["local-template", "local-lzma", "local-gzip"]
    }

    fn resolve(&self, request: &PackageRequestRef) -> Result<PackageMetadata> {
        let path = request.body();
        if path.is_empty() {
            return Err(PackageError::InvalidReference {
                uri: request.uri.clone(),
                reason: "the path is empty".to_string(),
            }
            .into());
        }

        let format = match request.scheme() {
            Some("local-template") => {
                return Ok(PackageMetadata::Folder(FolderMetadata {
                    path: PathBuf::from(path),
                }))
            }
            Some("local-lzma") => ArchiveFormat::TarLzma,
            Some("local-gzip") => ArchiveFormat::TarGzip,
            _ => {
                return Err(PackageError::InvalidReference {
                    uri: request.uri.clone(),
                    reason: "not a local package URI".to_string(),
                }
                .into())
            }
        };

        Ok(PackageMetadata::Native(NativeMetadata {
            reference_uri: request.uri.clone(),
            commit: request.git_ref.clone(),
            source_uri: None,
            binary: Some(BinaryArchive {
                format,
                uri: path.to_string(),
            }),
            package_type: PackageType::Library,
            platform: request.platform.clone(),
        }))
    }
}
