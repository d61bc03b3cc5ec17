//! Legacy NuGet v2 feeds (`http-nuget`, `https-nuget`).
//!
//! These packages are not laid out for the resolver, so the lookup returns
//! transformed metadata: the binary strategy asks [`NuGetV2Transformer`] for
//! a native tar+gzip archive built from the downloaded `.nupkg`.

use std::io::{Cursor, Read};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cache::Deduplicator;
use crate::core::{
    ArchiveFormat, PackageError, PackageMetadata, PackageRequestRef, PackageTransformer,
    PackageType, TransformedMetadata,
};
use crate::sources::http::HttpClient;
use crate::sources::protocol::PackageProtocol;

/// Resolver for NuGet v2 feeds.
pub struct NuGetV2Protocol {
    transformer: Arc<NuGetV2Transformer>,
}

impl NuGetV2Protocol {
    pub fn new(http: Arc<HttpClient>) -> Self {
        NuGetV2Protocol {
            transformer: Arc::new(NuGetV2Transformer { http }),
        }
    }
}

impl PackageProtocol for NuGetV2Protocol {
    fn schemes(&self) -> &'static [&'static str] {
        &["http-nuget", "https-nuget"]
    }

    fn resolve(&self, request: &PackageRequestRef) -> Result<PackageMetadata> {
        package_url(&request.uri, &request.git_ref)?;

        Ok(PackageMetadata::Transformed(TransformedMetadata {
            source_uri: request.uri.clone(),
            git_ref: request.git_ref.clone(),
            platform: request.platform.clone(),
            package_type: PackageType::Library,
            transformer: self.transformer.clone(),
        }))
    }
}

/// Download URL of a package version on a v2 feed.
pub fn package_url(uri: &str, version: &str) -> Result<String, PackageError> {
    let invalid = |reason: &str| PackageError::InvalidReference {
        uri: uri.to_string(),
        reason: reason.to_string(),
    };

    let (scheme, body) = uri
        .split_once("://")
        .ok_or_else(|| invalid("the URI has no scheme"))?;
    let transport = match scheme {
        "http-nuget" => "http",
        "https-nuget" => "https",
        _ => return Err(invalid("not a NuGet v2 package URI")),
    };

    let (feed, name) = body
        .rsplit_once('|')
        .filter(|(feed, name)| !feed.is_empty() && !name.is_empty())
        .ok_or_else(|| invalid("expected `feed|PackageName`"))?;

    if version.is_empty() {
        return Err(invalid("a NuGet v2 package needs an explicit version"));
    }

    Ok(format!(
        "{}://{}/package/{}/{}",
        transport,
        feed.trim_end_matches('/'),
        name,
        version
    ))
}

/// Turns a v2 `.nupkg` into a deduplicated tar+gzip archive.
pub struct NuGetV2Transformer {
    http: Arc<HttpClient>,
}

impl PackageTransformer for NuGetV2Transformer {
    fn name(&self) -> &str {
        "nuget-v2"
    }

    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::TarGzip
    }

    fn transform(&self, source_uri: &str, git_ref: &str, _platform: &str) -> Result<Vec<u8>> {
        let url = package_url(source_uri, git_ref)?;
        tracing::debug!("downloading NuGet package {}", url);
        let nupkg = self.http.get_bytes(&url)?;
        repack_nupkg(&nupkg).with_context(|| format!("failed to transform {}", url))
    }
}

/// Whether a `.nupkg` entry is packaging metadata rather than payload.
fn is_packaging_entry(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with("_rels/")
        || lower.starts_with("package/")
        || lower == "[content_types].xml"
        || (!lower.contains('/') && lower.ends_with(".nuspec"))
}

/// Re-pack the payload of a `.nupkg` as a deduplicated tar+gzip archive.
pub fn repack_nupkg(nupkg: &[u8]) -> Result<Vec<u8>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(nupkg)).context("not a NuGet package")?;
    let mut dedup = Deduplicator::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().replace('\\', "/");
        if is_packaging_entry(&name) {
            continue;
        }

        if file.is_dir() {
            dedup.add_directory(&name);
        } else {
            let mut bytes = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut bytes)
                .with_context(|| format!("failed to read {}", name))?;
            dedup.add_file(&name, bytes);
        }
    }

    dedup.to_tar_gz()
}
