//! Native package protocol (`http`, `https`).
//!
//! A package server answers `GET <package uri>/api` with the package type,
//! its source repository and tables of versions and branches. Successful
//! answers are kept in the lookup cache and reused when the server cannot be
//! reached or when the caller prefers cached lookups.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::{
    ArchiveFormat, BinaryArchive, NativeMetadata, PackageError, PackageMetadata,
    PackageRequestRef, PackageType,
};
use crate::sources::http::HttpClient;
use crate::sources::protocol::PackageProtocol;
use crate::util::fs::write_bytes;
use crate::util::hash::sha1_str;

/// Schemes a source repository URL may use.
const SOURCE_SCHEMES: &[&str] = &["http", "https", "git", "ssh", "file"];

/// Envelope of every API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub has_error: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<PackageInfo>,
}

/// Package description returned by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    #[serde(rename = "type", default)]
    pub package_type: String,
    #[serde(default)]
    pub git_url: String,
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
    #[serde(default)]
    pub branches: Vec<BranchEntry>,
}

/// One published build of a version for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub version_name: String,
    pub platform_name: String,
    #[serde(default)]
    pub has_file: bool,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub archive_type: String,
}

/// A branch and the version (commit) it points at.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchEntry {
    pub branch_name: String,
    pub version_name: String,
}

/// Resolver for packages hosted on a native package server.
pub struct NativeProtocol {
    http: Arc<HttpClient>,
    lookup_dir: PathBuf,
}

impl NativeProtocol {
    pub fn new(http: Arc<HttpClient>, lookup_dir: PathBuf) -> Self {
        NativeProtocol { http, lookup_dir }
    }

    fn lookup_path(&self, uri: &str) -> PathBuf {
        lookup_path(&self.lookup_dir, uri)
    }

    /// Fetch the package description, falling back to the lookup cache.
    fn fetch(&self, request: &PackageRequestRef) -> Result<PackageInfo> {
        let cache_path = self.lookup_path(&request.uri);

        if request.prefer_cache {
            if let Some(cached) = read_lookup(&cache_path) {
                tracing::debug!("using cached lookup for {}", request.uri);
                return Ok(cached);
            }
        }

        let api_url = format!("{}/api", request.uri.trim_end_matches('/'));
        match self.http.get_json::<ApiResponse>(&api_url) {
            Ok(response) => {
                let info = into_result(&request.uri, response)?;
                save_lookup(&cache_path, &info);
                Ok(info)
            }
            Err(e) => match read_lookup(&cache_path) {
                Some(cached) => {
                    tracing::warn!(
                        "package server for {} is unreachable, using cached lookup: {:#}",
                        request.uri,
                        e
                    );
                    Ok(cached)
                }
                None => Err(PackageError::LookupFailed {
                    uri: request.uri.clone(),
                    reason: format!("{:#}", e),
                }
                .into()),
            },
        }
    }
}

impl PackageProtocol for NativeProtocol {
    fn schemes(&self) -> &'static [&'static str] {
        &["http", "https"]
    }

    fn resolve(&self, request: &PackageRequestRef) -> Result<PackageMetadata> {
        let info = self.fetch(request)?;
        Ok(PackageMetadata::Native(metadata_from_info(request, &info)?))
    }
}

/// Turn a package description into metadata for one request.
pub fn metadata_from_info(request: &PackageRequestRef, info: &PackageInfo) -> Result<NativeMetadata> {
    let package_type: PackageType =
        info.package_type
            .parse()
            .map_err(|reason| PackageError::InvalidReference {
                uri: request.uri.clone(),
                reason,
            })?;

    let source_uri = validate_source_url(&request.uri, &info.git_url);

    // A branch name maps to the commit it currently points at
    let commit = info
        .branches
        .iter()
        .find(|b| b.branch_name == request.git_ref)
        .map(|b| b.version_name.clone())
        .unwrap_or_else(|| request.git_ref.clone());

    let version = info.versions.iter().find(|v| {
        v.version_name == commit
            && v.platform_name.eq_ignore_ascii_case(&request.platform)
            && v.has_file
    });

    let binary = match version {
        Some(v) if !v.download_url.is_empty() => {
            let format: ArchiveFormat = v.archive_type.parse()?;
            Some(BinaryArchive {
                format,
                uri: absolute_download_url(&request.uri, &v.download_url)?,
            })
        }
        _ => None,
    };

    Ok(NativeMetadata {
        reference_uri: request.uri.clone(),
        commit,
        source_uri,
        binary,
        package_type,
        platform: request.platform.clone(),
    })
}

fn into_result(uri: &str, response: ApiResponse) -> Result<PackageInfo> {
    if response.has_error {
        return Err(PackageError::LookupFailed {
            uri: uri.to_string(),
            reason: response
                .error
                .unwrap_or_else(|| "the package server reported an error".to_string()),
        }
        .into());
    }

    response.result.ok_or_else(|| {
        PackageError::LookupFailed {
            uri: uri.to_string(),
            reason: "the package server returned no result".to_string(),
        }
        .into()
    })
}

/// Accept a source repository URL only when it parses and uses a known scheme.
fn validate_source_url(package_uri: &str, git_url: &str) -> Option<String> {
    let git_url = git_url.trim();
    if git_url.is_empty() {
        return None;
    }

    match Url::parse(git_url) {
        Ok(url) if SOURCE_SCHEMES.contains(&url.scheme()) => Some(git_url.to_string()),
        Ok(url) => {
            tracing::warn!(
                "ignoring source repository `{}` of {}: unsupported scheme `{}`",
                git_url,
                package_uri,
                url.scheme()
            );
            None
        }
        Err(e) => {
            tracing::warn!(
                "ignoring source repository `{}` of {}: {}",
                git_url,
                package_uri,
                e
            );
            None
        }
    }
}

/// Resolve a possibly host-relative download URL against the package URI.
fn absolute_download_url(package_uri: &str, download_url: &str) -> Result<String> {
    if Url::parse(download_url).is_ok() {
        return Ok(download_url.to_string());
    }
    let base = Url::parse(package_uri)
        .with_context(|| format!("invalid package URI: {}", package_uri))?;
    let joined = base
        .join(download_url)
        .with_context(|| format!("invalid download URL: {}", download_url))?;
    Ok(joined.to_string())
}

/// Path of the cached lookup for a package URI.
pub fn lookup_path(lookup_dir: &Path, uri: &str) -> PathBuf {
    lookup_dir.join(format!("{}.json", sha1_str(uri.trim_end_matches('/'))))
}

fn read_lookup(path: &Path) -> Option<PackageInfo> {
    let contents = std::fs::read(path).ok()?;
    match serde_json::from_slice(&contents) {
        Ok(info) => Some(info),
        Err(e) => {
            tracing::warn!("ignoring corrupt lookup cache {}: {}", path.display(), e);
            None
        }
    }
}

fn save_lookup(path: &Path, info: &PackageInfo) {
    let result = serde_json::to_vec_pretty(info)
        .map_err(anyhow::Error::from)
        .and_then(|bytes| write_bytes(path, &bytes));
    if let Err(e) = result {
        tracing::warn!("failed to save lookup cache {}: {:#}", path.display(), e);
    }
}
