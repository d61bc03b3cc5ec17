//! NuGet v3 feeds (`http-nuget-v3`, `https-nuget-v3`, `local-nuget-v3`).
//!
//! The URI body is `feed|PackageName`. A ref is either a version published
//! to the feed, a 40-character commit hash, or a branch of the source
//! repository named in the package tags. Commits and branches map onto a
//! version derived from the commit hash and platform.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::core::{
    ArchiveFormat, BinaryArchive, NuGetV3Metadata, PackageError, PackageMetadata,
    PackageRequestRef, PackageType, SourceRepository,
};
use crate::sources::http::HttpClient;
use crate::sources::protocol::PackageProtocol;
use crate::util::git::list_remote_branches;
use crate::util::hash::{is_commit_hash, sha1_str};

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+(\.\d+){1,3}(-[0-9A-Za-z.-]+)?(\+[0-9A-Za-z.-]+)?$").expect("valid regex")
});

static NUSPEC_TAGS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<tags>(.*?)</tags>").expect("valid regex"));

/// Whether `s` is usable as a NuGet version as-is.
pub fn is_version(s: &str) -> bool {
    VERSION_RE.is_match(s)
}

/// Derive the NuGet version published for a commit and platform.
///
/// The mapping is one-way: the version cannot be turned back into the commit.
pub fn derived_version(commit: &str, platform: &str) -> String {
    let hash = sha1_str(&format!("{}|{}", commit, platform).to_lowercase());
    format!("0.0.0-h{}", &hash[..16])
}

/// Source information carried in package tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageTags {
    pub git: Option<String>,
    pub commit: Option<String>,
    pub package_type: Option<PackageType>,
}

/// Parse `git=`, `commit=` and `type=` out of a tag list.
pub fn parse_tags<I, S>(tags: I) -> PackageTags
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = PackageTags::default();
    for tag in tags {
        for token in tag.as_ref().split_whitespace() {
            if let Some(git) = token.strip_prefix("git=") {
                parsed.git = Some(git.to_string());
            } else if let Some(commit) = token.strip_prefix("commit=") {
                parsed.commit = Some(commit.to_string());
            } else if let Some(kind) = token.strip_prefix("type=") {
                match kind.parse() {
                    Ok(kind) => parsed.package_type = Some(kind),
                    Err(e) => tracing::debug!("ignoring tag `{}`: {}", token, e),
                }
            }
        }
    }
    parsed
}

/// Where a feed lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// Service index URL
    Remote(String),
    /// Folder of `.nupkg` files
    Local(PathBuf),
}

/// One version of a package published to a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPackage {
    pub version: String,
    /// Download URL or local path of the `.nupkg`
    pub download: String,
    pub tags: Vec<String>,
}

/// Split a request into its feed and package name.
pub fn parse_request(request: &PackageRequestRef) -> Result<(Feed, String), PackageError> {
    let invalid = |reason: &str| PackageError::InvalidReference {
        uri: request.uri.clone(),
        reason: reason.to_string(),
    };

    let (feed, name) = request
        .body()
        .rsplit_once('|')
        .ok_or_else(|| invalid("expected `feed|PackageName`"))?;

    if feed.is_empty() || name.is_empty() {
        return Err(invalid("expected `feed|PackageName`"));
    }

    let feed = match request.scheme() {
        Some("https-nuget-v3") => Feed::Remote(format!("https://{}", feed)),
        Some("http-nuget-v3") => Feed::Remote(format!("http://{}", feed)),
        Some("local-nuget-v3") => Feed::Local(PathBuf::from(feed)),
        _ => return Err(invalid("not a NuGet v3 package URI")),
    };

    Ok((feed, name.to_string()))
}

/// Resolver for NuGet v3 feeds.
pub struct NuGetV3Protocol {
    http: Arc<HttpClient>,
}

impl NuGetV3Protocol {
    pub fn new(http: Arc<HttpClient>) -> Self {
        NuGetV3Protocol { http }
    }

    fn packages(&self, feed: &Feed, name: &str) -> Result<Vec<FeedPackage>> {
        match feed {
            Feed::Remote(index) => remote_packages(&self.http, index, name),
            Feed::Local(root) => local_packages(root, name),
        }
    }
}

impl PackageProtocol for NuGetV3Protocol {
    fn schemes(&self) -> &'static [&'static str] {
        &["http-nuget-v3", "https-nuget-v3", "local-nuget-v3"]
    }

    fn resolve(&self, request: &PackageRequestRef) -> Result<PackageMetadata> {
        let (feed, name) = parse_request(request)?;

        let packages = self.packages(&feed, &name).map_err(|e| PackageError::LookupFailed {
            uri: request.uri.clone(),
            reason: format!("{:#}", e),
        })?;
        let latest = latest_package(&packages);
        let latest_tags = latest.map(|p| parse_tags(&p.tags)).unwrap_or_default();

        let git_ref = request.git_ref.trim();
        let (version, commit) = if git_ref.is_empty() {
            let latest = latest.ok_or_else(|| PackageError::LookupFailed {
                uri: request.uri.clone(),
                reason: "the feed has no versions of this package".to_string(),
            })?;
            (latest.version.clone(), None)
        } else if is_version(git_ref) {
            (git_ref.to_string(), None)
        } else if is_commit_hash(git_ref) {
            (derived_version(git_ref, &request.platform), Some(git_ref.to_lowercase()))
        } else {
            let commit = branch_commit(request, &latest_tags, git_ref)?;
            (derived_version(&commit, &request.platform), Some(commit))
        };

        let found = packages
            .iter()
            .find(|p| p.version.eq_ignore_ascii_case(&version));
        let tags = found.map(|p| parse_tags(&p.tags));

        let git_uri = tags
            .as_ref()
            .and_then(|t| t.git.clone())
            .or_else(|| commit.as_ref().and(latest_tags.git.clone()));
        let source_commit = tags.as_ref().and_then(|t| t.commit.clone()).or(commit);
        let source = match (git_uri, source_commit) {
            (Some(git_uri), Some(commit)) => Some(SourceRepository { git_uri, commit }),
            _ => None,
        };

        let package_type = tags
            .as_ref()
            .and_then(|t| t.package_type)
            .or(latest_tags.package_type)
            .unwrap_or(PackageType::Library);

        if found.is_none() {
            tracing::debug!("{} has no published version {}", request.uri, version);
        }

        Ok(PackageMetadata::NuGetV3(NuGetV3Metadata {
            repository: match &feed {
                Feed::Remote(url) => url.clone(),
                Feed::Local(path) => path.display().to_string(),
            },
            package_name: name,
            version,
            source,
            binary: found.map(|p| BinaryArchive {
                format: ArchiveFormat::NuGetZip,
                uri: p.download.clone(),
            }),
            package_type,
            platform: request.platform.clone(),
        }))
    }
}

fn branch_commit(request: &PackageRequestRef, tags: &PackageTags, branch: &str) -> Result<String> {
    let git = tags.git.as_deref().ok_or_else(|| PackageError::LookupFailed {
        uri: request.uri.clone(),
        reason: format!(
            "`{}` is a branch name, but the package does not name its source repository",
            branch
        ),
    })?;

    let branches = list_remote_branches(git).map_err(|e| PackageError::LookupFailed {
        uri: request.uri.clone(),
        reason: format!("{:#}", e),
    })?;

    branches
        .into_iter()
        .find(|(name, _)| name == branch)
        .map(|(_, commit)| commit)
        .ok_or_else(|| {
            PackageError::LookupFailed {
                uri: request.uri.clone(),
                reason: format!("branch `{}` does not exist in {}", branch, git),
            }
            .into()
        })
}

/// Highest version on the feed, by semantic version order when possible.
fn latest_package(packages: &[FeedPackage]) -> Option<&FeedPackage> {
    packages
        .iter()
        .filter_map(|p| semver::Version::parse(&p.version).ok().map(|v| (v, p)))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, p)| p)
        .or_else(|| packages.last())
}

// Remote feeds

#[derive(Debug, Deserialize)]
struct ServiceIndex {
    #[serde(default)]
    resources: Vec<ServiceResource>,
}

#[derive(Debug, Deserialize)]
struct ServiceResource {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RegistrationIndex {
    #[serde(default)]
    items: Vec<RegistrationPage>,
}

#[derive(Debug, Deserialize)]
struct RegistrationPage {
    #[serde(rename = "@id")]
    id: String,
    #[serde(default)]
    items: Option<Vec<RegistrationLeaf>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationLeaf {
    catalog_entry: CatalogEntry,
    #[serde(default)]
    package_content: String,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    version: String,
    #[serde(default, deserialize_with = "deserialize_tags")]
    tags: Vec<String>,
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        List(Vec<String>),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Raw::Text(s)) => vec![s],
        Some(Raw::List(list)) => list,
    })
}

fn remote_packages(http: &HttpClient, index_url: &str, name: &str) -> Result<Vec<FeedPackage>> {
    let index: ServiceIndex = http.get_json(index_url)?;
    let base = index
        .resources
        .iter()
        .find(|r| r.kind.starts_with("RegistrationsBaseUrl"))
        .map(|r| r.id.clone())
        .with_context(|| format!("{} has no RegistrationsBaseUrl resource", index_url))?;

    let base = if base.ends_with('/') {
        base
    } else {
        format!("{}/", base)
    };
    let registration: RegistrationIndex =
        http.get_json(&format!("{}{}/index.json", base, name.to_lowercase()))?;

    let mut packages = Vec::new();
    for page in registration.items {
        let leaves = match page.items {
            Some(items) => items,
            None => http.get_json::<RegistrationPage>(&page.id)?.items.unwrap_or_default(),
        };
        packages.extend(leaves.into_iter().map(|leaf| FeedPackage {
            version: leaf.catalog_entry.version,
            download: leaf.package_content,
            tags: leaf.catalog_entry.tags,
        }));
    }
    Ok(packages)
}

// Local feeds

/// Find the `.nupkg` files of a package in a local feed.
///
/// Both the hierarchical layout (`<id>/<version>/<id>.<version>.nupkg`) and
/// a flat folder of `<Id>.<Version>.nupkg` files are understood.
fn local_packages(root: &Path, name: &str) -> Result<Vec<FeedPackage>> {
    if !root.is_dir() {
        anyhow::bail!("local feed {} does not exist", root.display());
    }

    let id = name.to_lowercase();
    let mut found: Vec<(String, PathBuf)> = Vec::new();

    let hierarchical = root.join(&id);
    if hierarchical.is_dir() {
        for entry in std::fs::read_dir(&hierarchical)? {
            let entry = entry?;
            let version = entry.file_name().to_string_lossy().into_owned();
            let file = entry.path().join(format!("{}.{}.nupkg", id, version.to_lowercase()));
            if file.is_file() {
                found.push((version, file));
            }
        }
    }

    let prefix = format!("{}.", id);
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let lower = entry.file_name().to_string_lossy().to_lowercase();
        let Some(version) = lower
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".nupkg"))
        else {
            continue;
        };
        if !version.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        let version = version.to_string();
        if !found.iter().any(|(v, _)| v.eq_ignore_ascii_case(&version)) {
            found.push((version, entry.path()));
        }
    }

    found.sort();
    found
        .into_iter()
        .map(|(version, path)| {
            let tags = read_nuspec_tags(&path)?;
            Ok(FeedPackage {
                version,
                download: path.display().to_string(),
                tags,
            })
        })
        .collect()
}

/// Read the `<tags>` element of the `.nuspec` inside a package.
pub fn read_nuspec_tags(nupkg: &Path) -> Result<Vec<String>> {
    let bytes =
        std::fs::read(nupkg).with_context(|| format!("failed to read {}", nupkg.display()))?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .with_context(|| format!("{} is not a NuGet package", nupkg.display()))?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() || file.name().contains('/') || !file.name().ends_with(".nuspec") {
            continue;
        }

        let mut nuspec = String::new();
        file.read_to_string(&mut nuspec)
            .with_context(|| format!("failed to read the nuspec of {}", nupkg.display()))?;

        return Ok(NUSPEC_TAGS_RE
            .captures(&nuspec)
            .and_then(|c| c.get(1))
            .map(|tags| vec![tags.as_str().trim().to_string()])
            .unwrap_or_default());
    }

    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures::{build_nupkg, nuspec};
    use crate::util::config::NetConfig;
    use tempfile::TempDir;

    fn protocol() -> NuGetV3Protocol {
        NuGetV3Protocol::new(Arc::new(HttpClient::new(&NetConfig::default()).unwrap()))
    }

    #[test]
    fn test_parse_request() {
        let request = PackageRequestRef::new("https-nuget-v3://h/i|Name", "16.1.2", "Linux", false);
        let (feed, name) = parse_request(&request).unwrap();
        assert_eq!(feed, Feed::Remote("https://h/i".to_string()));
        assert_eq!(name, "Name");

        let request = PackageRequestRef::new("local-nuget-v3:///srv/feed|Name", "1.0.0", "Linux", false);
        let (feed, _) = parse_request(&request).unwrap();
        assert_eq!(feed, Feed::Local(PathBuf::from("/srv/feed")));

        let request = PackageRequestRef::new("https-nuget-v3://h/i", "1.0.0", "Linux", false);
        assert!(parse_request(&request).is_err());
    }

    #[test]
    fn test_version_detection() {
        assert!(is_version("16.1.2"));
        assert!(is_version("1.0.0-beta.1"));
        assert!(is_version("1.2.3.4"));
        assert!(!is_version("master"));
        assert!(!is_version("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"));
    }

    #[test]
    fn test_derived_version_is_deterministic() {
        let commit = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";
        let a = derived_version(commit, "Linux");
        assert_eq!(a, derived_version(commit, "linux"));
        assert_ne!(a, derived_version(commit, "Windows"));
        assert!(a.starts_with("0.0.0-h"));
        assert_eq!(a.len(), "0.0.0-h".len() + 16);
        assert!(is_version(&a));
    }

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags(["git=https://github.com/org/lib commit=abc123", "type=template"]);
        assert_eq!(tags.git.as_deref(), Some("https://github.com/org/lib"));
        assert_eq!(tags.commit.as_deref(), Some("abc123"));
        assert_eq!(tags.package_type, Some(PackageType::Template));
    }

    #[test]
    fn test_local_feed_semver() {
        let tmp = TempDir::new().unwrap();
        let nupkg = build_nupkg(&[
            ("Engine.nuspec", nuspec("Engine", "16.1.2", "git=/srv/engine commit=abc type=library").as_bytes()),
            ("protobuild/Linux/lib.txt", b"lib"),
        ]);
        std::fs::write(tmp.path().join("Engine.16.1.2.nupkg"), &nupkg).unwrap();

        let uri = format!("local-nuget-v3://{}|Engine", tmp.path().display());
        let request = PackageRequestRef::new(&uri, "16.1.2", "Linux", false);
        let metadata = match protocol().resolve(&request).unwrap() {
            PackageMetadata::NuGetV3(m) => m,
            other => panic!("unexpected metadata: {:?}", other),
        };

        assert_eq!(metadata.package_name, "Engine");
        assert_eq!(metadata.version, "16.1.2");
        assert_eq!(metadata.package_type, PackageType::Library);
        let binary = metadata.binary.unwrap();
        assert_eq!(binary.format, ArchiveFormat::NuGetZip);
        assert!(binary.uri.ends_with("Engine.16.1.2.nupkg"));
        assert_eq!(
            metadata.source,
            Some(SourceRepository {
                git_uri: "/srv/engine".to_string(),
                commit: "abc".to_string()
            })
        );
    }

    #[test]
    fn test_local_feed_commit_maps_to_derived_version() {
        let tmp = TempDir::new().unwrap();
        let commit = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";
        let version = derived_version(commit, "Linux");

        let dir = tmp.path().join("engine").join(&version);
        std::fs::create_dir_all(&dir).unwrap();
        let nupkg = build_nupkg(&[(
            "Engine.nuspec",
            nuspec("Engine", &version, "git=/srv/engine").as_bytes(),
        )]);
        std::fs::write(dir.join(format!("engine.{}.nupkg", version)), &nupkg).unwrap();

        let uri = format!("local-nuget-v3://{}|Engine", tmp.path().display());
        let request = PackageRequestRef::new(&uri, commit, "Linux", false);
        let metadata = match protocol().resolve(&request).unwrap() {
            PackageMetadata::NuGetV3(m) => m,
            other => panic!("unexpected metadata: {:?}", other),
        };

        assert_eq!(metadata.version, version);
        assert!(metadata.binary.is_some());
        assert_eq!(metadata.source.unwrap().commit, commit);
    }

    #[test]
    fn test_missing_version_has_no_binary() {
        let tmp = TempDir::new().unwrap();
        let nupkg = build_nupkg(&[("Engine.nuspec", nuspec("Engine", "1.0.0", "").as_bytes())]);
        std::fs::write(tmp.path().join("Engine.1.0.0.nupkg"), &nupkg).unwrap();

        let uri = format!("local-nuget-v3://{}|Engine", tmp.path().display());
        let request = PackageRequestRef::new(&uri, "2.0.0", "Linux", false);
        match protocol().resolve(&request).unwrap() {
            PackageMetadata::NuGetV3(m) => {
                assert!(m.binary.is_none());
                assert!(m.source.is_none());
            }
            other => panic!("unexpected metadata: {:?}", other),
        }
    }

    #[test]
    fn test_missing_feed_is_soft_failure() {
        let request = PackageRequestRef::new(
            "local-nuget-v3:///does/not/exist|Engine",
            "1.0.0",
            "Linux",
            false,
        );
        let err = protocol().resolve(&request).unwrap_err();
        assert!(!crate::core::errors::is_fatal(&err));
    }

    #[test]
    fn test_branch_without_source_repository_fails() {
        let tmp = TempDir::new().unwrap();
        let nupkg = build_nupkg(&[("Engine.nuspec", nuspec("Engine", "1.0.0", "").as_bytes())]);
        std::fs::write(tmp.path().join("Engine.1.0.0.nupkg"), &nupkg).unwrap();

        let uri = format!("local-nuget-v3://{}|Engine", tmp.path().display());
        let request = PackageRequestRef::new(&uri, "develop", "Linux", false);
        assert!(protocol().resolve(&request).is_err());
    }
}
