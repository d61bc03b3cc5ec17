//! Package references - WHAT a module depends on.

use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::core::errors::PackageError;

/// URL schemes understood by the protocol registry.
pub const RECOGNIZED_SCHEMES: &[&str] = &[
    "http",
    "https",
    "http-git",
    "https-git",
    "local-git",
    "local-template-git",
    "http-nuget",
    "https-nuget",
    "http-nuget-v3",
    "https-nuget-v3",
    "local-nuget-v3",
    "local-template",
    "local-lzma",
    "local-gzip",
];

/// What a package materializes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageType {
    /// Reusable library, resolved into a folder of the module
    Library,
    /// Project scaffold, applied to the module root
    Template,
    /// Tool installed once per user
    GlobalTool,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Library => "library",
            PackageType::Template => "template",
            PackageType::GlobalTool => "global-tool",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "library" | "" => Ok(PackageType::Library),
            "template" => Ok(PackageType::Template),
            "global-tool" | "globaltool" | "tool" => Ok(PackageType::GlobalTool),
            other => Err(format!("unknown package type `{}`", other)),
        }
    }
}

/// A package declared by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    /// Scheme-qualified source, e.g. `https-git://github.com/org/lib`
    pub uri: String,

    /// Version, branch, tag or commit
    #[serde(rename = "ref", default)]
    pub git_ref: String,

    /// Destination folder, relative to the module root
    #[serde(default)]
    pub folder: String,

    /// Platforms this reference applies to (all when absent)
    #[serde(
        default,
        deserialize_with = "deserialize_platform_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub platforms: Option<Vec<String>>,
}

impl PackageRef {
    /// Create a reference that applies to every platform.
    pub fn new(uri: impl Into<String>, git_ref: impl Into<String>, folder: impl Into<String>) -> Self {
        PackageRef {
            uri: uri.into(),
            git_ref: git_ref.into(),
            folder: folder.into(),
            platforms: None,
        }
    }

    /// Restrict this reference to a comma-separated platform list.
    pub fn with_platforms(mut self, platforms: &str) -> Self {
        self.platforms = parse_platform_list(platforms);
        self
    }

    /// Move an `@ref` suffix out of the URI when no explicit ref was given.
    pub fn normalize(&mut self) {
        if self.git_ref.is_empty() {
            let (uri, git_ref) = split_uri_ref(&self.uri);
            if let Some(git_ref) = git_ref {
                self.uri = uri;
                self.git_ref = git_ref;
            }
        }
    }

    /// The scheme of the URI, if it has one.
    pub fn scheme(&self) -> Option<&str> {
        scheme_of(&self.uri)
    }

    /// Whether this reference applies to the given platform.
    pub fn is_applicable(&self, platform: &str) -> bool {
        match &self.platforms {
            None => true,
            Some(list) if list.is_empty() => true,
            Some(list) => list.iter().any(|p| p.eq_ignore_ascii_case(platform)),
        }
    }

    /// Check the structural invariants of a declared reference.
    ///
    /// An empty folder is allowed here; templates require one and the
    /// resolution strategies reject it for everything else.
    pub fn validate(&self) -> Result<(), PackageError> {
        if self.uri.trim().is_empty() {
            return Err(self.invalid("the URI is empty"));
        }

        match self.scheme() {
            Some(scheme) if RECOGNIZED_SCHEMES.contains(&scheme) => {}
            Some(scheme) => {
                return Err(PackageError::UnknownScheme {
                    scheme: scheme.to_string(),
                    uri: self.uri.clone(),
                })
            }
            None => return Err(self.invalid("the URI has no scheme")),
        }

        self.validate_folder()
    }

    /// Check that the folder names one directory directly below the module.
    ///
    /// `.`, `..`, drive prefixes and anything with a separator would point
    /// the destination at the module root or outside of it.
    pub fn validate_folder(&self) -> Result<(), PackageError> {
        if self.folder.is_empty() {
            return Ok(());
        }
        if self.folder.contains(['/', '\\']) {
            return Err(self.invalid("the destination folder must not contain path separators"));
        }

        let mut components = Path::new(&self.folder).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == self.folder.as_str() => Ok(()),
            _ => Err(self.invalid("the destination folder must be a plain directory name")),
        }
    }

    /// Build the lookup query for this reference.
    pub fn request(&self, platform: &str, prefer_cache: bool) -> PackageRequestRef {
        PackageRequestRef::new(&self.uri, &self.git_ref, platform, prefer_cache)
    }

    fn invalid(&self, reason: &str) -> PackageError {
        PackageError::InvalidReference {
            uri: self.uri.clone(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.git_ref.is_empty() {
            write!(f, "{}", self.uri)
        } else {
            write!(f, "{}@{}", self.uri, self.git_ref)
        }
    }
}

/// An immutable lookup query handed to protocol resolvers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRequestRef {
    pub uri: String,
    pub git_ref: String,
    pub platform: String,
    /// Prefer a previously cached lookup over a network query
    pub prefer_cache: bool,
}

impl PackageRequestRef {
    pub fn new(uri: &str, git_ref: &str, platform: &str, prefer_cache: bool) -> Self {
        PackageRequestRef {
            uri: uri.to_string(),
            git_ref: git_ref.to_string(),
            platform: platform.to_string(),
            prefer_cache,
        }
    }

    pub fn scheme(&self) -> Option<&str> {
        scheme_of(&self.uri)
    }

    /// The URI with its scheme prefix removed.
    pub fn body(&self) -> &str {
        self.uri
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.uri)
    }
}

/// Extract the scheme of `scheme://rest`.
pub fn scheme_of(uri: &str) -> Option<&str> {
    let (scheme, _) = uri.split_once("://")?;
    if scheme.is_empty() {
        None
    } else {
        Some(scheme)
    }
}

/// Split `scheme://rest@ref` into the URI and the ref.
///
/// Only an `@` after the last `/` counts, so credentials in the
/// authority (`https://user@host/repo`) are left alone.
pub fn split_uri_ref(spec: &str) -> (String, Option<String>) {
    let body_start = spec.find("://").map(|i| i + 3).unwrap_or(0);
    let last_slash = spec[body_start..]
        .rfind('/')
        .map(|i| body_start + i)
        .unwrap_or(body_start);

    match spec[last_slash..].rfind('@') {
        Some(at) if !spec[last_slash + at + 1..].is_empty() => {
            let at = last_slash + at;
            (spec[..at].to_string(), Some(spec[at + 1..].to_string()))
        }
        _ => (spec.to_string(), None),
    }
}

fn parse_platform_list(s: &str) -> Option<Vec<String>> {
    let list: Vec<String> = s
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

fn deserialize_platform_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
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
        None => None,
        Some(Raw::Text(s)) => parse_platform_list(&s),
        Some(Raw::List(list)) => parse_platform_list(&list.join(",")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_well_formed() {
        let pkg = PackageRef::new("local-git://tmp/repo", "master", "Dep");
        assert!(pkg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_separator_in_folder() {
        let pkg = PackageRef::new("https-git://github.com/org/lib", "master", "Libs/Dep");
        assert!(matches!(
            pkg.validate(),
            Err(PackageError::InvalidReference { .. })
        ));

        let pkg = PackageRef::new("https-git://github.com/org/lib", "master", "Libs\\Dep");
        assert!(pkg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_relative_folders() {
        for folder in [".", ".."] {
            let pkg = PackageRef::new("https-git://github.com/org/lib", "master", folder);
            assert!(
                matches!(pkg.validate(), Err(PackageError::InvalidReference { .. })),
                "{:?} should be rejected",
                folder
            );
        }

        let pkg = PackageRef::new("https-git://github.com/org/lib", "master", "..Dep");
        assert!(pkg.validate().is_ok());
    }

    #[test]
    fn test_validate_allows_empty_folder() {
        let pkg = PackageRef::new("local-template://tmp/template", "", "");
        assert!(pkg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_scheme() {
        let pkg = PackageRef::new("ftp://example.com/lib", "1.0", "Lib");
        assert!(matches!(
            pkg.validate(),
            Err(PackageError::UnknownScheme { scheme, .. }) if scheme == "ftp"
        ));

        let pkg = PackageRef::new("", "1.0", "Lib");
        assert!(pkg.validate().is_err());
    }

    #[test]
    fn test_platform_applicability() {
        let all = PackageRef::new("local-git://a", "master", "A");
        assert!(all.is_applicable("Linux"));

        let some = PackageRef::new("local-git://a", "master", "A").with_platforms("Windows, Linux");
        assert!(some.is_applicable("linux"));
        assert!(some.is_applicable("Windows"));
        assert!(!some.is_applicable("MacOS"));
    }

    #[test]
    fn test_split_uri_ref() {
        assert_eq!(
            split_uri_ref("https-git://github.com/org/lib@v1.2"),
            ("https-git://github.com/org/lib".to_string(), Some("v1.2".to_string()))
        );
        assert_eq!(
            split_uri_ref("https-git://user@github.com/org/lib"),
            ("https-git://user@github.com/org/lib".to_string(), None)
        );
        assert_eq!(
            split_uri_ref("local-git://tmp/repo"),
            ("local-git://tmp/repo".to_string(), None)
        );
    }

    #[test]
    fn test_normalize_moves_ref_out_of_uri() {
        let mut pkg = PackageRef::new("local-git://tmp/repo@develop", "", "Dep");
        pkg.normalize();
        assert_eq!(pkg.uri, "local-git://tmp/repo");
        assert_eq!(pkg.git_ref, "develop");
    }

    #[test]
    fn test_deserialize_platforms() {
        #[derive(Deserialize)]
        struct Doc {
            package: Vec<PackageRef>,
        }

        let doc: Doc = toml::from_str(
            r#"
[[package]]
uri = "local-git://a"
ref = "master"
folder = "A"
platforms = "Windows,Linux"

[[package]]
uri = "local-git://b"
ref = "master"
folder = "B"
"#,
        )
        .unwrap();

        assert_eq!(
            doc.package[0].platforms,
            Some(vec!["Windows".to_string(), "Linux".to_string()])
        );
        assert_eq!(doc.package[1].platforms, None);
    }

    #[test]
    fn test_package_type_parse() {
        assert_eq!("library".parse::<PackageType>(), Ok(PackageType::Library));
        assert_eq!("global-tool".parse::<PackageType>(), Ok(PackageType::GlobalTool));
        assert!("plugin".parse::<PackageType>().is_err());
    }

    #[test]
    fn test_request_body() {
        let req = PackageRequestRef::new("https-nuget-v3://h/i|Name", "1.0.0", "Linux", false);
        assert_eq!(req.scheme(), Some("https-nuget-v3"));
        assert_eq!(req.body(), "h/i|Name");
    }
}
