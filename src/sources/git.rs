//! Git family - packages cloned from a repository.

use anyhow::Result;

use crate::core::{GitMetadata, PackageError, PackageMetadata, PackageRequestRef, PackageType};
use crate::sources::protocol::PackageProtocol;

/// Resolves `local-git`, `http-git`, `https-git` and `local-template-git`.
#[derive(Debug, Default)]
pub struct GitProtocol;

impl GitProtocol {
    pub fn new() -> Self {
        GitProtocol
    }
}

/// Rewrite a git-family URI into the transport URL handed to `git`.
pub fn clone_uri(uri: &str) -> Option<String> {
    let (scheme, rest) = uri.split_once("://")?;
    match scheme {
        "local-git" | "local-template-git" => Some(rest.to_string()),
        "http-git" => Some(format!("http://{}", rest)),
        "https-git" => Some(format!("https://{}", rest)),
        _ => None,
    }
}

impl PackageProtocol for GitProtocol {
    fn schemes(&self) -> &'static [&'static str] {
        &["local-git", "http-git", "https-git", "local-template-git"]
    }

    fn resolve(&self, request: &PackageRequestRef) -> Result<PackageMetadata> {
        let clone_uri = clone_uri(&request.uri).ok_or_else(|| PackageError::InvalidReference {
            uri: request.uri.clone(),
            reason: "not a git package URI".to_string(),
        })?;

        if clone_uri.is_empty() {
            return Err(PackageError::InvalidReference {
                uri: request.uri.clone(),
                reason: "the repository location is empty".to_string(),
            }
            .into());
        }

        let package_type = if request.scheme() == Some("local-template-git") {
            PackageType::Template
        } else {
            PackageType::Library
        };

        let git_ref = if request.git_ref.is_empty() {
            "master".to_string()
        } else {
            request.git_ref.clone()
        };

        Ok(PackageMetadata::Git(GitMetadata {
            clone_uri,
            git_ref,
            package_type,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(uri: &str, git_ref: &str) -> GitMetadata {
        let request = PackageRequestRef::new(uri, git_ref, "Linux", false);
        match GitProtocol::new().resolve(&request).unwrap() {
            PackageMetadata::Git(git) => git,
            other => panic!("expected git metadata, got {:?}", other),
        }
    }

    #[test]
    fn test_local_git_rewrite() {
        let git = resolve("local-git://tmp/repo", "master");
        assert_eq!(git.clone_uri, "tmp/repo");
        assert_eq!(git.git_ref, "master");
        assert_eq!(git.package_type, PackageType::Library);
    }

    #[test]
    fn test_http_rewrites() {
        assert_eq!(resolve("http-git://h/p", "v1").clone_uri, "http://h/p");
        assert_eq!(
            resolve("https-git://github.com/org/lib", "v1").clone_uri,
            "https://github.com/org/lib"
        );
    }

    #[test]
    fn test_template_scheme() {
        let git = resolve("local-template-git:///srv/templates/console", "");
        assert_eq!(git.clone_uri, "/srv/templates/console");
        assert_eq!(git.package_type, PackageType::Template);
        assert_eq!(git.git_ref, "master");
    }

    #[test]
    fn test_empty_location_is_rejected() {
        let request = PackageRequestRef::new("local-git://", "master", "Linux", false);
        assert!(GitProtocol::new().resolve(&request).is_err());
    }
}
