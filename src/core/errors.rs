//! Structural errors raised while looking up and resolving packages.
//!
//! Transient failures (network hiccups, a missing lookup cache) travel as
//! plain `anyhow` errors and are absorbed by the orchestrator. The variants
//! here describe configuration and protocol problems that a retry cannot fix.

use thiserror::Error;

use crate::core::PackageType;

/// Error raised by protocol resolvers and resolve strategies.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("unknown package scheme `{scheme}` in `{uri}`")]
    UnknownScheme { scheme: String, uri: String },

    #[error("invalid package reference `{uri}`: {reason}")]
    InvalidReference { uri: String, reason: String },

    #[error("unsupported archive format `{0}`")]
    UnsupportedFormat(String),

    #[error("{strategy} resolution cannot handle {metadata} metadata for {package_type} packages")]
    UnsupportedCombination {
        strategy: &'static str,
        metadata: &'static str,
        package_type: PackageType,
    },

    #[error("`{query}` matches more than one package reference: {}", candidates.join(", "))]
    AmbiguousReference {
        query: String,
        candidates: Vec<String>,
    },

    #[error("`{command}` failed with exit code {code:?}\n{stderr}")]
    VcsFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to download {url} after {attempts} attempts: {}", errors.join("; "))]
    DownloadFailed {
        url: String,
        attempts: usize,
        errors: Vec<String>,
    },

    #[error("templates must be applied with an empty destination folder, got `{0}`")]
    TemplateFolderNotEmpty(String),

    #[error("package `{uri}` has neither a binary nor a source form for platform `{platform}`")]
    NothingToResolve { uri: String, platform: String },

    #[error("package resolution nested deeper than {0} modules")]
    NestingTooDeep(usize),

    #[error("package resolution in submodule `{name}` failed with exit code {code}")]
    SubmoduleFailed { name: String, code: i32 },

    #[error("lookup for `{uri}` failed: {reason}")]
    LookupFailed { uri: String, reason: String },
}

impl PackageError {
    /// Whether this error aborts the whole resolution pass.
    ///
    /// Lookup failures and exhausted downloads only skip the affected
    /// reference; everything else is a structural problem.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PackageError::LookupFailed { .. } | PackageError::DownloadFailed { .. }
        )
    }

    /// Exit code reported for this error when resolution runs nested.
    pub fn exit_code(&self) -> i32 {
        match self {
            PackageError::SubmoduleFailed { code, .. } => *code,
            _ => 1,
        }
    }
}

/// Check whether any error in the chain is a fatal [`PackageError`].
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<PackageError>())
        .any(PackageError::is_fatal)
}

/// Whether an error is a known transient failure (lookup or download).
///
/// Unlike [`is_fatal`], errors that carry no [`PackageError`] count as
/// neither.
pub fn is_transient(err: &anyhow::Error) -> bool {
    let mut causes = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<PackageError>())
        .peekable();
    causes.peek().is_some() && causes.all(|e| !e.is_fatal())
}

/// Exit code to report for an error, honouring nested submodule codes.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PackageError>())
        .map(PackageError::exit_code)
        .unwrap_or(1)
}
