//! Protocol trait and the scheme registry.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::core::{PackageError, PackageMetadata, PackageRequestRef};
use crate::sources::git::GitProtocol;
use crate::sources::http::HttpClient;
use crate::sources::local::LocalProtocol;
use crate::sources::native::NativeProtocol;
use crate::sources::nuget_v2::NuGetV2Protocol;
use crate::sources::nuget_v3::NuGetV3Protocol;
use crate::util::GlobalContext;

/// A resolver for one family of URL schemes.
///
/// Resolution is a lookup only: it describes how to fetch a package and
/// never transfers archive bytes.
pub trait PackageProtocol: Send + Sync {
    /// Schemes handled by this protocol.
    fn schemes(&self) -> &'static [&'static str];

    /// Look up the metadata for a request.
    fn resolve(&self, request: &PackageRequestRef) -> Result<PackageMetadata>;
}

/// Static map from scheme to protocol, assembled once per run.
pub struct ProtocolRegistry {
    protocols: HashMap<&'static str, Arc<dyn PackageProtocol>>,
}

impl ProtocolRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        ProtocolRegistry {
            protocols: HashMap::new(),
        }
    }

    /// The registry with every built-in protocol.
    pub fn new(gctx: &GlobalContext) -> Result<Self> {
        let http = Arc::new(HttpClient::new(&gctx.config().net)?);

        let mut registry = Self::empty();
        registry.register(Arc::new(GitProtocol::new()));
        registry.register(Arc::new(NativeProtocol::new(http.clone(), gctx.lookup_dir())));
        registry.register(Arc::new(NuGetV3Protocol::new(http.clone())));
        registry.register(Arc::new(NuGetV2Protocol::new(http)));
        registry.register(Arc::new(LocalProtocol::new()));
        Ok(registry)
    }

    /// Register a protocol for all of its schemes, replacing earlier ones.
    pub fn register(&mut self, protocol: Arc<dyn PackageProtocol>) {
        for scheme in protocol.schemes() {
            self.protocols.insert(scheme, protocol.clone());
        }
    }

    /// Whether a scheme has a protocol.
    pub fn supports(&self, scheme: &str) -> bool {
        self.protocols.contains_key(scheme)
    }

    /// Look up the metadata for a request by its scheme.
    pub fn resolve(&self, request: &PackageRequestRef) -> Result<PackageMetadata> {
        let scheme = request.scheme().unwrap_or_default();
        let protocol = self
            .protocols
            .get(scheme)
            .ok_or_else(|| PackageError::UnknownScheme {
                scheme: scheme.to_string(),
                uri: request.uri.clone(),
            })?;

        tracing::debug!("looking up {} via `{}`", request.uri, scheme);
        protocol.resolve(request)
    }
}
