//! Test utilities and mocks for pkgsync unit tests.
//!
//! This module provides mock implementations for the seams that would
//! otherwise need a network: protocols that answer from a table, and
//! fixtures that build archives and git repositories on disk.
//!
//! # Example
//!
//! ```rust,ignore
//! use pkgsync::test_support::MockProtocol;
//!
//! let protocol = MockProtocol::new(&["https"])
//!     .with("https://packages.example.com/Engine", metadata);
//! assert_eq!(protocol.calls().len(), 0);
//! ```

pub mod fixtures;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::core::{PackageError, PackageMetadata, PackageRequestRef};
use crate::sources::PackageProtocol;

// Re-export fixtures for convenience
pub use fixtures::*;

/// Protocol answering from a fixed table of URI -> metadata.
///
/// Every lookup is recorded so tests can assert that no lookup happened.
#[derive(Clone)]
pub struct MockProtocol {
    schemes: &'static [&'static str],
    responses: HashMap<String, PackageMetadata>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockProtocol {
    /// Create a mock for the given schemes.
    pub fn new(schemes: &'static [&'static str]) -> Self {
        MockProtocol {
            schemes,
            responses: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer lookups of `uri` with `metadata`.
    pub fn with(mut self, uri: &str, metadata: PackageMetadata) -> Self {
        self.responses.insert(uri.to_string(), metadata);
        self
    }

    /// URIs looked up so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PackageProtocol for MockProtocol {
    fn schemes(&self) -> &'static [&'static str] {
        self.schemes
    }

    fn resolve(&self, request: &PackageRequestRef) -> Result<PackageMetadata> {
        self.calls.lock().unwrap().push(request.uri.clone());
        self.responses.get(&request.uri).cloned().ok_or_else(|| {
            PackageError::LookupFailed {
                uri: request.uri.clone(),
                reason: "no mock response".to_string(),
            }
            .into()
        })
    }
}
