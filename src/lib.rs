//! pkgsync - package resolution for module trees
//!
//! This crate provides the core library functionality for pkgsync:
//! protocol lookups, binary and source resolution, the content cache
//! and the package manager that walks a module and its submodules.

pub mod cache;
pub mod core;
pub mod ops;
pub mod sources;
pub mod util;

/// Test utilities and mocks for pkgsync unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides fixture builders for modules, Git
/// repositories and archives, and a scriptable protocol.
#[cfg(test)]
pub mod test_support;

pub use core::{ModuleInfo, PackageError, PackageMetadata, PackageRef, PackageType};
pub use ops::{PackageManager, ResolveOptions};
pub use util::context::{GlobalContext, ResolveContext};
