//! High-level operations.
//!
//! This module contains the resolution strategies and the package manager
//! that drives them across a module tree.

pub mod binary;
pub mod invoke;
pub mod locator;
pub mod mirror;
pub mod package_manager;
pub mod redirect;
pub mod source;
pub mod target;
pub mod template;
pub mod tools;
pub mod unpack;

pub use binary::{BinaryResolver, SELF_EXE_NAME};
pub use invoke::{select_invoker, InProcessInvoker, SubmoduleInvoker, SubprocessInvoker};
pub use locator::{PackageLocator, WorkingCopyLocator};
pub use mirror::MirrorCache;
pub use package_manager::{safe_resolve_enabled, PackageManager, ResolveOptions};
pub use redirect::PackageRedirector;
pub use source::SourceResolver;
pub use target::{Outcome, ResolveTarget};
pub use template::{DirectoryTemplateApplier, TemplateApplier};
pub use tools::ToolRegistry;
pub use unpack::unpack_archive;
