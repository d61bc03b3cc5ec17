//! Core data model: package references, metadata and modules.

pub mod errors;
pub mod metadata;
pub mod module;
pub mod package_ref;

pub use errors::PackageError;
pub use metadata::{
    ArchiveFormat, BinaryArchive, FolderMetadata, GitMetadata, NativeMetadata, NuGetV3Metadata,
    PackageMetadata, PackageTransformer, SourceRepository, TransformedMetadata,
};
pub use module::ModuleInfo;
pub use package_ref::{PackageRef, PackageRequestRef, PackageType};
