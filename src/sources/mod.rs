//! Protocol resolvers.
//!
//! Each protocol turns a package request into typed metadata describing how
//! the package can be fetched (git repositories, native package servers,
//! NuGet feeds, local folders and archives).

pub mod git;
pub mod http;
pub mod local;
pub mod native;
pub mod nuget_v2;
pub mod nuget_v3;
pub mod protocol;

pub use http::HttpClient;
pub use protocol::{PackageProtocol, ProtocolRegistry};
