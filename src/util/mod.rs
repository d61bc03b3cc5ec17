//! Shared utilities

pub mod config;
pub mod context;
pub mod fs;
pub mod git;
pub mod hash;
pub mod marker;
pub mod process;
pub mod retry;
pub mod shell;

pub use config::Config;
pub use context::{GlobalContext, ResolveContext};
pub use retry::RetryPolicy;
pub use shell::Shell;
