//! rpmbrowse - on-demand RPM package browser
//!
//! Fetches RPM packages from an upstream build system, extracts them into
//! a bounded local cache and resolves client paths inside them without
//! letting those paths escape the package directory.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod package;
pub mod resolve;

pub use cache::{CacheStore, PackageLease, StoreConfig};
pub use error::{CacheError, CacheResult, ErrorKind};
pub use package::PackageKey;
