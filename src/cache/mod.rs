//! Bounded cache of extracted packages
//!
//! Packages are fetched from upstream on first request, extracted under the
//! cache root and evicted least-recently-used once the total extracted size
//! exceeds the configured budget.
//!
//! # Layout
//!
//! | Path | Contents |
//! |------|----------|
//! | `<root>/<filename>` | Fully extracted package, named by its RPM filename |
//! | `<root>/.work/<id>/staging/<filename>` | Download and extraction in progress |
//! | `<root>/.work/<id>/trash/` | Evicted packages awaiting deletion |
//! | `<root>/.work/<id>.lock` | Held by the store owning workspace `<id>` |
//!
//! A directory at `<root>/<filename>` is only ever created by renaming a
//! completed staging directory, so its presence implies the package is
//! complete.
//!
//! # Entry States
//!
//! | State | Visible | Evictable |
//! |-------|---------|-----------|
//! | Pending | no | never |
//! | Ready, leased | yes | no |
//! | Ready | yes | yes, unless it is the last entry |

pub mod size;
pub mod store;
mod workspace;

pub use size::{dir_size, format_bytes, CacheSizeStatus};
pub use store::{
    CacheEntryInfo, CacheStore, EvictionReport, PackageLease, ResolvedPath, StoreConfig,
};
