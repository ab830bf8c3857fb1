//! CLI command implementations

pub mod browse;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod parse;

pub use browse::execute as browse;
pub use cache::execute as cache;
pub use config::execute as config;
pub use fetch::execute as fetch;
pub use parse::execute as parse;
