//! Package identifier parsing
//!
//! A package is addressed by its RPM filename,
//! `NAME-VERSION-RELEASE.ARCH.rpm`. Parsing is a pure function of the
//! filename and the filename can always be rebuilt from the parsed key.

use crate::error::{CacheError, CacheResult};
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// Architecture tag of source packages
pub const SOURCE_ARCH: &str = "src";

const DEBUGINFO_SUFFIX: &str = "-debuginfo";

static RPM_FILENAME: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"^(?P<name>[a-zA-Z0-9\-\._+]+)-(?P<version>[^-]+)-(?P<release>[^-]+)\.(?P<architecture>[^\.]+)\.rpm$",
    )
    .expect("RPM filename pattern is valid")
});

/// Structured identity of an RPM package
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PackageKey {
    /// Package name, without any `-debuginfo` suffix
    pub name: String,
    /// Upstream version
    pub version: String,
    /// Distribution release
    pub release: String,
    /// Architecture tag (`src` for source packages)
    pub architecture: String,
    /// Whether this is the `-debuginfo` subpackage
    pub is_debuginfo: bool,
}

impl PackageKey {
    /// Parse an RPM filename into a key
    ///
    /// Filenames containing a path separator are rejected outright, even
    /// though the grammar would not match most of them anyway.
    pub fn parse(filename: &str) -> CacheResult<Self> {
        if filename.contains(['/', '\\', '\0']) {
            return Err(CacheError::invalid_identifier(
                filename,
                "contains a path separator",
            ));
        }

        let caps = RPM_FILENAME.captures(filename).ok_or_else(|| {
            CacheError::invalid_identifier(
                filename,
                "does not match NAME-VERSION-RELEASE.ARCH.rpm",
            )
        })?;

        let raw_name = &caps["name"];
        let (name, is_debuginfo) = match raw_name.strip_suffix(DEBUGINFO_SUFFIX) {
            Some(stripped) => (stripped, true),
            None => (raw_name, false),
        };
        if name.is_empty() {
            return Err(CacheError::invalid_identifier(filename, "empty package name"));
        }

        Ok(Self {
            name: name.to_string(),
            version: caps["version"].to_string(),
            release: caps["release"].to_string(),
            architecture: caps["architecture"].to_string(),
            is_debuginfo,
        })
    }

    /// Rebuild the RPM filename this key was parsed from
    pub fn filename(&self) -> String {
        format!(
            "{}{}-{}-{}.{}.rpm",
            self.name,
            if self.is_debuginfo { DEBUGINFO_SUFFIX } else { "" },
            self.version,
            self.release,
            self.architecture
        )
    }

    /// Whether this is a source package
    pub fn is_source(&self) -> bool {
        self.architecture == SOURCE_ARCH
    }

    /// Name of the spec file a source package installs into `SPECS/`
    pub fn spec_file_name(&self) -> String {
        format!("{}.spec", self.name)
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename())
    }
}
