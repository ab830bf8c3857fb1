//! Path resolution inside an extracted package
//!
//! Client paths are joined onto the package root and canonicalized, so `..`
//! segments and symlinks are followed before the containment check. A path
//! that lands outside the root is a [`CacheError::PathTraversal`], which is
//! never reported as a missing file.

use crate::error::{CacheError, CacheResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Bound on dangling links followed by hand, matching the usual `SYMLOOP_MAX`
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolve `relative` against `root`, refusing anything outside `root`
///
/// Returns the canonical path of the file or directory.
pub fn resolve(root: &Path, relative: &str) -> CacheResult<PathBuf> {
    let traversal = || CacheError::PathTraversal {
        root: root.to_path_buf(),
        path: relative.to_string(),
    };

    let rel = Path::new(relative);
    if rel.has_root() || escapes_lexically(rel) {
        return Err(traversal());
    }

    let root_canonical = root
        .canonicalize()
        .map_err(|e| CacheError::io(format!("canonicalizing {}", root.display()), e))?;

    let joined = root_canonical.join(rel);
    let canonical = match joined.canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if dangles_outside(&root_canonical, &joined) {
                return Err(traversal());
            }
            return Err(CacheError::NotFound(joined));
        }
        Err(e) => {
            return Err(CacheError::io(
                format!("canonicalizing {}", joined.display()),
                e,
            ))
        }
    };

    if !canonical.starts_with(&root_canonical) {
        return Err(traversal());
    }

    Ok(canonical)
}

/// Whether a missing `path` would land outside `root` if it existed
///
/// The deepest existing ancestor decides. A dangling symlink is followed by
/// hand, since `canonicalize` gives up on it. Anything undecidable counts
/// as outside.
fn dangles_outside(root: &Path, path: &Path) -> bool {
    let mut candidate = path.to_path_buf();

    for _ in 0..MAX_SYMLINK_HOPS {
        let Some(existing) = candidate
            .ancestors()
            .find(|a| a.symlink_metadata().is_ok())
            .map(Path::to_path_buf)
        else {
            return true;
        };

        match existing.canonicalize() {
            Ok(real) => return !real.starts_with(root),
            Err(_) => {
                let Ok(target) = fs::read_link(&existing) else {
                    return true;
                };
                candidate = match existing.parent() {
                    Some(parent) => parent.join(target),
                    None => target,
                };
            }
        }
    }

    true
}

/// Whether the `..` segments of `rel` climb above its starting point
fn escapes_lexically(rel: &Path) -> bool {
    let mut depth: usize = 0;
    for component in rel.components() {
        match component {
            Component::ParentDir => {
                if depth == 0 {
                    return true;
                }
                depth -= 1;
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    false
}
