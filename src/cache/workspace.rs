//! Per-store scratch space under the cache root
//!
//! Every open store owns `<root>/.work/<id>/` (staging and trash) and holds
//! an exclusive `flock` on `<root>/.work/<id>.lock` for as long as it lives.
//! Opening a store sweeps only workspaces whose lock is free, so concurrent
//! processes sharing a cache root never delete each other's in-flight loads.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Directory under the cache root holding all workspaces
pub const WORK_DIR: &str = ".work";

const LOCK_SUFFIX: &str = ".lock";
const STAGING_DIR: &str = "staging";
const TRASH_DIR: &str = "trash";
const MAX_CREATE_ATTEMPTS: usize = 8;

static NEXT_WORKSPACE: AtomicU64 = AtomicU64::new(0);

/// Scratch directory owned by one store instance
///
/// Dropping it deletes the directory and releases the lock.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    lock_path: PathBuf,
    _lock: File,
}

impl Workspace {
    /// Create and lock a fresh workspace under `work_root`
    pub fn create(work_root: &Path) -> io::Result<Self> {
        fs::create_dir_all(work_root)?;

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let id = workspace_id();
            let lock_path = work_root.join(format!("{id}{LOCK_SUFFIX}"));
            let lock = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)?;

            // A sweeper may have unlinked the file between open and lock.
            if !try_lock_exclusive(&lock)? || !same_file(&lock, &lock_path)? {
                continue;
            }

            let dir = work_root.join(&id);
            remove_dir(&dir)?;
            fs::create_dir_all(dir.join(STAGING_DIR))?;
            fs::create_dir_all(dir.join(TRASH_DIR))?;
            debug!("Created workspace {}", dir.display());

            return Ok(Self {
                dir,
                lock_path,
                _lock: lock,
            });
        }

        Err(io::Error::new(
            ErrorKind::WouldBlock,
            format!("could not lock a workspace under {}", work_root.display()),
        ))
    }

    /// Where loads are fetched and extracted before publishing
    pub fn staging_dir(&self) -> PathBuf {
        self.dir.join(STAGING_DIR)
    }

    /// Where evicted trees wait for deletion
    pub fn trash_dir(&self) -> PathBuf {
        self.dir.join(TRASH_DIR)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = remove_dir(&self.dir) {
            warn!("Failed to remove workspace {}: {}", self.dir.display(), e);
        }
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// Delete workspaces left behind by stores that are gone
///
/// Returns the directories removed. Workspaces whose lock is held by a live
/// store are left alone.
pub fn sweep_abandoned(work_root: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(work_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut removed = Vec::new();

    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if let Some(id) = name.strip_suffix(LOCK_SUFFIX) {
            let lock = match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(lock) => lock,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if !try_lock_exclusive(&lock)? {
                continue;
            }
            let dir = work_root.join(id);
            remove_dir(&dir)?;
            let _ = fs::remove_file(&path);
            removed.push(dir);
        } else if path.is_dir() && !work_root.join(format!("{name}{LOCK_SUFFIX}")).exists() {
            // Locks are created before their directory, so this one is dead.
            remove_dir(&path)?;
            removed.push(path);
        }
    }

    Ok(removed)
}

fn workspace_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = NEXT_WORKSPACE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", std::process::id(), nanos, seq)
}

fn remove_dir(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Non-blocking exclusive `flock`; `Ok(false)` when another holder has it
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: `file` owns a valid descriptor for the duration of the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        // Without flock ownership is unknowable, so nothing is ever swept.
        let _ = file;
        Ok(false)
    }
}

/// Whether `path` still names the open `file`
fn same_file(file: &File, path: &Path) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let open = file.metadata()?;
        match fs::metadata(path) {
            Ok(named) => Ok(open.dev() == named.dev() && open.ino() == named.ino()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (file, path);
        Ok(true)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn live_workspace_survives_sweep() {
        let dir = TempDir::new().unwrap();
        let work_root = dir.path().join(WORK_DIR);
        let ws = Workspace::create(&work_root).unwrap();
        std::fs::write(ws.staging_dir().join("in-flight"), b"x").unwrap();

        let removed = sweep_abandoned(&work_root).unwrap();

        assert!(removed.is_empty());
        assert!(ws.staging_dir().join("in-flight").is_file());
    }

    #[test]
    fn abandoned_workspaces_are_swept() {
        let dir = TempDir::new().unwrap();
        let work_root = dir.path().join(WORK_DIR);
        std::fs::create_dir_all(work_root.join("111-0-0/staging/pkg")).unwrap();
        std::fs::write(work_root.join("111-0-0.lock"), b"").unwrap();
        std::fs::create_dir_all(work_root.join("orphan/trash")).unwrap();

        let removed = sweep_abandoned(&work_root).unwrap();

        assert_eq!(removed.len(), 2);
        assert!(!work_root.join("111-0-0").exists());
        assert!(!work_root.join("111-0-0.lock").exists());
        assert!(!work_root.join("orphan").exists());
    }

    #[test]
    fn drop_removes_workspace() {
        let dir = TempDir::new().unwrap();
        let work_root = dir.path().join(WORK_DIR);
        let ws = Workspace::create(&work_root).unwrap();
        let staging = ws.staging_dir();

        drop(ws);

        assert!(!staging.exists());
        assert_eq!(std::fs::read_dir(&work_root).unwrap().count(), 0);
    }

    #[test]
    fn sweep_of_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(sweep_abandoned(&dir.path().join(WORK_DIR)).unwrap().is_empty());
    }
}
