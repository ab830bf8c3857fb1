//! The package cache store
//!
//! Maps package identifiers to extracted trees under the cache root, runs
//! at most one fetch/extract per key, and keeps the total extracted size
//! under budget with least-recently-used eviction.

use crate::cache::size::dir_size;
use crate::cache::workspace::{sweep_abandoned, Workspace, WORK_DIR};
use crate::config::Config;
use crate::error::{CacheError, CacheResult};
use crate::extract::Extractor;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::package::PackageKey;
use crate::resolve::resolve;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::ErrorKind;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

/// Settings for one cache store instance
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Cache root directory
    pub root: PathBuf,
    /// Maximum total extracted size in bytes
    pub max_cache_size: u64,
    /// Bound on one download
    pub fetch_timeout: Duration,
    /// Bound on one extraction
    pub extract_timeout: Duration,
}

impl StoreConfig {
    /// Build store settings from the loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.cache.dir_or_default(),
            max_cache_size: config.cache.max_cache_size,
            fetch_timeout: Duration::from_secs(config.upstream.timeout_secs),
            extract_timeout: Duration::from_secs(config.extract.timeout_secs),
        }
    }
}

type LoadFuture = Shared<BoxFuture<'static, CacheResult<()>>>;

enum EntryState {
    /// Fetch/extract in flight; the directory is not visible yet
    Pending(LoadFuture),
    /// Extracted and published
    Ready {
        size_bytes: u64,
        last_access: DateTime<Utc>,
        tick: u64,
    },
}

struct Entry {
    /// Distinguishes successive entries for the same key
    id: u64,
    filename: String,
    state: EntryState,
    /// Outstanding leases; pinned entries are never evicted
    pins: usize,
}

/// Bookkeeping shared by all callers, guarded by one lock
#[derive(Default)]
struct State {
    entries: HashMap<PackageKey, Entry>,
    /// Ready entries ordered by last access (oldest first)
    recency: BTreeMap<u64, PackageKey>,
    total_size_bytes: u64,
    next_id: u64,
    clock: u64,
}

struct Victim {
    filename: String,
    id: u64,
    size_bytes: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Pin an existing entry, returning its id and the load to wait on
    fn join(&mut self, key: &PackageKey) -> Option<(u64, Option<LoadFuture>)> {
        let entry = self.entries.get_mut(key)?;
        entry.pins += 1;
        let id = entry.id;
        let pending = match &entry.state {
            EntryState::Pending(load) => Some(load.clone()),
            EntryState::Ready { .. } => None,
        };
        if pending.is_none() {
            self.touch(key);
        }
        Some((id, pending))
    }

    fn touch(&mut self, key: &PackageKey) {
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(key) {
            if let EntryState::Ready {
                last_access,
                tick: old,
                ..
            } = &mut entry.state
            {
                self.recency.remove(&*old);
                *old = tick;
                *last_access = Utc::now();
                self.recency.insert(tick, key.clone());
            }
        }
    }

    fn unpin(&mut self, key: &PackageKey, id: u64) {
        if let Some(entry) = self.entries.get_mut(key) {
            if entry.id == id {
                entry.pins = entry.pins.saturating_sub(1);
            }
        }
    }

    fn insert_ready(
        &mut self,
        key: PackageKey,
        id: u64,
        size_bytes: u64,
        last_access: DateTime<Utc>,
        pins: usize,
    ) {
        let tick = self.next_tick();
        self.recency.insert(tick, key.clone());
        self.total_size_bytes += size_bytes;
        self.entries.insert(
            key.clone(),
            Entry {
                id,
                filename: key.filename(),
                state: EntryState::Ready {
                    size_bytes,
                    last_access,
                    tick,
                },
                pins,
            },
        );
    }

    fn mark_ready(&mut self, key: &PackageKey, id: u64, size_bytes: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.id == id => {
                let pins = entry.pins;
                self.insert_ready(key.clone(), id, size_bytes, Utc::now(), pins);
                true
            }
            _ => false,
        }
    }

    fn remove_pending(&mut self, key: &PackageKey, id: u64) {
        if self
            .entries
            .get(key)
            .is_some_and(|e| e.id == id && matches!(e.state, EntryState::Pending(_)))
        {
            self.entries.remove(key);
        }
    }

    /// Remove unpinned Ready entries, oldest first, while over `max_bytes`
    ///
    /// With `keep_one` the last Ready entry is never taken. Pending entries
    /// are not in the recency index and so are never candidates.
    fn take_victims(&mut self, max_bytes: u64, keep_one: bool) -> Vec<Victim> {
        let floor = usize::from(keep_one);
        let mut victims = Vec::new();

        while self.total_size_bytes > max_bytes && self.recency.len() > floor {
            let candidate = self
                .recency
                .iter()
                .find(|(_, key)| self.entries.get(*key).is_some_and(|e| e.pins == 0))
                .map(|(tick, key)| (*tick, key.clone()));
            let Some((tick, key)) = candidate else {
                break;
            };

            self.recency.remove(&tick);
            if let Some(entry) = self.entries.remove(&key) {
                if let EntryState::Ready { size_bytes, .. } = entry.state {
                    self.total_size_bytes -= size_bytes;
                    victims.push(Victim {
                        filename: entry.filename,
                        id: entry.id,
                        size_bytes,
                    });
                }
            }
        }

        victims
    }
}

/// Outcome of an eviction pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvictionReport {
    /// Filenames of evicted packages, oldest first
    pub evicted: Vec<String>,
    /// Bytes released
    pub freed_bytes: u64,
    /// Cache size after the pass
    pub total_size_bytes: u64,
    /// Still over budget with nothing evictable
    pub stalled: bool,
}

/// Snapshot of one Ready cache entry
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub key: PackageKey,
    pub filename: String,
    pub root: PathBuf,
    pub size_bytes: u64,
    pub last_access: DateTime<Utc>,
    pub pins: usize,
}

struct Inner {
    config: StoreConfig,
    fetcher: Arc<dyn Fetcher>,
    extractor: Extractor,
    workspace: Workspace,
    state: Mutex<State>,
}

/// Bounded cache of extracted packages
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

impl CacheStore {
    /// Open the store rooted at `config.root`
    ///
    /// Workspaces abandoned by stores that are gone are removed, and the new
    /// store claims its own. Existing package directories are adopted as
    /// cached entries in modification-time order. Eviction runs once before
    /// returning.
    pub async fn open(
        config: StoreConfig,
        fetcher: Arc<dyn Fetcher>,
        extractor: Extractor,
    ) -> CacheResult<Self> {
        fs::create_dir_all(&config.root).await.map_err(|e| {
            CacheError::io(format!("creating cache directory {}", config.root.display()), e)
        })?;

        let root = config.root.clone();
        let (workspace, adopted) = tokio::task::spawn_blocking(move || {
            let work_root = root.join(WORK_DIR);
            let io_err =
                |e: std::io::Error| CacheError::io(format!("preparing {}", work_root.display()), e);
            for dir in sweep_abandoned(&work_root).map_err(io_err)? {
                debug!("Removed abandoned workspace {}", dir.display());
            }
            let workspace = Workspace::create(&work_root).map_err(io_err)?;
            Ok::<_, CacheError>((workspace, scan_packages(&root)?))
        })
        .await
        .map_err(|e| CacheError::Internal(format!("cache scan failed: {e}")))??;

        let store = Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                extractor,
                workspace,
                state: Mutex::new(State::default()),
            }),
        };

        {
            let mut state = store.inner.state.lock();
            for (key, size_bytes, modified) in adopted {
                debug!("Adopting cached {} ({} bytes)", key, size_bytes);
                let id = state.next_id();
                state.insert_ready(key, id, size_bytes, modified, 0);
            }
            info!(
                "Opened cache at {} with {} package(s), {} bytes",
                store.inner.config.root.display(),
                state.entries.len(),
                state.total_size_bytes
            );
        }

        store.evict().await;
        Ok(store)
    }

    /// Open a store using the HTTP fetcher and the system packaging tools
    pub async fn from_config(config: &Config) -> CacheResult<Self> {
        let fetcher = HttpFetcher::new(
            config.upstream.url_template.clone(),
            config.cache.rpm_size_limit,
            Duration::from_secs(config.upstream.timeout_secs),
        );
        Self::open(
            StoreConfig::from_config(config),
            Arc::new(fetcher),
            Extractor::system(),
        )
        .await
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.inner.config.root
    }

    /// Configured size budget in bytes
    pub fn max_cache_size(&self) -> u64 {
        self.inner.config.max_cache_size
    }

    /// Make sure the package named `filename` is extracted on disk
    ///
    /// A cached package is returned immediately. Otherwise the first caller
    /// starts a fetch/extract and every concurrent caller for the same key
    /// waits on that one operation and sees its result. The returned lease
    /// keeps the package from being evicted until it is dropped.
    pub async fn ensure_loaded(&self, filename: &str) -> CacheResult<PackageLease> {
        let key = PackageKey::parse(filename)?;

        let (id, pending) = {
            let mut state = self.inner.state.lock();
            match state.join(&key) {
                Some(joined) => joined,
                None => self.start_load(&mut state, &key),
            }
        };

        let lease = PackageLease {
            inner: Arc::clone(&self.inner),
            root: self.inner.package_dir(&key.filename()),
            key,
            id,
        };

        match pending {
            None => debug!("Cache hit for {}", lease.key),
            Some(load) => {
                debug!("Waiting for load of {}", lease.key);
                load.await?;
            }
        }

        Ok(lease)
    }

    /// Load `filename` and resolve `relative` inside it
    pub async fn open_path(&self, filename: &str, relative: &str) -> CacheResult<ResolvedPath> {
        let lease = self.ensure_loaded(filename).await?;
        let relative = relative.to_string();
        let (lease, resolved) = tokio::task::spawn_blocking(move || {
            let resolved = lease.resolve(&relative);
            (lease, resolved)
        })
        .await
        .map_err(|e| CacheError::Internal(format!("path resolution failed: {e}")))?;
        Ok(ResolvedPath {
            path: resolved?,
            lease,
        })
    }

    /// Evict least-recently-used packages until the cache fits its budget
    ///
    /// The most recent package always survives, and packages with
    /// outstanding leases are skipped.
    pub async fn evict(&self) -> EvictionReport {
        let (trash, report) = self
            .inner
            .take_and_trash(self.inner.config.max_cache_size, true);
        self.inner.empty_trash(trash).await;
        report
    }

    /// Remove every cached package that has no outstanding lease
    pub async fn clear(&self) -> EvictionReport {
        let (trash, report) = self.inner.take_and_trash(0, false);
        self.inner.empty_trash(trash).await;
        report
    }

    /// Sum of the sizes of all cached packages
    pub fn total_size_bytes(&self) -> u64 {
        self.inner.state.lock().total_size_bytes
    }

    /// Cached packages, least recently used first
    pub fn entries(&self) -> Vec<CacheEntryInfo> {
        let state = self.inner.state.lock();
        state
            .recency
            .values()
            .filter_map(|key| {
                let entry = state.entries.get(key)?;
                match entry.state {
                    EntryState::Ready {
                        size_bytes,
                        last_access,
                        ..
                    } => Some(CacheEntryInfo {
                        key: key.clone(),
                        filename: entry.filename.clone(),
                        root: self.inner.package_dir(&entry.filename),
                        size_bytes,
                        last_access,
                        pins: entry.pins,
                    }),
                    EntryState::Pending(_) => None,
                }
            })
            .collect()
    }

    /// Number of loads currently in flight
    pub fn pending_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .entries
            .values()
            .filter(|e| matches!(e.state, EntryState::Pending(_)))
            .count()
    }

    /// Reserve `key` as Pending and spawn its load
    fn start_load(&self, state: &mut State, key: &PackageKey) -> (u64, Option<LoadFuture>) {
        let id = state.next_id();
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();

        let handle = tokio::spawn(async move { inner.run_load(task_key, id).await });
        let load: LoadFuture = handle
            .map(|joined| {
                joined.unwrap_or_else(|e| Err(CacheError::Internal(format!("load task failed: {e}"))))
            })
            .boxed()
            .shared();

        state.entries.insert(
            key.clone(),
            Entry {
                id,
                filename: key.filename(),
                state: EntryState::Pending(load.clone()),
                pins: 1,
            },
        );
        info!("Cache miss for {}, loading", key);
        (id, Some(load))
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("root", &self.inner.config.root)
            .field("max_cache_size", &self.inner.config.max_cache_size)
            .finish()
    }
}

impl Inner {
    fn package_dir(&self, filename: &str) -> PathBuf {
        self.config.root.join(filename)
    }

    fn staging_dir(&self, filename: &str) -> PathBuf {
        self.workspace.staging_dir().join(filename)
    }

    /// Body of the spawned load task; always settles the Pending entry
    async fn run_load(self: Arc<Self>, key: PackageKey, id: u64) -> CacheResult<()> {
        let filename = key.filename();
        let staging = self.staging_dir(&filename);

        let outcome = AssertUnwindSafe(self.materialize(&key, &staging))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(CacheError::Internal(format!("loading {key} panicked"))));

        match outcome {
            Ok(size_bytes) => {
                let (trash, report) = {
                    let mut state = self.state.lock();
                    if !state.mark_ready(&key, id, size_bytes) {
                        warn!("Cache entry for {} vanished while loading", key);
                    }
                    drop(state);
                    self.take_and_trash(self.config.max_cache_size, true)
                };
                info!(
                    "Cached {} ({} bytes, cache total {} bytes)",
                    key, size_bytes, report.total_size_bytes
                );
                self.empty_trash(trash).await;
                Ok(())
            }
            Err(e) => {
                warn!("Loading {} failed: {}", key, e);
                if let Err(cleanup) = remove_tree(&staging).await {
                    warn!("Failed to clean up {}: {}", staging.display(), cleanup);
                }
                self.state.lock().remove_pending(&key, id);
                Err(e)
            }
        }
    }

    /// Fetch and extract into `staging`, then publish it under the root
    async fn materialize(&self, key: &PackageKey, staging: &Path) -> CacheResult<u64> {
        remove_tree(staging).await?;
        fs::create_dir_all(staging)
            .await
            .map_err(|e| CacheError::io(format!("creating {}", staging.display()), e))?;

        let filename = key.filename();
        let archive = staging.join(&filename);

        with_timeout("fetch", self.config.fetch_timeout, self.fetcher.fetch(key, &archive))
            .await?;
        with_timeout(
            "extract",
            self.config.extract_timeout,
            self.extractor.extract(key, &archive, staging),
        )
        .await?;

        let measured = staging.to_path_buf();
        let size_bytes = tokio::task::spawn_blocking(move || dir_size(&measured))
            .await
            .map_err(|e| CacheError::Internal(format!("size scan failed: {e}")))?
            .map_err(|e| CacheError::io(format!("measuring {}", staging.display()), e))?;

        let target = self.package_dir(&filename);
        fs::rename(staging, &target).await.map_err(|e| {
            CacheError::io(format!("publishing {} to {}", filename, target.display()), e)
        })?;

        Ok(size_bytes)
    }

    /// Pick victims under the lock and move their trees out of sight
    ///
    /// The rename happens while the lock is held so that a reload of the
    /// same package can never collide with a directory being deleted.
    fn take_and_trash(&self, max_bytes: u64, keep_one: bool) -> (Vec<PathBuf>, EvictionReport) {
        let mut state = self.state.lock();
        let victims = state.take_victims(max_bytes, keep_one);

        let trash_root = self.workspace.trash_dir();
        let mut trash = Vec::with_capacity(victims.len());
        let mut report = EvictionReport::default();

        if !victims.is_empty() {
            if let Err(e) = std::fs::create_dir_all(&trash_root) {
                warn!("Failed to create {}: {}", trash_root.display(), e);
            }
        }

        for victim in victims {
            let from = self.package_dir(&victim.filename);
            let to = trash_root.join(format!("{}.{}", victim.filename, victim.id));
            match std::fs::rename(&from, &to) {
                Ok(()) => trash.push(to),
                Err(e) => warn!("Failed to move {} to trash: {}", from.display(), e),
            }
            info!("Evicted {} ({} bytes)", victim.filename, victim.size_bytes);
            report.freed_bytes += victim.size_bytes;
            report.evicted.push(victim.filename);
        }

        report.total_size_bytes = state.total_size_bytes;
        report.stalled = state.total_size_bytes > max_bytes;
        if report.stalled && keep_one {
            warn!(
                "Cache is {} bytes, over its {} byte budget, but nothing else can be evicted",
                state.total_size_bytes, max_bytes
            );
        }

        (trash, report)
    }

    async fn empty_trash(&self, trash: Vec<PathBuf>) {
        for path in trash {
            if let Err(e) = remove_tree(&path).await {
                warn!("Failed to delete {}: {}", path.display(), e);
            }
        }
    }
}

/// A loaded package pinned against eviction
///
/// The pin is released when the lease is dropped.
pub struct PackageLease {
    inner: Arc<Inner>,
    key: PackageKey,
    id: u64,
    root: PathBuf,
}

impl PackageLease {
    /// The package identity
    pub fn key(&self) -> &PackageKey {
        &self.key
    }

    /// Root directory of the extracted package
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client path inside this package
    pub fn resolve(&self, relative: &str) -> CacheResult<PathBuf> {
        resolve(&self.root, relative)
    }
}

impl Drop for PackageLease {
    fn drop(&mut self) {
        self.inner.state.lock().unpin(&self.key, self.id);
    }
}

impl fmt::Debug for PackageLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageLease")
            .field("key", &self.key)
            .field("root", &self.root)
            .finish()
    }
}

/// A resolved path together with the lease that keeps it on disk
#[derive(Debug)]
pub struct ResolvedPath {
    lease: PackageLease,
    path: PathBuf,
}

impl ResolvedPath {
    /// Canonical absolute path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The lease on the containing package
    pub fn lease(&self) -> &PackageLease {
        &self.lease
    }

    /// Whether the path is a directory
    pub fn is_dir(&self) -> bool {
        self.path.is_dir()
    }
}

async fn with_timeout<T>(
    operation: &str,
    limit: Duration,
    fut: impl std::future::Future<Output = CacheResult<T>>,
) -> CacheResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| CacheError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        })?
}

async fn remove_tree(path: &Path) -> CacheResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(format!("removing {}", path.display()), e)),
    }
}

/// Existing package directories under `root`, oldest modification first
fn scan_packages(root: &Path) -> CacheResult<Vec<(PackageKey, u64, DateTime<Utc>)>> {
    let read_dir =
        std::fs::read_dir(root).map_err(|e| CacheError::io(format!("reading {}", root.display()), e))?;
    let mut found = Vec::new();

    for entry in read_dir {
        let entry = entry.map_err(|e| CacheError::io(format!("reading {}", root.display()), e))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        let Ok(key) = PackageKey::parse(&name) else {
            debug!("Ignoring non-package entry {}", name);
            continue;
        };
        let size = dir_size(&entry.path())
            .map_err(|e| CacheError::io(format!("measuring {}", entry.path().display()), e))?;
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((key, size, DateTime::<Utc>::from(modified)));
    }

    found.sort_by_key(|(_, _, modified)| *modified);
    Ok(found)
}
