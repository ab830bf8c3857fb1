//! Upstream package downloads
//!
//! Packages are downloaded from a fixed URL template. A HEAD probe checks
//! the declared size against the cap before any body is transferred, and
//! the body copy enforces the cap again in case the server misreports it.

use crate::error::{CacheError, CacheResult};
use crate::package::PackageKey;
use async_trait::async_trait;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use ureq::http::{header::CONTENT_LENGTH, HeaderMap, StatusCode};

/// Source of raw package archives
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download the archive for `key` into the file `dest`
    ///
    /// Returns the number of bytes written. On failure no file is left at
    /// `dest`. There are no retries at this layer.
    async fn fetch(&self, key: &PackageKey, dest: &Path) -> CacheResult<u64>;
}

/// Build the download URL for `key` from a template
///
/// Placeholders are substituted in a single pass, so field values that
/// happen to contain braces are never expanded again.
pub fn download_url(template: &str, key: &PackageKey) -> String {
    let filename = key.filename();
    let mut url = String::with_capacity(template.len() + filename.len() * 2);
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        url.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find('}') else {
            url.push_str(tail);
            return url;
        };
        let value = match &tail[1..end] {
            "name" => Some(key.name.as_str()),
            "version" => Some(key.version.as_str()),
            "release" => Some(key.release.as_str()),
            "architecture" => Some(key.architecture.as_str()),
            "filename" => Some(filename.as_str()),
            _ => None,
        };
        url.push_str(value.unwrap_or(&tail[..=end]));
        rest = &tail[end + 1..];
    }

    url.push_str(rest);
    url
}

/// HTTP fetcher backed by a blocking `ureq` agent
///
/// Requests run on the blocking thread pool so the async executor stays
/// responsive.
pub struct HttpFetcher {
    agent: ureq::Agent,
    url_template: String,
    size_limit: u64,
}

impl HttpFetcher {
    /// Create a fetcher for `url_template` with a per-package size cap
    pub fn new(url_template: impl Into<String>, size_limit: u64, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            agent,
            url_template: url_template.into(),
            size_limit,
        }
    }

    /// The URL this fetcher downloads `key` from
    pub fn url_for(&self, key: &PackageKey) -> String {
        download_url(&self.url_template, key)
    }

    fn fetch_blocking(agent: &ureq::Agent, url: &str, dest: &Path, limit: u64) -> CacheResult<u64> {
        let probe = agent
            .head(url)
            .call()
            .map_err(|e| upstream_error(url, e))?;
        check_status(url, probe.status())?;
        if let Some(size) = content_length(probe.headers()) {
            debug!("{} declares {} bytes", url, size);
            check_declared_size(url, size, limit)?;
        }

        let response = agent.get(url).call().map_err(|e| upstream_error(url, e))?;
        check_status(url, response.status())?;
        if let Some(size) = content_length(response.headers()) {
            check_declared_size(url, size, limit)?;
        }

        let mut file = File::create(dest)
            .map_err(|e| CacheError::io(format!("creating {}", dest.display()), e))?;
        let mut body = response.into_body().into_reader();

        match copy_capped(&mut body, &mut file, url, limit) {
            Ok(written) => Ok(written),
            Err(e) => {
                drop(file);
                let _ = std::fs::remove_file(dest);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, key: &PackageKey, dest: &Path) -> CacheResult<u64> {
        let url = self.url_for(key);
        info!("Fetching {}", url);

        let agent = self.agent.clone();
        let dest: PathBuf = dest.to_path_buf();
        let limit = self.size_limit;
        let written = tokio::task::spawn_blocking(move || {
            Self::fetch_blocking(&agent, &url, &dest, limit)
        })
        .await
        .map_err(|e| CacheError::Internal(format!("download task failed: {e}")))??;

        debug!("Downloaded {} ({} bytes)", key, written);
        Ok(written)
    }
}

fn upstream_error(url: &str, e: ureq::Error) -> CacheError {
    CacheError::Upstream {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

fn check_status(url: &str, status: StatusCode) -> CacheResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(CacheError::UpstreamStatus {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn check_declared_size(url: &str, size: u64, limit: u64) -> CacheResult<()> {
    if size > limit {
        return Err(CacheError::SizeLimitExceeded {
            url: url.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

/// Copy at most `limit` bytes, failing if the reader has more
fn copy_capped<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    url: &str,
    limit: u64,
) -> CacheResult<u64> {
    let copied = std::io::copy(&mut reader.take(limit.saturating_add(1)), writer)
        .map_err(|e| CacheError::io(format!("downloading {url}"), e))?;
    if copied > limit {
        return Err(CacheError::SizeLimitExceeded {
            url: url.to_string(),
            size: copied,
            limit,
        });
    }
    writer
        .flush()
        .map_err(|e| CacheError::io(format!("flushing download of {url}"), e))?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{GET, HEAD};
    use httpmock::MockServer;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn strace() -> PackageKey {
        PackageKey::parse("strace-debuginfo-4.12-1.fc24.armv7hl.rpm").unwrap()
    }

    #[test]
    fn url_template_substitution() {
        let url = download_url(crate::config::schema::DEFAULT_UPSTREAM_URL, &strace());
        assert_eq!(
            url,
            "https://kojipkgs.fedoraproject.org/packages/strace/4.12/1.fc24/armv7hl/strace-debuginfo-4.12-1.fc24.armv7hl.rpm"
        );
    }

    #[test]
    fn url_template_leaves_unknown_placeholders() {
        let url = download_url("http://mirror/{unknown}/{filename}{", &strace());
        assert_eq!(
            url,
            "http://mirror/{unknown}/strace-debuginfo-4.12-1.fc24.armv7hl.rpm{"
        );
    }

    #[test]
    fn declared_size_over_limit_rejected() {
        assert!(check_declared_size("u", 100, 100).is_ok());
        let err = check_declared_size("u", 101, 100).unwrap_err();
        assert!(matches!(
            err,
            CacheError::SizeLimitExceeded {
                size: 101,
                limit: 100,
                ..
            }
        ));
    }

    #[test]
    fn copy_capped_accepts_exact_limit() {
        let mut reader = Cursor::new(vec![7u8; 16]);
        let mut out = Vec::new();
        assert_eq!(copy_capped(&mut reader, &mut out, "u", 16).unwrap(), 16);
        assert_eq!(out.len(), 16);
    }

    #[test]
    fn copy_capped_aborts_on_overflow() {
        let mut reader = Cursor::new(vec![7u8; 17]);
        let mut out = Vec::new();
        let err = copy_capped(&mut reader, &mut out, "u", 16).unwrap_err();
        assert!(matches!(err, CacheError::SizeLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn fetch_downloads_body() {
        let server = MockServer::start_async().await;
        let filename = strace().filename();
        server
            .mock_async(|when, then| {
                when.method(HEAD).path(format!("/{filename}"));
                then.status(200);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("/{filename}"));
                then.status(200).body("rpm-bytes");
            })
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg.rpm");
        let fetcher = HttpFetcher::new(server.url("/{filename}"), 1024, Duration::from_secs(10));

        let written = fetcher.fetch(&strace(), &dest).await.unwrap();

        assert_eq!(written, 9);
        assert_eq!(std::fs::read(&dest).unwrap(), b"rpm-bytes");
    }

    #[tokio::test]
    async fn fetch_preserves_upstream_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.any_request();
                then.status(404);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg.rpm");
        let fetcher = HttpFetcher::new(server.url("/{filename}"), 1024, Duration::from_secs(10));

        let err = fetcher.fetch(&strace(), &dest).await.unwrap_err();

        assert!(matches!(err, CacheError::UpstreamStatus { status: 404, .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn fetch_over_limit_writes_nothing() {
        let server = MockServer::start_async().await;
        let head = server
            .mock_async(|when, then| {
                when.method(HEAD);
                then.status(200).header("content-length", "4096");
            })
            .await;
        let get = server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(200).body(vec![0u8; 4096]);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg.rpm");
        let fetcher = HttpFetcher::new(server.url("/{filename}"), 1024, Duration::from_secs(10));

        let err = fetcher.fetch(&strace(), &dest).await.unwrap_err();

        assert!(matches!(err, CacheError::SizeLimitExceeded { limit: 1024, .. }));
        assert!(!dest.exists());
        // Rejected by the size probe, before any body was requested.
        assert_eq!(head.hits_async().await, 1);
        assert_eq!(get.hits_async().await, 0);
    }

    #[tokio::test]
    async fn fetch_caps_body_when_size_is_undeclared() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(HEAD);
                then.status(200);
            })
            .await;
        let get = server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(200).body(vec![0u8; 4096]);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg.rpm");
        let fetcher = HttpFetcher::new(server.url("/{filename}"), 1024, Duration::from_secs(10));

        let err = fetcher.fetch(&strace(), &dest).await.unwrap_err();

        assert!(matches!(err, CacheError::SizeLimitExceeded { limit: 1024, .. }));
        assert!(!dest.exists());
        assert_eq!(get.hits_async().await, 1);
    }
}
