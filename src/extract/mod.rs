//! Package extraction
//!
//! Turns a downloaded RPM into a directory tree using the standard
//! packaging tools:
//!
//! | Package | Steps |
//! |---------|-------|
//! | source (`.src.rpm`) | `rpm -i` into a topdir, then `rpmbuild -bp` on `SPECS/<name>.spec` |
//! | binary | `rpm2cpio <archive> \| cpio -idm` inside the destination |
//!
//! The caller owns cleanup: if extraction fails the destination may hold
//! partial output and must be removed as a whole.

pub mod runner;

pub use runner::{CommandRunner, Invocation, PipelineOutput, ProcessRunner};

use crate::error::{CacheError, CacheResult};
use crate::package::PackageKey;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Extracts package archives by driving external tools
#[derive(Clone)]
pub struct Extractor {
    runner: Arc<dyn CommandRunner>,
}

impl Extractor {
    /// Create an extractor using `runner` for all tool invocations
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Extractor that runs the real packaging tools
    pub fn system() -> Self {
        Self::new(Arc::new(ProcessRunner::new()))
    }

    /// Extract `archive` into `dest_dir` and delete the archive on success
    pub async fn extract(&self, key: &PackageKey, archive: &Path, dest_dir: &Path) -> CacheResult<()> {
        info!("Extracting {}", key);

        if key.is_source() {
            for step in source_steps(key, archive, dest_dir) {
                self.runner.run(&[step]).await?.into_result()?;
            }
        } else {
            self.runner
                .run(&binary_pipeline(archive, dest_dir))
                .await?
                .into_result()?;
        }

        fs::remove_file(archive)
            .await
            .map_err(|e| CacheError::io(format!("removing {}", archive.display()), e))?;

        debug!("Extracted {} into {}", key, dest_dir.display());
        Ok(())
    }
}

/// `rpm -i` followed by `rpmbuild -bp`, both rooted at `topdir`
pub fn source_steps(key: &PackageKey, archive: &Path, topdir: &Path) -> [Invocation; 2] {
    let define_topdir = format!("_topdir {}", topdir.display());
    let spec = topdir.join("SPECS").join(key.spec_file_name());

    [
        Invocation::new("rpm")
            .arg("--define")
            .arg(define_topdir.clone())
            .arg("-i")
            .path_arg(archive),
        Invocation::new("rpmbuild")
            .arg("--define")
            .arg(define_topdir)
            .arg("--nodeps")
            .arg("-bp")
            .path_arg(&spec),
    ]
}

/// `rpm2cpio` piped into `cpio`, unpacking inside `dest_dir`
pub fn binary_pipeline(archive: &Path, dest_dir: &Path) -> [Invocation; 2] {
    [
        Invocation::new("rpm2cpio").path_arg(archive),
        Invocation::new("cpio")
            .arg("-idm")
            .arg("--no-absolute-filenames")
            .current_dir(dest_dir),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records invocations and fakes their effects on disk
    ///
    /// Binary pipelines write `usr/share/doc/payload` (of `payload_bytes`
    /// bytes) into the cpio working directory. Source steps create the
    /// `SPECS` and `BUILD/<name>-src` trees.
    pub struct FakeRunner {
        pub calls: Mutex<Vec<Vec<Invocation>>>,
        pub payload_bytes: usize,
        pub fail_program: Option<&'static str>,
    }

    impl FakeRunner {
        pub fn new(payload_bytes: usize) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                payload_bytes,
                fail_program: None,
            }
        }

        pub fn failing(program: &'static str) -> Self {
            Self {
                fail_program: Some(program),
                ..Self::new(0)
            }
        }

        fn topdir(stage: &Invocation) -> Option<std::path::PathBuf> {
            stage
                .args
                .iter()
                .find_map(|a| a.strip_prefix("_topdir "))
                .map(std::path::PathBuf::from)
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, stages: &[Invocation]) -> CacheResult<PipelineOutput> {
            self.calls.lock().push(stages.to_vec());

            for stage in stages {
                if self.fail_program == Some(stage.program.as_str()) {
                    // Leave partial output behind like a real tool would.
                    if let Some(ref cwd) = stage.cwd {
                        std::fs::write(cwd.join("partial"), b"x").unwrap();
                    }
                    return Ok(PipelineOutput {
                        failed: Some(stage.to_string()),
                        status: "exit status: 1".to_string(),
                        stderr: "simulated failure".to_string(),
                    });
                }

                match stage.program.as_str() {
                    "cpio" => {
                        let cwd = stage.cwd.clone().unwrap();
                        let doc = cwd.join("usr/share/doc");
                        std::fs::create_dir_all(&doc).unwrap();
                        std::fs::write(doc.join("payload"), vec![b'x'; self.payload_bytes])
                            .unwrap();
                    }
                    "rpm" => {
                        let topdir = Self::topdir(stage).unwrap();
                        std::fs::create_dir_all(topdir.join("SPECS")).unwrap();
                        std::fs::create_dir_all(topdir.join("SOURCES")).unwrap();
                    }
                    "rpmbuild" => {
                        let topdir = Self::topdir(stage).unwrap();
                        let spec = std::path::PathBuf::from(stage.args.last().unwrap());
                        let name = spec.file_stem().unwrap().to_string_lossy().into_owned();
                        let src = topdir.join("BUILD").join(format!("{name}-src"));
                        std::fs::create_dir_all(&src).unwrap();
                        std::fs::write(src.join("main.c"), vec![b'c'; self.payload_bytes])
                            .unwrap();
                    }
                    _ => {}
                }
            }

            Ok(PipelineOutput::success())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeRunner;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn source_steps_use_topdir_and_spec_name() {
        let key = PackageKey::parse("strace-4.12-1.fc24.src.rpm").unwrap();
        let [install, prep] = source_steps(
            &key,
            Path::new("/cache/pkg/strace-4.12-1.fc24.src.rpm"),
            Path::new("/cache/pkg"),
        );

        assert_eq!(
            install.args,
            [
                "--define",
                "_topdir /cache/pkg",
                "-i",
                "/cache/pkg/strace-4.12-1.fc24.src.rpm"
            ]
        );
        assert_eq!(prep.program, "rpmbuild");
        assert_eq!(
            prep.args,
            [
                "--define",
                "_topdir /cache/pkg",
                "--nodeps",
                "-bp",
                "/cache/pkg/SPECS/strace.spec"
            ]
        );
    }

    #[test]
    fn binary_pipeline_runs_cpio_in_destination() {
        let [convert, unpack] = binary_pipeline(Path::new("/d/a.rpm"), Path::new("/d"));
        assert_eq!(convert.to_string(), "rpm2cpio /d/a.rpm");
        assert_eq!(unpack.program, "cpio");
        assert!(unpack.args.contains(&"--no-absolute-filenames".to_string()));
        assert_eq!(unpack.cwd.as_deref(), Some(Path::new("/d")));
    }

    #[tokio::test]
    async fn binary_extract_removes_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("strace-4.12-1.fc24.x86_64.rpm");
        std::fs::write(&archive, b"rpm").unwrap();
        let runner = Arc::new(FakeRunner::new(10));
        let extractor = Extractor::new(runner.clone());
        let key = PackageKey::parse("strace-4.12-1.fc24.x86_64.rpm").unwrap();

        extractor.extract(&key, &archive, dir.path()).await.unwrap();

        assert!(!archive.exists());
        assert!(dir.path().join("usr/share/doc/payload").is_file());
        let calls = runner.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
    }

    #[tokio::test]
    async fn source_extract_runs_install_then_prep() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("strace-4.12-1.fc24.src.rpm");
        std::fs::write(&archive, b"rpm").unwrap();
        let runner = Arc::new(FakeRunner::new(10));
        let extractor = Extractor::new(runner.clone());
        let key = PackageKey::parse("strace-4.12-1.fc24.src.rpm").unwrap();

        extractor.extract(&key, &archive, dir.path()).await.unwrap();

        let calls = runner.calls.lock();
        let programs: Vec<_> = calls.iter().map(|c| c[0].program.as_str()).collect();
        assert_eq!(programs, ["rpm", "rpmbuild"]);
        assert!(dir.path().join("SPECS").is_dir());
        assert!(dir.path().join("BUILD/strace-src/main.c").is_file());
    }

    #[tokio::test]
    async fn failing_step_surfaces_extraction_error() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("strace-4.12-1.fc24.src.rpm");
        std::fs::write(&archive, b"rpm").unwrap();
        let runner = Arc::new(FakeRunner::failing("rpmbuild"));
        let extractor = Extractor::new(runner.clone());
        let key = PackageKey::parse("strace-4.12-1.fc24.src.rpm").unwrap();

        let err = extractor.extract(&key, &archive, dir.path()).await.unwrap_err();

        assert!(matches!(err, CacheError::Extraction { .. }));
        assert!(archive.exists(), "archive is only removed after success");
    }
}
