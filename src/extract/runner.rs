//! External command execution
//!
//! The extractor only talks to packaging tools through [`CommandRunner`],
//! so tests can substitute a fake that records invocations.

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::debug;

/// One external program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or path
    pub program: String,
    /// Arguments, passed without any shell interpretation
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    /// Create an invocation of `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a path argument
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    /// Run in `dir`
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of running a pipeline
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Rendering of the first stage that failed, if any
    pub failed: Option<String>,
    /// Exit status description of the failed stage
    pub status: String,
    /// Captured stderr of every stage, concatenated
    pub stderr: String,
}

impl PipelineOutput {
    /// All stages exited zero
    pub fn success() -> Self {
        Self {
            failed: None,
            status: "exit status: 0".to_string(),
            stderr: String::new(),
        }
    }

    /// Whether every stage exited zero
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }

    /// Convert a failed pipeline into an extraction error
    pub fn into_result(self) -> CacheResult<()> {
        match self.failed {
            None => Ok(()),
            Some(command) => Err(CacheError::Extraction {
                command,
                status: self.status,
                stderr: self.stderr,
            }),
        }
    }
}

/// Runs external programs
///
/// Each stage's stdout feeds the next stage's stdin. Dropping the returned
/// future must terminate any process still running.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `stages` as a pipeline and wait for all of them
    async fn run(&self, stages: &[Invocation]) -> CacheResult<PipelineOutput>;
}

/// Runs commands as real child processes via `tokio::process`
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a new process runner
    pub fn new() -> Self {
        Self
    }

    fn spawn(invocation: &Invocation, stdin: Option<Stdio>, pipe_out: bool) -> CacheResult<Child> {
        let mut cmd = invocation.command();
        if let Some(stdin) = stdin {
            cmd.stdin(stdin);
        }
        if pipe_out {
            cmd.stdout(Stdio::piped());
        }
        cmd.spawn()
            .map_err(|e| CacheError::command_failed(invocation.to_string(), e))
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, stages: &[Invocation]) -> CacheResult<PipelineOutput> {
        let mut children = Vec::with_capacity(stages.len());
        let mut next_stdin: Option<Stdio> = None;

        for (i, stage) in stages.iter().enumerate() {
            debug!("Executing: {}", stage);
            let pipe_out = i + 1 < stages.len();
            let mut child = Self::spawn(stage, next_stdin.take(), pipe_out)?;
            if pipe_out {
                let stdout = child.stdout.take().ok_or_else(|| {
                    CacheError::Internal(format!("no stdout handle for {}", stage))
                })?;
                let stdio: Stdio = stdout
                    .try_into()
                    .map_err(|e| CacheError::io(format!("piping output of {}", stage), e))?;
                next_stdin = Some(stdio);
            }
            children.push(child);
        }

        // Wait in reverse so downstream stages drain their input first.
        let mut results: Vec<(ExitStatus, String)> = Vec::with_capacity(children.len());
        for (child, stage) in children.into_iter().zip(stages).rev() {
            let output = child
                .wait_with_output()
                .await
                .map_err(|e| CacheError::io(format!("waiting for {}", stage), e))?;
            results.push((output.status, String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        results.reverse();

        let stderr = results
            .iter()
            .map(|(_, err)| err.as_str())
            .collect::<Vec<_>>()
            .join("");
        let failed = stages
            .iter()
            .zip(&results)
            .find(|(_, (status, _))| !status.success());

        Ok(match failed {
            None => PipelineOutput {
                stderr,
                ..PipelineOutput::success()
            },
            Some((stage, (status, _))) => PipelineOutput {
                failed: Some(stage.to_string()),
                status: status.to_string(),
                stderr,
            },
        })
    }
}
