//! Log text sources
//!
//! A [`LogSource`] yields one blob of log text for the identity miner. Files
//! are read whole (`-` reads standard input); commands are run to completion
//! under a timeout and their standard output is used.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tracing::debug;

/// Default timeout for log-emitting commands
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure to obtain log text.
#[derive(Debug, thiserror::Error)]
pub enum LogSourceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("`{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("log command is empty")]
    EmptyCommand,
}

/// A source of raw log text.
#[async_trait::async_trait]
pub trait LogSource: Send + Sync {
    async fn read(&self) -> Result<String, LogSourceError>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Reads a log file, or standard input for `-`.
#[derive(Debug, Clone)]
pub struct FileLogSource {
    path: PathBuf,
}

impl FileLogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_stdin(&self) -> bool {
        self.path.as_os_str() == "-"
    }
}

#[async_trait::async_trait]
impl LogSource for FileLogSource {
    async fn read(&self) -> Result<String, LogSourceError> {
        let read_err = |source| LogSourceError::Read {
            path: self.path.clone(),
            source,
        };
        let bytes = if self.is_stdin() {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .map_err(read_err)?;
            buf
        } else {
            tokio::fs::read(&self.path).await.map_err(read_err)?
        };
        debug!(source = %self.describe(), bytes = bytes.len(), "Read log text");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn describe(&self) -> String {
        if self.is_stdin() {
            "stdin".to_string()
        } else {
            format!("file {}", self.path.display())
        }
    }
}

/// Runs a command and captures its standard output. Standard error is only
/// reported when the command fails.
#[derive(Debug, Clone)]
pub struct CommandLogSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandLogSource {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Split a command line on whitespace. No shell quoting is interpreted.
    pub fn from_command_line(line: &str) -> Result<Self, LogSourceError> {
        let mut words = line.split_whitespace();
        let program = words.next().ok_or(LogSourceError::EmptyCommand)?;
        Ok(Self::new(program, words))
    }

    /// Run `line` through `sh -c`, so quoting and pipes are interpreted.
    pub fn shell(line: impl Into<String>) -> Self {
        Self::new("sh", ["-c".to_string(), line.into()])
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait::async_trait]
impl LogSource for CommandLogSource {
    async fn read(&self) -> Result<String, LogSourceError> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LogSourceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| LogSourceError::Timeout {
                program: self.program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| LogSourceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(LogSourceError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(source = %self.describe(), bytes = text.len(), "Captured command output");
        Ok(text)
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            format!("command `{}`", self.program)
        } else {
            format!("command `{} {}`", self.program, self.args.join(" "))
        }
    }
}

/// Fixed in-memory text.
#[derive(Debug, Clone, Default)]
pub struct StaticLogSource {
    text: String,
}

impl StaticLogSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait::async_trait]
impl LogSource for StaticLogSource {
    async fn read(&self) -> Result<String, LogSourceError> {
        Ok(self.text.clone())
    }

    fn describe(&self) -> String {
        "static text".to_string()
    }
}
